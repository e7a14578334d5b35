//! Newline-delimited JSON input.
//!
//! Each non-blank line is one [`LogRecord`]. Level filtering happens here,
//! before records reach the sink.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;

use crate::record::{Level, LogRecord};
use crate::sink::SqlSink;

/// Line counts from one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub filtered: u64,
    pub malformed: u64,
}

/// Read records from `reader` into `sink` until EOF or shutdown.
///
/// Malformed lines are logged and skipped. Only a read error ends ingest early.
pub async fn ingest<R>(
    reader: R,
    sink: &SqlSink,
    min_level: Level,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();
    let mut line_no: u64 = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown_rx.changed() => {
                tracing::info!("Shutdown requested, stopping ingest");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        line_no += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<LogRecord>(line) {
            Ok(record) if record.level < min_level => stats.filtered += 1,
            Ok(record) => {
                sink.emit(record);
                stats.accepted += 1;
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed record");
                stats.malformed += 1;
            }
        }
    }

    tracing::info!(
        accepted = stats.accepted,
        filtered = stats.filtered,
        malformed = stats.malformed,
        "Ingest finished"
    );
    Ok(stats)
}
