//! Public entry point: a batching SQLite log sink.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlog::{Level, LogRecord, SinkConfig, SqlSink};
//! use sqlog::diagnostics::TracingDiagnostics;
//!
//! let config = SinkConfig::new("logs.db").with_batch_size(50);
//! let sink = SqlSink::new(config, Arc::new(TracingDiagnostics))?;
//! sink.emit(LogRecord::new(Level::Information, "Started {Service}").with_property("Service", "api"));
//! sink.close();
//! # Ok::<(), sqlog::SinkError>(())
//! ```

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{ConfigError, SinkConfig};
use crate::diagnostics::{DiagnosticSink, TracingDiagnostics};
use crate::record::LogRecord;
use crate::storage::batch::{BatchConfig, EventBuffer};
use crate::storage::writer::{BatchWriter, FlushHandle, FlushWorker, StatsSnapshot, WriterStats};

/// Errors raised while creating a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start flush thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Buffers records and writes them to SQLite in batches.
///
/// `emit` never blocks on the database and never fails; write errors go to
/// the [`DiagnosticSink`] given at construction.
pub struct SqlSink {
    buffer: Arc<EventBuffer>,
    flush: FlushHandle,
    worker: Option<FlushWorker>,
    stats: Arc<WriterStats>,
}

impl SqlSink {
    /// Validate `config`, ensure a static table, and start the flush thread.
    pub fn new(config: SinkConfig, diagnostics: Arc<dyn DiagnosticSink>) -> Result<Self, SinkError> {
        config.validate()?;

        let stats = Arc::new(WriterStats::default());
        let writer = BatchWriter::new(&config, diagnostics, stats.clone())?;
        writer.prepare_static_table();

        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = Arc::new(EventBuffer::new(
            BatchConfig::new(config.batch_size, config.flush_interval),
            tx.clone(),
        ));
        let worker = FlushWorker::spawn(writer, rx, buffer.clone(), config.flush_interval)?;

        tracing::info!(
            table = %config.table_name,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.map(|d| d.as_millis() as u64),
            "Log sink started"
        );

        Ok(Self {
            buffer,
            flush: FlushHandle::new(tx),
            worker: Some(worker),
            stats,
        })
    }

    /// Create a sink that reports failures through `tracing`.
    pub fn with_tracing(config: SinkConfig) -> Result<Self, SinkError> {
        Self::new(config, Arc::new(TracingDiagnostics))
    }

    /// Buffer a record. A full buffer is handed to the flush thread.
    pub fn emit(&self, record: LogRecord) {
        self.buffer.enqueue(record);
    }

    /// Submit buffered records and wait until everything queued so far has
    /// been committed or dropped.
    pub fn flush(&self) {
        self.buffer.submit_pending();
        self.flush.barrier();
    }

    /// Records waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Write the remaining records as a final batch and stop the flush thread.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let remaining = self.buffer.drain();
        if !remaining.is_empty() {
            tracing::debug!(records = remaining.len(), "Flushing remaining records");
            self.flush.submit(remaining);
        }
        self.flush.shutdown();
        worker.join();

        let stats = self.stats.snapshot();
        tracing::info!(
            records_written = stats.records_written,
            records_dropped = stats.records_dropped,
            "Log sink closed"
        );
    }
}

impl Drop for SqlSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnostics;
    use crate::record::Level;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SinkConfig {
        SinkConfig::new(dir.path().join("logs.db").to_str().unwrap())
    }

    fn count(dir: &TempDir, table: &str) -> i64 {
        let conn = rusqlite::Connection::open(dir.path().join("logs.db")).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let diagnostics = Arc::new(CollectingDiagnostics::new());

        let err = SqlSink::new(config(&dir).with_batch_size(0), diagnostics.clone()).err();
        assert!(matches!(
            err,
            Some(SinkError::Config(ConfigError::BatchSizeOutOfRange(0)))
        ));

        let err = SqlSink::new(SinkConfig::new(""), diagnostics.clone()).err();
        assert!(matches!(
            err,
            Some(SinkError::Config(ConfigError::EmptyConnectionString))
        ));

        let err = SqlSink::new(config(&dir).with_table_name("Logs; DROP"), diagnostics).err();
        assert!(matches!(
            err,
            Some(SinkError::Config(ConfigError::InvalidTablePattern { .. }))
                | Some(SinkError::Config(ConfigError::InvalidTableName(_)))
        ));
    }

    #[test]
    fn test_static_table_created_at_startup() {
        let dir = TempDir::new().unwrap();
        let sink = SqlSink::new(config(&dir), Arc::new(CollectingDiagnostics::new())).unwrap();

        assert_eq!(count(&dir, "Logs"), 0);
        assert_eq!(sink.stats().schema_creations, 1);
        sink.close();
    }

    #[test]
    fn test_flush_writes_partial_batch() {
        let dir = TempDir::new().unwrap();
        let sink = SqlSink::new(config(&dir), Arc::new(CollectingDiagnostics::new())).unwrap();

        sink.emit(LogRecord::new(Level::Information, "one"));
        sink.emit(LogRecord::new(Level::Information, "two"));
        assert_eq!(sink.pending(), 2);

        sink.flush();
        assert_eq!(sink.pending(), 0);
        assert_eq!(count(&dir, "Logs"), 2);
        assert_eq!(sink.stats().batches_committed, 1);
    }

    #[test]
    fn test_flush_interval_submits_aged_batch() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.flush_interval = Some(Duration::from_millis(20));
        let sink = SqlSink::new(cfg, Arc::new(CollectingDiagnostics::new())).unwrap();

        sink.emit(LogRecord::new(Level::Warning, "late"));

        let mut written = 0;
        for _ in 0..100 {
            written = sink.stats().records_written;
            if written == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(written, 1);
    }

    #[test]
    fn test_flush_from_diagnostic_sink_does_not_block() {
        use crate::diagnostics::Diagnostic;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{OnceLock, Weak};

        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir).with_batch_size(1);
        cfg.create_table_sql = Some(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                Timestamp TEXT, Level TEXT, Template TEXT,
                Message TEXT CHECK (Message <> 'boom'),
                Exception TEXT, Properties TEXT
            )"
            .into(),
        );

        let slot: Arc<OnceLock<Weak<SqlSink>>> = Arc::new(OnceLock::new());
        let reports = Arc::new(AtomicUsize::new(0));
        let diagnostics = {
            let slot = slot.clone();
            let reports = reports.clone();
            move |_: &Diagnostic| {
                reports.fetch_add(1, Ordering::SeqCst);
                if let Some(sink) = slot.get().and_then(Weak::upgrade) {
                    sink.emit(LogRecord::new(Level::Information, "recovered"));
                    sink.flush();
                }
            }
        };

        let sink = Arc::new(SqlSink::new(cfg, Arc::new(diagnostics)).unwrap());
        slot.set(Arc::downgrade(&sink)).unwrap();

        sink.emit(LogRecord::new(Level::Error, "boom"));
        sink.flush();
        assert_eq!(reports.load(Ordering::SeqCst), 1);

        sink.flush();
        assert_eq!(count(&dir, "Logs"), 1);
        assert_eq!(sink.stats().records_dropped, 1);
    }

    #[test]
    fn test_drop_drains_buffer() {
        let dir = TempDir::new().unwrap();
        {
            let sink =
                SqlSink::new(config(&dir), Arc::new(CollectingDiagnostics::new())).unwrap();
            sink.emit(LogRecord::new(Level::Debug, "kept"));
        }
        assert_eq!(count(&dir, "Logs"), 1);
    }
}
