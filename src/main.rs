//! Sqlog: batch newline-delimited JSON log records into SQLite.
//!
//! # Usage
//!
//! ```bash
//! my-service | sqlog --database logs.db --table 'Logs_{%Y%m%d}' --batch-size 200
//! ```
//!
//! Environment variables can also be used:
//! - `SQLOG_DATABASE`: SQLite database path
//! - `SQLOG_TABLE`: Table name or date pattern
//! - `SQLOG_BATCH_SIZE`: Records per transaction
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use sqlog::config::Config;
use sqlog::diagnostics::TracingDiagnostics;
use sqlog::ingest::ingest;
use sqlog::observability::metrics::{init_metrics, prometheus_registry};
use sqlog::observability::prometheus::{run_prometheus_server, PrometheusState};
use sqlog::observability::tracing::init_tracing;
use sqlog::SqlSink;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;

fn main() -> anyhow::Result<()> {
    let config = Config::parse_args();

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let result = runtime.block_on(run(config));
    // A pending stdin read never completes on its own after a signal.
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config.log_level, config.log_format);
    init_metrics();

    let sink_config = config
        .sink_config()
        .context("failed to read custom SQL template")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_signal(shutdown_tx));

    let ready = Arc::new(AtomicBool::new(false));
    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let state = PrometheusState::new(prometheus_registry(), ready.clone());
        let metrics_shutdown_rx = shutdown_rx.clone();

        tokio::spawn(async move {
            if let Err(e) = run_prometheus_server(addr, state, metrics_shutdown_rx).await {
                tracing::error!(error = %e, "Prometheus server error");
            }
        });
    }

    // Priming the static table may wait on the database.
    let sink = tokio::task::spawn_blocking(move || {
        SqlSink::new(sink_config, Arc::new(TracingDiagnostics))
    })
    .await?
    .context("failed to create log sink")?;
    ready.store(true, Ordering::Release);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &config.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let result = ingest(reader, &sink, config.min_level, shutdown_rx).await;

    ready.store(false, Ordering::Release);
    tokio::task::spawn_blocking(move || sink.close()).await?;

    let stats = result.context("failed to read input")?;
    tracing::info!(
        accepted = stats.accepted,
        malformed = stats.malformed,
        "Sqlog shutdown complete"
    );
    Ok(())
}

/// Resolve on SIGINT or SIGTERM and signal shutdown.
async fn wait_for_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown...");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }

    let _ = shutdown_tx.send(true);
}
