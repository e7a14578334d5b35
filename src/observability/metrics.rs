//! Prometheus metrics.
//!
//! Key metrics:
//! - sqlog_records_enqueued_total: Counter of records accepted by `emit`
//! - sqlog_records_written_total: Counter of records in committed batches
//! - sqlog_records_dropped_total: Counter of records in dropped batches
//! - sqlog_batches_total{outcome}: Counter of flushes by outcome
//! - sqlog_flush_latency_seconds: Histogram of successful flush latency
//! - sqlog_tables_ensured_total: Counter of schema creation attempts
//! - sqlog_buffered_records: Gauge of records waiting in the buffer

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Sqlog metrics registry.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    pub records_enqueued: IntCounter,
    pub records_written: IntCounter,
    pub records_dropped: IntCounter,
    pub batches: IntCounterVec,
    pub flush_latency: Histogram,
    pub tables_ensured: IntCounter,
    pub buffered_records: IntGauge,
}

impl Metrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let records_enqueued = IntCounter::new(
            "sqlog_records_enqueued_total",
            "Total number of records accepted by the sink",
        )?;
        let records_written = IntCounter::new(
            "sqlog_records_written_total",
            "Total number of records in committed batches",
        )?;
        let records_dropped = IntCounter::new(
            "sqlog_records_dropped_total",
            "Total number of records in dropped batches",
        )?;
        let batches = IntCounterVec::new(
            Opts::new("sqlog_batches_total", "Total number of flushed batches"),
            &["outcome"],
        )?;
        let flush_latency = Histogram::with_opts(
            HistogramOpts::new(
                "sqlog_flush_latency_seconds",
                "Latency from connection checkout to commit",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        let tables_ensured = IntCounter::new(
            "sqlog_tables_ensured_total",
            "Total number of CREATE TABLE attempts",
        )?;
        let buffered_records = IntGauge::new(
            "sqlog_buffered_records",
            "Records waiting in the buffer",
        )?;

        registry.register(Box::new(records_enqueued.clone()))?;
        registry.register(Box::new(records_written.clone()))?;
        registry.register(Box::new(records_dropped.clone()))?;
        registry.register(Box::new(batches.clone()))?;
        registry.register(Box::new(flush_latency.clone()))?;
        registry.register(Box::new(tables_ensured.clone()))?;
        registry.register(Box::new(buffered_records.clone()))?;

        Ok(Self {
            registry,
            records_enqueued,
            records_written,
            records_dropped,
            batches,
            flush_latency,
            tables_ensured,
            buffered_records,
        })
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
pub fn init_metrics() {
    if METRICS.get().is_some() {
        return;
    }

    match Metrics::new() {
        Ok(metrics) => {
            let _ = METRICS.set(metrics);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to register metrics, recording disabled"),
    }
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Registry to serve on `/metrics`. Empty when metrics are not initialized.
pub fn prometheus_registry() -> Registry {
    METRICS
        .get()
        .map(|m| m.registry.clone())
        .unwrap_or_default()
}

/// Record a record accepted by `emit`.
pub fn record_enqueued() {
    if let Some(m) = METRICS.get() {
        m.records_enqueued.inc();
    }
}

/// Record the current buffer depth.
pub fn record_buffered(records: usize) {
    if let Some(m) = METRICS.get() {
        m.buffered_records.set(records as i64);
    }
}

/// Record a committed batch.
pub fn record_flush(records: usize, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        m.batches.with_label_values(&["committed"]).inc();
        m.records_written.inc_by(records as u64);
        m.flush_latency.observe(latency_seconds);
    }
}

/// Record a dropped batch.
pub fn record_dropped(records: usize) {
    if let Some(m) = METRICS.get() {
        m.batches.with_label_values(&["dropped"]).inc();
        m.records_dropped.inc_by(records as u64);
    }
}

/// Record a schema creation attempt.
pub fn record_table_ensured() {
    if let Some(m) = METRICS.get() {
        m.tables_ensured.inc();
    }
}
