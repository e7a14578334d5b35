//! Dedicated flush thread and the batch write algorithm.
//!
//! Every batch is written on one OS thread, so at most one transaction is
//! open per sink and batches commit in the order they were captured:
//! - Check out a connection (failure drops the batch)
//! - `BEGIN IMMEDIATE`
//! - Insert each record in order, switching cached statements when the
//!   resolved table changes
//! - Commit; any failure rolls the whole batch back and drops it
//!
//! Nothing is retried or re-queued.

use rusqlite::{CachedStatement, Connection, TransactionBehavior};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::batch::EventBuffer;
use super::pool::ConnectionPool;
use super::schema::{default_create_sql, SchemaManager};
use super::statements::{default_insert_sql, InsertStatement, StatementCache};
use crate::config::{ConfigError, SinkConfig};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::observability::metrics::{record_dropped, record_flush};
use crate::record::LogRecord;
use crate::routing::{TableName, TableRouter};
use crate::serializer::Serializer;

/// Name of the thread that runs [`BatchWriter`].
pub const FLUSH_THREAD_NAME: &str = "sqlog-flush";

/// Commands processed by the flush thread, in arrival order.
#[derive(Debug)]
pub enum FlushCommand {
    /// Write one captured batch.
    Batch(Vec<LogRecord>),
    /// Acknowledge once every earlier command has been handled.
    Barrier(std::sync::mpsc::SyncSender<()>),
    /// Stop after the commands already queued.
    Shutdown,
}

/// Failure of a single flush.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("failed to open connection: {0}")]
    Connection(#[from] r2d2::Error),

    #[error("failed to begin transaction: {0}")]
    Begin(#[source] rusqlite::Error),

    #[error("insert into {table} failed: {source}")]
    Insert {
        table: TableName,
        #[source]
        source: rusqlite::Error,
    },

    #[error("commit failed: {0}")]
    Commit(#[source] rusqlite::Error),
}

impl FlushError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::Connection(_) => DiagnosticKind::Connection,
            Self::Begin(_) | Self::Insert { .. } | Self::Commit(_) => DiagnosticKind::Write,
        }
    }

    pub fn table(&self) -> Option<&TableName> {
        match self {
            Self::Insert { table, .. } => Some(table),
            _ => None,
        }
    }
}

/// Counters shared between the flush thread and the sink.
#[derive(Debug, Default)]
pub struct WriterStats {
    batches_committed: AtomicU64,
    batches_dropped: AtomicU64,
    records_written: AtomicU64,
    records_dropped: AtomicU64,
    schema_creations: AtomicU64,
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub batches_committed: u64,
    pub batches_dropped: u64,
    pub records_written: u64,
    pub records_dropped: u64,
    /// Schema creation attempts, one per table build.
    pub schema_creations: u64,
}

impl WriterStats {
    pub fn record_commit(&self, records: usize) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.records_written.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_drop(&self, records: usize) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.records_dropped.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_schema_creation(&self) {
        self.schema_creations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            schema_creations: self.schema_creations.load(Ordering::Relaxed),
        }
    }
}

/// Writes batches of records, one transaction per batch.
pub struct BatchWriter {
    pool: ConnectionPool,
    router: TableRouter,
    serializer: Serializer,
    statements: StatementCache,
    diagnostics: Arc<dyn DiagnosticSink>,
    stats: Arc<WriterStats>,
}

impl BatchWriter {
    /// Build a writer from a validated configuration.
    pub fn new(
        config: &SinkConfig,
        diagnostics: Arc<dyn DiagnosticSink>,
        stats: Arc<WriterStats>,
    ) -> Result<Self, ConfigError> {
        let router = TableRouter::parse(&config.table_name)?;

        let create_template = config
            .create_table_sql
            .clone()
            .unwrap_or_else(|| default_create_sql(config.include_template));
        let insert_template = config
            .insert_sql
            .clone()
            .unwrap_or_else(|| default_insert_sql(config.include_template));

        let schema = SchemaManager::new(create_template, diagnostics.clone(), stats.clone());

        Ok(Self {
            pool: ConnectionPool::new(&config.connection_string, config.connect_timeout),
            router,
            serializer: Serializer::new(config.store_timestamp_in_utc, config.empty_values),
            statements: StatementCache::new(insert_template, schema),
            diagnostics,
            stats,
        })
    }

    /// Ensure a static destination table up front. Best-effort.
    pub fn prepare_static_table(&self) {
        let Some(table) = self.router.static_table() else {
            return;
        };

        match self.pool.get() {
            Ok(conn) => {
                self.statements.get_or_build(&conn, table);
            }
            Err(e) => self.diagnostics.report(&Diagnostic {
                kind: DiagnosticKind::Connection,
                table: Some(table.to_string()),
                records: 0,
                message: e.to_string(),
            }),
        }
    }

    /// Write a batch atomically. Returns whether it was committed.
    pub fn write_batch(&self, batch: &[LogRecord]) -> bool {
        if batch.is_empty() {
            return true;
        }

        let start = Instant::now();
        let mut built = Vec::new();

        match self.try_write(batch, &mut built) {
            Ok(()) => {
                let latency = start.elapsed().as_secs_f64();
                self.stats.record_commit(batch.len());
                record_flush(batch.len(), latency);
                tracing::debug!(
                    records = batch.len(),
                    latency_ms = latency * 1000.0,
                    "Committed log batch"
                );
                true
            }
            Err(e) => {
                // DDL ran inside the rolled-back transaction, so tables first
                // built here may not exist.
                for table in &built {
                    self.statements.invalidate(table);
                }

                self.stats.record_drop(batch.len());
                record_dropped(batch.len());
                self.diagnostics.report(&Diagnostic {
                    kind: e.kind(),
                    table: e.table().map(ToString::to_string),
                    records: batch.len(),
                    message: e.to_string(),
                });
                false
            }
        }
    }

    fn try_write(&self, batch: &[LogRecord], built: &mut Vec<TableName>) -> Result<(), FlushError> {
        let mut conn = self.pool.get()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(FlushError::Begin)?;

        {
            let mut current: Option<(Arc<InsertStatement>, CachedStatement<'_>)> = None;

            for record in batch {
                let table = self.router.resolve(&record.timestamp);

                if current.as_ref().map_or(true, |(stmt, _)| stmt.table != table) {
                    current = Some(self.prepare(&tx, &table, built)?);
                }

                if let Some((stmt, prepared)) = current.as_mut() {
                    let row = self.serializer.row(record);
                    prepared
                        .execute(stmt.params(&row).as_slice())
                        .map_err(|source| FlushError::Insert {
                            table: table.clone(),
                            source,
                        })?;
                }
            }
        }

        tx.commit().map_err(FlushError::Commit)
    }

    fn prepare<'conn>(
        &self,
        conn: &'conn Connection,
        table: &TableName,
        built: &mut Vec<TableName>,
    ) -> Result<(Arc<InsertStatement>, CachedStatement<'conn>), FlushError> {
        let (stmt, is_new) = self.statements.get_or_build(conn, table);
        if is_new {
            built.push(table.clone());
        }

        let prepared = conn
            .prepare_cached(&stmt.sql)
            .map_err(|source| FlushError::Insert {
                table: table.clone(),
                source,
            })?;
        Ok((stmt, prepared))
    }

    pub fn stats(&self) -> &Arc<WriterStats> {
        &self.stats
    }
}

/// Handle to the flush thread.
pub struct FlushWorker {
    thread: JoinHandle<()>,
}

impl FlushWorker {
    /// Spawn the flush thread.
    ///
    /// With a flush interval, the thread also submits the buffer whenever its
    /// oldest record has waited that long.
    pub fn spawn(
        writer: BatchWriter,
        commands: UnboundedReceiver<FlushCommand>,
        buffer: Arc<EventBuffer>,
        flush_interval: Option<Duration>,
    ) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let thread = std::thread::Builder::new()
            .name(FLUSH_THREAD_NAME.into())
            .spawn(move || {
                runtime.block_on(run_flush_loop(writer, commands, buffer, flush_interval));
                tracing::debug!("Flush thread stopped");
            })?;

        Ok(Self { thread })
    }

    /// Wait for the flush thread to exit.
    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!("Flush thread panicked");
        }
    }
}

async fn run_flush_loop(
    writer: BatchWriter,
    mut commands: UnboundedReceiver<FlushCommand>,
    buffer: Arc<EventBuffer>,
    flush_interval: Option<Duration>,
) {
    let mut ticker = flush_interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let command = match ticker.as_mut() {
            Some(ticker) => tokio::select! {
                command = commands.recv() => command,
                _ = ticker.tick() => {
                    buffer.submit_due();
                    continue;
                }
            },
            None => commands.recv().await,
        };

        match command {
            Some(FlushCommand::Batch(batch)) => {
                writer.write_batch(&batch);
            }
            Some(FlushCommand::Barrier(ack)) => {
                let _ = ack.send(());
            }
            Some(FlushCommand::Shutdown) | None => break,
        }
    }
}

/// Sends commands to the flush thread.
#[derive(Clone)]
pub struct FlushHandle {
    tx: UnboundedSender<FlushCommand>,
}

impl FlushHandle {
    pub fn new(tx: UnboundedSender<FlushCommand>) -> Self {
        Self { tx }
    }

    /// Queue a batch. Returns false if the flush thread is gone.
    pub fn submit(&self, batch: Vec<LogRecord>) -> bool {
        self.tx.send(FlushCommand::Batch(batch)).is_ok()
    }

    /// Block until every previously queued command has been handled.
    ///
    /// Returns immediately on the flush thread itself (e.g. from a
    /// [`DiagnosticSink`]), which could never acknowledge its own barrier.
    pub fn barrier(&self) {
        if std::thread::current().name() == Some(FLUSH_THREAD_NAME) {
            return;
        }

        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);
        if self.tx.send(FlushCommand::Barrier(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Ask the flush thread to stop after the queued commands.
    pub fn shutdown(&self) {
        let _ = self.tx.send(FlushCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnostics;
    use crate::record::Level;
    use chrono::DateTime;
    use tempfile::TempDir;

    struct Harness {
        _temp_dir: TempDir,
        db_path: std::path::PathBuf,
        diagnostics: Arc<CollectingDiagnostics>,
        writer: BatchWriter,
    }

    impl Harness {
        fn new(configure: impl FnOnce(&mut SinkConfig)) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let db_path = temp_dir.path().join("logs.db");
            let mut config = SinkConfig::new(db_path.to_str().unwrap());
            configure(&mut config);

            let diagnostics = Arc::new(CollectingDiagnostics::new());
            let writer =
                BatchWriter::new(&config, diagnostics.clone(), Arc::new(WriterStats::default()))
                    .unwrap();

            Self {
                _temp_dir: temp_dir,
                db_path,
                diagnostics,
                writer,
            }
        }

        fn query(&self, sql: &str) -> Vec<String> {
            let conn = Connection::open(&self.db_path).unwrap();
            let mut stmt = conn.prepare(sql).unwrap();
            let rows: Vec<String> = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            rows
        }

        fn count(&self, table: &str) -> usize {
            self.query(&format!("SELECT CAST(COUNT(*) AS TEXT) FROM \"{table}\""))[0]
                .parse()
                .unwrap()
        }
    }

    fn at(ts: &str, message: &str) -> LogRecord {
        LogRecord::new(Level::Information, message)
            .with_timestamp(DateTime::parse_from_rfc3339(ts).unwrap())
    }

    #[test]
    fn test_write_batch_in_order() {
        let h = Harness::new(|_| {});
        let batch = vec![
            LogRecord::new(Level::Information, "a"),
            LogRecord::new(Level::Warning, "b"),
            LogRecord::new(Level::Error, "c").with_exception("boom"),
        ];

        assert!(h.writer.write_batch(&batch));
        assert_eq!(h.query("SELECT Message FROM Logs ORDER BY id"), vec!["a", "b", "c"]);
        assert_eq!(
            h.query("SELECT Level FROM Logs ORDER BY id"),
            vec!["Information", "Warning", "Error"]
        );
        assert_eq!(h.query("SELECT Exception FROM Logs ORDER BY id"), vec!["", "", "boom"]);
        assert_eq!(h.query("SELECT Properties FROM Logs WHERE id = 1"), vec!["{}"]);

        let stats = h.writer.stats().snapshot();
        assert_eq!(stats.batches_committed, 1);
        assert_eq!(stats.records_written, 3);
        assert!(h.diagnostics.is_empty());
    }

    #[test]
    fn test_stores_template_and_rendered_message() {
        let h = Harness::new(|_| {});
        let record = LogRecord::new(Level::Information, "Hello {Name}").with_property("Name", "bob");

        assert!(h.writer.write_batch(&[record]));
        assert_eq!(h.query("SELECT Template FROM Logs"), vec!["Hello {Name}"]);
        assert_eq!(h.query("SELECT Message FROM Logs"), vec!["Hello bob"]);
        assert_eq!(h.query("SELECT Properties FROM Logs"), vec![r#"{"Name":"bob"}"#]);
    }

    #[test]
    fn test_insert_failure_rolls_back_whole_batch() {
        let h = Harness::new(|c| {
            c.create_table_sql = Some(
                "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 Timestamp TEXT, Level TEXT, Template TEXT, \
                 Message TEXT CHECK (Message <> 'poison'), Exception TEXT, Properties TEXT)"
                    .into(),
            );
        });
        h.writer.prepare_static_table();

        let batch = vec![
            LogRecord::new(Level::Information, "ok-1"),
            LogRecord::new(Level::Information, "poison"),
            LogRecord::new(Level::Information, "ok-2"),
        ];

        assert!(!h.writer.write_batch(&batch));
        assert_eq!(h.count("Logs"), 0);

        let reports = h.diagnostics.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, DiagnosticKind::Write);
        assert_eq!(reports[0].records, 3);
        assert_eq!(reports[0].table.as_deref(), Some("Logs"));

        let stats = h.writer.stats().snapshot();
        assert_eq!(stats.batches_dropped, 1);
        assert_eq!(stats.records_dropped, 3);

        // The writer stays usable.
        assert!(h.writer.write_batch(&[LogRecord::new(Level::Information, "ok-3")]));
        assert_eq!(h.count("Logs"), 1);
    }

    #[test]
    fn test_daily_tables_created_once() {
        let h = Harness::new(|c| c.table_name = "Logs_{%Y%m%d}".into());

        let first = vec![
            at("2024-01-01T10:00:00Z", "d1-a"),
            at("2024-01-02T10:00:00Z", "d2-a"),
            at("2024-01-01T11:00:00Z", "d1-b"),
        ];
        assert!(h.writer.write_batch(&first));
        assert!(h.writer.write_batch(&[at("2024-01-02T12:00:00Z", "d2-b")]));
        assert!(h.writer.write_batch(&[at("2024-01-01T12:00:00Z", "d1-c")]));

        assert_eq!(
            h.query("SELECT Message FROM Logs_20240101 ORDER BY id"),
            vec!["d1-a", "d1-b", "d1-c"]
        );
        assert_eq!(
            h.query("SELECT Message FROM Logs_20240102 ORDER BY id"),
            vec!["d2-a", "d2-b"]
        );
        assert_eq!(h.writer.stats().snapshot().schema_creations, 2);
    }

    #[test]
    fn test_rolled_back_table_is_ensured_again() {
        let h = Harness::new(|c| {
            c.table_name = "Logs_{}".into();
            c.create_table_sql = Some(
                "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, \
                 Timestamp TEXT, Level TEXT, Template TEXT, \
                 Message TEXT CHECK (Message <> 'poison'), Exception TEXT, Properties TEXT)"
                    .into(),
            );
        });

        let batch = vec![
            at("2024-02-01T10:00:00Z", "fine"),
            at("2024-02-01T10:00:01Z", "poison"),
        ];
        assert!(!h.writer.write_batch(&batch));
        // The CREATE was rolled back together with the inserts.
        assert!(h
            .query("SELECT name FROM sqlite_master WHERE name = 'Logs_20240201'")
            .is_empty());

        assert!(h.writer.write_batch(&[at("2024-02-01T11:00:00Z", "fine")]));
        assert_eq!(h.count("Logs_20240201"), 1);
        assert_eq!(h.writer.stats().snapshot().schema_creations, 2);
    }

    #[test]
    fn test_connection_failure_drops_batch() {
        let temp_dir = TempDir::new().unwrap();
        let mut config =
            SinkConfig::new(temp_dir.path().join("missing/logs.db").to_str().unwrap());
        config.connect_timeout = Duration::from_millis(100);

        let diagnostics = Arc::new(CollectingDiagnostics::new());
        let writer =
            BatchWriter::new(&config, diagnostics.clone(), Arc::new(WriterStats::default()))
                .unwrap();

        assert!(!writer.write_batch(&[LogRecord::new(Level::Error, "lost")]));
        assert_eq!(diagnostics.count(DiagnosticKind::Connection), 1);
        assert_eq!(writer.stats().snapshot().records_dropped, 1);
    }

    #[test]
    fn test_schema_failure_is_swallowed_then_insert_fails() {
        let h = Harness::new(|c| c.create_table_sql = Some("CREATE TABLE {table} (".into()));

        assert!(!h.writer.write_batch(&[LogRecord::new(Level::Information, "x")]));
        assert_eq!(h.diagnostics.count(DiagnosticKind::Schema), 1);
        assert_eq!(h.diagnostics.count(DiagnosticKind::Write), 1);
        assert!(!h.writer.statements.contains(&TableName::new("Logs").unwrap()));
    }

    #[test]
    fn test_flush_worker_processes_commands_in_order() {
        let h = Harness::new(|_| {});
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let buffer = Arc::new(EventBuffer::new(
            super::super::batch::BatchConfig::new(2, None),
            tx.clone(),
        ));
        let db_path = h.db_path.clone();
        let worker = FlushWorker::spawn(h.writer, rx, buffer.clone(), None).unwrap();
        let handle = FlushHandle::new(tx);

        buffer.enqueue(LogRecord::new(Level::Information, "1"));
        buffer.enqueue(LogRecord::new(Level::Information, "2"));
        handle.submit(vec![LogRecord::new(Level::Information, "3")]);
        handle.barrier();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM Logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);

        handle.shutdown();
        worker.join();
    }
}
