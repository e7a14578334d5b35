//! Test utilities for sqlog integration tests.
//!
//! Provides:
//! - Temporary database fixtures
//! - Sink construction with collected diagnostics
//! - Row inspection helpers

#![allow(dead_code)]

use rusqlite::Connection;
use sqlog::{CollectingDiagnostics, SinkConfig, SqlSink};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
    pub diagnostics: Arc<CollectingDiagnostics>,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self {
            temp_dir,
            db_path,
            diagnostics: Arc::new(CollectingDiagnostics::new()),
        }
    }

    /// Get the database path as a string.
    pub fn db_path_str(&self) -> &str {
        self.db_path.to_str().expect("invalid path")
    }

    /// Default configuration pointing at the fixture database.
    pub fn config(&self) -> SinkConfig {
        SinkConfig::new(self.db_path_str())
    }

    /// Create a sink reporting into the fixture's diagnostics.
    pub fn sink(&self, config: SinkConfig) -> SqlSink {
        SqlSink::new(config, self.diagnostics.clone()).expect("failed to create sink")
    }

    /// Open a separate connection to inspect the database.
    pub fn connect(&self) -> Connection {
        Connection::open(&self.db_path).expect("failed to open database")
    }

    pub fn row_count(&self, table: &str) -> i64 {
        self.connect()
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })
            .expect("count query failed")
    }

    /// Values of a text column, ordered by `id`.
    pub fn column(&self, table: &str, column: &str) -> Vec<Option<String>> {
        let conn = self.connect();
        let mut stmt = conn
            .prepare(&format!("SELECT {column} FROM \"{table}\" ORDER BY id"))
            .expect("select failed");
        let values: Vec<Option<String>> = stmt
            .query_map([], |row| row.get(0))
            .expect("query failed")
            .collect::<Result<_, _>>()
            .expect("row decode failed");
        values
    }

    /// Non-null text values of a column, ordered by `id`.
    pub fn texts(&self, table: &str, column: &str) -> Vec<String> {
        self.column(table, column).into_iter().flatten().collect()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.connect()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .unwrap_or(false)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a condition to become true with timeout.
///
/// Returns `true` if the condition was met, `false` if the timeout expired.
pub fn wait_for<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    false
}
