//! Connection pool for the flush thread.
//!
//! Uses r2d2 with r2d2_sqlite. Flushes are serialized, so a single pooled
//! connection is kept; checking it out is the "open a connection" step of
//! every flush and fails after the configured timeout.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::time::Duration;

use super::schema::apply_pragmas;

/// A connection checked out for one flush.
pub type PooledSqlite = PooledConnection<SqliteConnectionManager>;

/// Pool of write connections.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Create a pool for the given SQLite path or `file:` URI.
    ///
    /// No connection is opened here; failures surface on [`ConnectionPool::get`].
    pub fn new(connection_string: &str, connect_timeout: Duration) -> Self {
        let manager = SqliteConnectionManager::file(connection_string);

        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(0))
            .connection_timeout(connect_timeout)
            .connection_customizer(Box::new(WriterConnectionCustomizer))
            .build_unchecked(manager);

        Self { pool }
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledSqlite, r2d2::Error> {
        self.pool.get()
    }
}

/// Connection customizer that applies writer pragmas.
#[derive(Debug)]
struct WriterConnectionCustomizer;

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error>
    for WriterConnectionCustomizer
{
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        apply_pragmas(conn)
    }
}
