//! SQLite storage layer.
//!
//! Provides:
//! - Record buffering and batch handoff
//! - Connection pool with writer pragmas
//! - Lazy table creation and per-table insert statements
//! - Dedicated flush thread with one transaction per batch

pub mod batch;
pub mod pool;
pub mod schema;
pub mod statements;
pub mod writer;
