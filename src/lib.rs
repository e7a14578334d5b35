//! Sqlog: a batching structured-log sink backed by SQLite.
//!
//! Producers hand records to [`SqlSink::emit`]; the sink buffers them and a
//! dedicated flush thread commits each full batch in a single transaction.
//! Delivery is best-effort: a batch that fails to commit is reported to a
//! [`DiagnosticSink`] and dropped.
//!
//! # Modules
//!
//! - [`config`]: Sink configuration and CLI arguments
//! - [`diagnostics`]: Failure reporting channel
//! - [`ingest`]: Newline-delimited JSON input for the `sqlog` binary
//! - [`observability`]: Tracing and Prometheus metrics
//! - [`record`]: Log records and levels
//! - [`routing`]: Destination table resolution
//! - [`serializer`]: Column rendering
//! - [`sink`]: Public entry point
//! - [`storage`]: Buffering, schema, statements and the batch writer

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::schema::SchemaManager is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::struct_excessive_bools,     // Config structs may have flags
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod diagnostics;
pub mod ingest;
pub mod observability;
pub mod record;
pub mod routing;
pub mod serializer;
pub mod sink;
pub mod storage;

pub use config::{ConfigError, EmptyValueStyle, SinkConfig};
pub use diagnostics::{CollectingDiagnostics, Diagnostic, DiagnosticKind, DiagnosticSink};
pub use record::{Level, LogRecord};
pub use sink::{SinkError, SqlSink};
pub use storage::writer::StatsSnapshot;
