//! Configuration for the sink and the `sqlog` binary.
//!
//! Supports:
//! - [`SinkConfig`] for embedding the sink as a library
//! - CLI arguments via clap, with `SQLOG_*` environment overrides
//! - Validation of the construction-time invariants

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::record::Level;
use crate::storage::statements::check_insert_parameters;

/// Smallest accepted batch size.
pub const MIN_BATCH_SIZE: usize = 1;
/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 1000;
/// Placeholder substituted with the quoted table name in SQL templates.
pub const TABLE_PLACEHOLDER: &str = "{table}";

/// Errors raised while constructing a sink. Fatal to sink creation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("connection string must not be empty")]
    EmptyConnectionString,

    #[error("batch size must be between 1 and 1000 inclusive, got {0}")]
    BatchSizeOutOfRange(usize),

    #[error("invalid table name {0:?}: only ASCII letters, digits, '_' and '-' are allowed")]
    InvalidTableName(String),

    #[error("invalid table name pattern {pattern:?}: {reason}")]
    InvalidTablePattern { pattern: String, reason: String },

    #[error("custom {0} template must contain the {{table}} placeholder")]
    MissingTablePlaceholder(&'static str),

    #[error("insert template uses unknown parameter {0:?}; expected :ts, :level, :template, :msg, :ex or :prop")]
    UnknownInsertParameter(String),

    #[error("insert template binds none of :ts, :level, :template, :msg, :ex, :prop")]
    NoInsertParameters,
}

/// How absent exceptions and empty property maps are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum EmptyValueStyle {
    /// Empty properties become `{}`, a missing exception becomes `""`.
    #[default]
    Json,
    /// Empty properties become `""`, a missing exception becomes NULL.
    Null,
}

/// Sink configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// SQLite database path or `file:` URI.
    pub connection_string: String,
    /// Static table name, or a date pattern such as `Logs_{%Y%m%d}`.
    pub table_name: String,
    pub store_timestamp_in_utc: bool,
    /// Records per batch, fixed for the sink's lifetime.
    pub batch_size: usize,
    /// Custom insert statement; must reference `{table}`.
    pub insert_sql: Option<String>,
    /// Custom table creation statement; must reference `{table}`.
    pub create_table_sql: Option<String>,
    /// Store the raw message template next to the rendered message.
    pub include_template: bool,
    pub empty_values: EmptyValueStyle,
    /// Flush a partial batch once its oldest record is this old.
    pub flush_interval: Option<Duration>,
    /// How long a flush waits for a database connection.
    pub connect_timeout: Duration,
}

impl SinkConfig {
    /// Create a configuration with defaults for everything but the connection string.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Check the invariants that must hold before a sink is created.
    ///
    /// Table name syntax is checked separately by the router.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::EmptyConnectionString);
        }

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::BatchSizeOutOfRange(self.batch_size));
        }

        if let Some(sql) = &self.insert_sql {
            if !sql.contains(TABLE_PLACEHOLDER) {
                return Err(ConfigError::MissingTablePlaceholder("insert"));
            }
            check_insert_parameters(sql)?;
        }

        if let Some(sql) = &self.create_table_sql {
            if !sql.contains(TABLE_PLACEHOLDER) {
                return Err(ConfigError::MissingTablePlaceholder("create table"));
            }
        }

        Ok(())
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            table_name: "Logs".into(),
            store_timestamp_in_utc: false,
            batch_size: 100,
            insert_sql: None,
            create_table_sql: None,
            include_template: true,
            empty_values: EmptyValueStyle::Json,
            flush_interval: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Output format for the binary's own logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Sqlog: batch newline-delimited JSON log records into SQLite.
#[derive(Parser, Debug, Clone)]
#[command(name = "sqlog")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// SQLite database path or file: URI
    #[arg(short, long, env = "SQLOG_DATABASE")]
    pub database: String,

    /// Table name, or a date pattern such as Logs_{%Y%m%d}
    #[arg(short, long, env = "SQLOG_TABLE", default_value = "Logs")]
    pub table: String,

    /// Records per transaction (1-1000)
    #[arg(short, long, env = "SQLOG_BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Store timestamps converted to UTC
    #[arg(long, env = "SQLOG_UTC")]
    pub utc: bool,

    /// Flush partial batches after this many milliseconds (0 disables)
    #[arg(long, env = "SQLOG_FLUSH_INTERVAL_MS", default_value_t = 2000)]
    pub flush_interval_ms: u64,

    /// Connection checkout timeout in milliseconds
    #[arg(long, env = "SQLOG_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Drop records below this level before they reach the sink
    #[arg(long, env = "SQLOG_MIN_LEVEL", default_value = "verbose")]
    pub min_level: Level,

    /// Do not store the raw message template
    #[arg(long, env = "SQLOG_NO_TEMPLATE")]
    pub no_template: bool,

    /// Encoding of empty properties and missing exceptions
    #[arg(long, env = "SQLOG_EMPTY_VALUES", value_enum, default_value_t = EmptyValueStyle::Json)]
    pub empty_values: EmptyValueStyle,

    /// File containing a custom insert statement
    #[arg(long, env = "SQLOG_INSERT_SQL_FILE")]
    pub insert_sql_file: Option<PathBuf>,

    /// File containing a custom create table statement
    #[arg(long, env = "SQLOG_CREATE_SQL_FILE")]
    pub create_sql_file: Option<PathBuf>,

    /// Read records from this file instead of stdin
    #[arg(short, long, env = "SQLOG_INPUT")]
    pub input: Option<PathBuf>,

    /// Log level for sqlog's own diagnostics (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Format of sqlog's own diagnostics
    #[arg(long, env = "SQLOG_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "SQLOG_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the sink configuration, reading custom SQL templates from disk.
    pub fn sink_config(&self) -> std::io::Result<SinkConfig> {
        let insert_sql = self
            .insert_sql_file
            .as_ref()
            .map(std::fs::read_to_string)
            .transpose()?;
        let create_table_sql = self
            .create_sql_file
            .as_ref()
            .map(std::fs::read_to_string)
            .transpose()?;

        Ok(SinkConfig {
            connection_string: self.database.clone(),
            table_name: self.table.clone(),
            store_timestamp_in_utc: self.utc,
            batch_size: self.batch_size,
            insert_sql,
            create_table_sql,
            include_template: !self.no_template,
            empty_values: self.empty_values,
            flush_interval: (self.flush_interval_ms > 0)
                .then(|| Duration::from_millis(self.flush_interval_ms)),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        })
    }
}
