//! Log records and severity levels.
//!
//! Records are immutable once emitted. They arrive fully formed from the
//! producer (or from the `ingest` reader) and are only read afterwards.

use chrono::{DateTime, FixedOffset, Local};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    /// Name stored in the `Level` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verbose => "Verbose",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(Self::Verbose),
            "debug" | "dbg" => Ok(Self::Debug),
            "information" | "info" => Ok(Self::Information),
            "warning" | "warn" => Ok(Self::Warning),
            "error" | "err" => Ok(Self::Error),
            "fatal" | "critical" => Ok(Self::Fatal),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// A single structured log event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogRecord {
    /// Emission time, with the producer's UTC offset.
    #[serde(default = "now")]
    pub timestamp: DateTime<FixedOffset>,
    pub level: Level,
    /// Message template, e.g. `"User {Name} logged in"`.
    #[serde(alias = "message")]
    pub template: String,
    /// Positional arguments for `{0}`, `{1}`, ...
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl LogRecord {
    /// Create a record stamped with the current local time.
    pub fn new(level: Level, template: impl Into<String>) -> Self {
        Self {
            timestamp: now(),
            level,
            template: template.into(),
            params: Vec::new(),
            exception: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }
}
