//! Destination table resolution.
//!
//! A table name is either static (`Logs`) or a date pattern with a single
//! strftime segment (`Logs_{%Y%m%d}`), which rotates tables per calendar date
//! of the record's own offset.
//!
//! Table names end up inside SQL text, so every resolved name is restricted
//! to `[A-Za-z0-9_-]` and always emitted as a quoted identifier.

use chrono::format::{Item, Pad, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use std::fmt::{self, Write};

use crate::config::ConfigError;

/// Date format used by an empty `{}` segment.
pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";

/// Table used when a pattern renders an unusable name and has no literal part.
const FALLBACK_TABLE: &str = "Logs";

/// A validated destination table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName(String);

impl TableName {
    /// Validate a table name.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if is_safe_identifier(&name) {
            Ok(Self(name))
        } else {
            Err(ConfigError::InvalidTableName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a double-quoted SQL identifier.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Resolves the destination table for a record timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRouter {
    Static(TableName),
    Daily {
        prefix: String,
        format: String,
        suffix: String,
        /// Used for dates the format cannot render safely (e.g. years past 9999).
        fallback: TableName,
    },
}

impl TableRouter {
    /// Build a router from a configured table name or pattern.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let Some(open) = pattern.find('{') else {
            return TableName::new(pattern).map(Self::Static);
        };

        let invalid = |reason: &str| ConfigError::InvalidTablePattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let close = pattern[open..]
            .find('}')
            .map(|i| open + i)
            .ok_or_else(|| invalid("unterminated '{'"))?;

        let prefix = &pattern[..open];
        let format = &pattern[open + 1..close];
        let suffix = &pattern[close + 1..];

        if suffix.contains(['{', '}']) || prefix.contains('}') {
            return Err(invalid("only one {...} date segment is allowed"));
        }

        let format = if format.is_empty() {
            DEFAULT_DATE_FORMAT
        } else {
            format
        };

        for item in StrftimeItems::new(format) {
            match item {
                Item::Error => return Err(invalid("date segment is not a valid strftime format")),
                // `%e`, `%k`, `%_m` and friends pad with spaces on some dates only.
                Item::Space(_) | Item::OwnedSpace(_) | Item::Numeric(_, Pad::Space) => {
                    return Err(invalid("date segment renders spaces"));
                }
                _ => {}
            }
        }

        let fallback = TableName::new(format!("{prefix}{suffix}"))
            .or_else(|_| TableName::new(FALLBACK_TABLE))?;

        let router = Self::Daily {
            prefix: prefix.to_string(),
            format: format.to_string(),
            suffix: suffix.to_string(),
            fallback,
        };

        // Free-text and time-of-day items can leak colons or other symbols
        // into SQL, so render a few dates with different digit widths.
        for (y, m, d) in [(2024, 12, 31), (2024, 1, 5), (2000, 2, 29)] {
            let sample = NaiveDate::from_ymd_opt(y, m, d)
                .and_then(|d| d.and_hms_opt(23, 59, 59))
                .map(|dt| dt.and_utc().fixed_offset())
                .ok_or_else(|| invalid("cannot build sample date"))?;
            let rendered = router
                .render(&sample)
                .map_err(|_| invalid("date segment cannot be rendered from a date"))?;
            if !is_safe_identifier(&rendered) {
                return Err(invalid(&format!("renders unsafe table name {rendered:?}")));
            }
        }

        Ok(router)
    }

    /// Resolve the table name for a record timestamp.
    pub fn resolve(&self, timestamp: &DateTime<FixedOffset>) -> TableName {
        match self {
            Self::Static(name) => name.clone(),
            Self::Daily { fallback, .. } => match self.render(timestamp) {
                Ok(name) if is_safe_identifier(&name) => TableName(name),
                _ => fallback.clone(),
            },
        }
    }

    /// The fixed table name, if this router never rotates.
    pub fn static_table(&self) -> Option<&TableName> {
        match self {
            Self::Static(name) => Some(name),
            Self::Daily { .. } => None,
        }
    }

    fn render(&self, timestamp: &DateTime<FixedOffset>) -> Result<String, fmt::Error> {
        match self {
            Self::Static(name) => Ok(name.0.clone()),
            Self::Daily {
                prefix,
                format,
                suffix,
                ..
            } => {
                // Midnight of the record's local date pins the name to the
                // calendar day; time-of-day items render as zeros.
                let day = timestamp.date_naive().and_time(NaiveTime::MIN);
                let mut name = String::with_capacity(prefix.len() + suffix.len() + 8);
                name.push_str(prefix);
                write!(name, "{}", day.format(format))?;
                name.push_str(suffix);
                Ok(name)
            }
        }
    }
}
