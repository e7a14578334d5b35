//! Rendering of a record into its stored column values.
//!
//! None of these operations can fail: unresolvable placeholders are kept
//! verbatim and property maps always produce a JSON object.

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::EmptyValueStyle;
use crate::record::LogRecord;

/// Stored timestamp layout, e.g. `2024-05-01 13:45:10.123+02:00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f%:z";

/// Column values for one record, ready for binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub timestamp: String,
    pub level: &'static str,
    pub template: String,
    pub message: String,
    pub exception: Option<String>,
    pub properties: String,
}

/// Turns records into [`Row`]s according to the sink configuration.
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    store_utc: bool,
    empty_values: EmptyValueStyle,
}

impl Serializer {
    pub fn new(store_utc: bool, empty_values: EmptyValueStyle) -> Self {
        Self {
            store_utc,
            empty_values,
        }
    }

    pub fn row(&self, record: &LogRecord) -> Row {
        let properties = if record.properties.is_empty() && self.empty_values == EmptyValueStyle::Null
        {
            String::new()
        } else {
            serialize_properties(&record.properties)
        };

        let exception = match self.empty_values {
            EmptyValueStyle::Json => Some(stringify_exception(record.exception.as_deref())),
            EmptyValueStyle::Null => record.exception.clone(),
        };

        Row {
            timestamp: format_timestamp(&record.timestamp, self.store_utc),
            level: record.level.as_str(),
            template: record.template.clone(),
            message: render_message(&record.template, &record.params, &record.properties),
            exception,
            properties,
        }
    }
}

/// Substitute `{Name}` and `{0}` placeholders in a message template.
///
/// Capture hints (`@`, `$`), alignment and format suffixes are accepted and
/// ignored. `{{` and `}}` produce literal braces.
pub fn render_message(
    template: &str,
    params: &[Value],
    properties: &BTreeMap<String, Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let Some(end) = tail.find('}') else {
            // Unterminated placeholder
            out.push_str(tail);
            return out;
        };

        let token = &tail[..=end];
        match resolve(&tail[1..end], params, properties) {
            Some(value) => render_value(value, &mut out),
            None => out.push_str(token),
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    out
}

fn resolve<'a>(
    token: &str,
    params: &'a [Value],
    properties: &'a BTreeMap<String, Value>,
) -> Option<&'a Value> {
    let name = token.trim_start_matches(['@', '$']);
    let name = name.split([',', ':']).next().unwrap_or_default();

    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    if let Ok(index) = name.parse::<usize>() {
        if let Some(value) = params.get(index) {
            return Some(value);
        }
    }

    properties.get(name)
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

/// Format a timestamp, converting to UTC first when `use_utc` is set.
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>, use_utc: bool) -> String {
    if use_utc {
        timestamp
            .with_timezone(&Utc)
            .fixed_offset()
            .format(TIMESTAMP_FORMAT)
            .to_string()
    } else {
        timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Serialize a property map to a JSON object. An empty map yields `{}`.
pub fn serialize_properties(properties: &BTreeMap<String, Value>) -> String {
    serde_json::to_string(properties).unwrap_or_else(|_| "{}".to_string())
}

/// Text of an exception, or an empty string when there is none.
pub fn stringify_exception(exception: Option<&str>) -> String {
    exception.unwrap_or_default().to_string()
}
