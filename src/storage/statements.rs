//! Insert statement cache keyed by destination table.
//!
//! Building an entry for a table also ensures that table exists, so each
//! table sees one schema call per process lifetime (unless invalidated).
//! Lookups take a read lock; builds are serialized behind a separate mutex
//! and re-check the map, so racing first uses create the schema only once.

use rusqlite::types::ToSql;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::schema::{render_template, SchemaManager};
use crate::config::{ConfigError, TABLE_PLACEHOLDER};
use crate::routing::TableName;
use crate::serializer::Row;

/// A named parameter the insert statement may bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Timestamp,
    Level,
    Template,
    Message,
    Exception,
    Properties,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::Timestamp,
        Slot::Level,
        Slot::Template,
        Slot::Message,
        Slot::Exception,
        Slot::Properties,
    ];

    /// Parameter name as written in SQL.
    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Timestamp => ":ts",
            Self::Level => ":level",
            Self::Template => ":template",
            Self::Message => ":msg",
            Self::Exception => ":ex",
            Self::Properties => ":prop",
        }
    }

    /// The row value bound to this slot.
    pub fn value(self, row: &Row) -> &dyn ToSql {
        match self {
            Self::Timestamp => &row.timestamp,
            Self::Level => &row.level,
            Self::Template => &row.template,
            Self::Message => &row.message,
            Self::Exception => &row.exception,
            Self::Properties => &row.properties,
        }
    }

    /// Byte offset of this parameter in `sql`, if present.
    fn position_in(self, sql: &str) -> Option<usize> {
        let name = self.placeholder();
        sql.match_indices(name).map(|(i, _)| i).find(|&i| {
            sql[i + name.len()..]
                .chars()
                .next()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
        })
    }
}

/// Check that every parameter in an insert template is a known slot and that
/// at least one slot is bound.
///
/// Parameters SQLite would accept but nothing binds (`?`, `@ts`, `:other`)
/// would silently insert NULLs.
pub fn check_insert_parameters(template: &str) -> Result<(), ConfigError> {
    let mut known = 0;
    for param in sql_parameters(template) {
        if Slot::ALL.iter().any(|slot| slot.placeholder() == param) {
            known += 1;
        } else {
            return Err(ConfigError::UnknownInsertParameter(param.to_string()));
        }
    }

    if known == 0 {
        return Err(ConfigError::NoInsertParameters);
    }
    Ok(())
}

/// Parameter tokens in `sql`, skipping quoted strings and identifiers.
fn sql_parameters(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut params = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'?' | b':' | b'@' | b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                params.push(&sql[start..i]);
            }
            _ => i += 1,
        }
    }

    params
}

/// Default insert template.
pub fn default_insert_sql(include_template: bool) -> String {
    if include_template {
        format!(
            "INSERT INTO {TABLE_PLACEHOLDER} (Timestamp, Level, Template, Message, Exception, Properties) \
             VALUES (:ts, :level, :template, :msg, :ex, :prop)"
        )
    } else {
        format!(
            "INSERT INTO {TABLE_PLACEHOLDER} (Timestamp, Level, Message, Exception, Properties) \
             VALUES (:ts, :level, :msg, :ex, :prop)"
        )
    }
}

/// Insert statement text for one table, with its bound slots in SQL order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: TableName,
    pub sql: String,
    pub slots: Vec<Slot>,
}

impl InsertStatement {
    pub fn build(template: &str, table: TableName) -> Self {
        let sql = render_template(template, &table);

        let mut positioned: Vec<(usize, Slot)> = Slot::ALL
            .iter()
            .filter_map(|slot| slot.position_in(&sql).map(|pos| (pos, *slot)))
            .collect();
        positioned.sort_by_key(|(pos, _)| *pos);

        Self {
            table,
            sql,
            slots: positioned.into_iter().map(|(_, slot)| slot).collect(),
        }
    }

    /// Named parameters for one row, in slot order.
    pub fn params<'a>(&self, row: &'a Row) -> Vec<(&'static str, &'a dyn ToSql)> {
        self.slots
            .iter()
            .map(|slot| (slot.placeholder(), slot.value(row)))
            .collect()
    }
}

/// Write-once cache of insert statements per table.
pub struct StatementCache {
    entries: RwLock<HashMap<TableName, Arc<InsertStatement>>>,
    build_lock: Mutex<()>,
    insert_template: String,
    schema: SchemaManager,
}

impl StatementCache {
    pub fn new(insert_template: String, schema: SchemaManager) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
            insert_template,
            schema,
        }
    }

    /// Fetch the statement for `table`, building it (and ensuring the table)
    /// on first use.
    ///
    /// Returns the statement and whether this call built it.
    pub fn get_or_build(&self, conn: &Connection, table: &TableName) -> (Arc<InsertStatement>, bool) {
        if let Some(stmt) = self.lookup(table) {
            return (stmt, false);
        }

        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stmt) = self.lookup(table) {
            return (stmt, false);
        }

        let stmt = Arc::new(InsertStatement::build(&self.insert_template, table.clone()));
        self.schema.ensure_table(conn, table);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.clone(), stmt.clone());

        (stmt, true)
    }

    /// Forget a table, so its next use ensures the schema again.
    pub fn invalidate(&self, table: &TableName) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table)
            .is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, table: &TableName) -> bool {
        self.lookup(table).is_some()
    }

    fn lookup(&self, table: &TableName) -> Option<Arc<InsertStatement>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }
}
