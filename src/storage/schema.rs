//! Log table schema and connection setup.
//!
//! Tables are created lazily, the first time a resolved table name is used.
//! The default layout mirrors the columns the insert statement binds, plus
//! an autoincrement `id` and an ingestion time filled in by SQLite.

use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;

use super::writer::WriterStats;
use crate::config::TABLE_PLACEHOLDER;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::observability::metrics::record_table_ensured;
use crate::routing::TableName;

/// How long a connection waits on a locked database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply connection pragmas for the write path.
///
/// - WAL lets readers inspect log tables while batches commit
/// - foreign_keys so custom schemas can rely on constraint checks
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

/// Default `CREATE TABLE` template.
pub fn default_create_sql(include_template: bool) -> String {
    let template_column = if include_template {
        "\n    Template TEXT,"
    } else {
        ""
    };

    format!(
        r#"CREATE TABLE IF NOT EXISTS {TABLE_PLACEHOLDER} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    Timestamp TEXT,
    Level TEXT,{template_column}
    Message TEXT,
    Exception TEXT,
    Properties TEXT,
    _ts TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)"#
    )
}

/// Substitute the quoted table name into a SQL template.
pub fn render_template(template: &str, table: &TableName) -> String {
    template.replace(TABLE_PLACEHOLDER, &table.quoted())
}

/// Creates destination tables from a template.
pub struct SchemaManager {
    create_template: String,
    diagnostics: Arc<dyn DiagnosticSink>,
    stats: Arc<WriterStats>,
}

impl SchemaManager {
    pub fn new(
        create_template: String,
        diagnostics: Arc<dyn DiagnosticSink>,
        stats: Arc<WriterStats>,
    ) -> Self {
        Self {
            create_template,
            diagnostics,
            stats,
        }
    }

    /// Create the table if it does not exist.
    ///
    /// Errors are reported to the diagnostic sink and swallowed; inserts that
    /// follow will fail on their own if the table really is missing.
    /// Returns whether creation succeeded.
    pub fn ensure_table(&self, conn: &Connection, table: &TableName) -> bool {
        self.stats.record_schema_creation();
        record_table_ensured();

        match conn.execute_batch(&render_template(&self.create_template, table)) {
            Ok(()) => {
                tracing::info!(table = %table, "Ensured log table");
                true
            }
            Err(e) => {
                self.diagnostics.report(&Diagnostic {
                    kind: DiagnosticKind::Schema,
                    table: Some(table.to_string()),
                    records: 0,
                    message: e.to_string(),
                });
                false
            }
        }
    }
}
