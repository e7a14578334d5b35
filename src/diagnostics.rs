//! Failure reporting for the write path.
//!
//! Runtime failures never reach producers; they are handed to a
//! [`DiagnosticSink`] supplied at construction. Implementations must not
//! panic and should return quickly, since they run on the flush thread.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Stage of the write path that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// No connection could be opened; the batch was dropped.
    Connection,
    /// Table creation failed; inserts were attempted anyway.
    Schema,
    /// An insert or the commit failed; the batch was rolled back and dropped.
    Write,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::Schema => "schema",
            Self::Write => "write",
        })
    }
}

/// A single failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Table involved, when the failure is tied to one.
    pub table: Option<String>,
    /// Records lost with this failure (0 for schema errors).
    pub records: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.kind)?;
        if let Some(table) = &self.table {
            write!(f, " on {table}")?;
        }
        if self.records > 0 {
            write!(f, " ({} records dropped)", self.records)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Receiver of best-effort error reports.
///
/// Write and schema reports arrive on the flush thread. Calling
/// [`SqlSink::flush`](crate::SqlSink::flush) from `report` queues pending
/// records but does not wait for them.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn report(&self, diagnostic: &Diagnostic) {
        self(diagnostic);
    }
}

/// Reports diagnostics as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn report(&self, diagnostic: &Diagnostic) {
        match diagnostic.kind {
            DiagnosticKind::Schema => tracing::warn!(
                table = diagnostic.table.as_deref(),
                error = %diagnostic.message,
                "Failed to ensure log table"
            ),
            DiagnosticKind::Connection | DiagnosticKind::Write => tracing::error!(
                kind = %diagnostic.kind,
                table = diagnostic.table.as_deref(),
                records = diagnostic.records,
                error = %diagnostic.message,
                "Dropped log batch"
            ),
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    reports: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all reports received so far.
    pub fn reports(&self) -> Vec<Diagnostic> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| d.kind == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for CollectingDiagnostics {
    fn report(&self, diagnostic: &Diagnostic) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
    }
}
