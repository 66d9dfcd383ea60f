//! Tabular FMEA import
//!
//! Turns flat analysis records into a deduplicated hierarchical graph.
//! Node identity comes from composite natural keys (the element a failure
//! lives in plus its normalized name), so a failure mode repeated across
//! rows and functions collapses to one node with several incoming edges.
//!
//! The importer owns all dedup state; nothing is global. Each `run` clears
//! the store and starts counting ids from 1 again.

mod importer;
mod record;

pub use importer::{GraphImporter, ImportState, RecordOutcome, Resolution};
pub use record::{read_records, read_records_from, ImportRecord};

use crate::graph::NodeKind;
use crate::storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Errors that abort an import run.
///
/// Individual bad rows never surface here; they become `SkippedRow`s.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing column in header: {0}")]
    MissingColumn(String),
}

pub type ImportResult<T> = Result<T, ImportError>;

/// A row that was not imported, with its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

/// Outcome of a full import run
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub rows_read: usize,
    pub rows_imported: usize,
    pub skipped: Vec<SkippedRow>,
    /// Nodes created per kind, hierarchy order
    pub created: Vec<(NodeKind, i64)>,
    pub edges_created: usize,
    pub names_normalized: usize,
}

impl ImportSummary {
    pub fn created_of(&self, kind: NodeKind) -> i64 {
        self.created
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rows: {} read, {} imported, {} skipped",
            self.rows_read,
            self.rows_imported,
            self.skipped.len()
        )?;
        for (kind, count) in &self.created {
            writeln!(f, "  {:<14} {}", kind.as_str(), count)?;
        }
        write!(f, "  {:<14} {}", "edges", self.edges_created)
    }
}
