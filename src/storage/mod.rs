//! Storage backends for the FMEA graph
//!
//! Import, embedding materialization and retrieval all talk to the graph
//! through the `GraphStore` trait. The primary implementation is
//! `SqliteStore` for persistent storage.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    contains_ignore_case, GraphStore, NodeCounts, NodeFilter, OpenStore, StorageError,
    StorageResult,
};
