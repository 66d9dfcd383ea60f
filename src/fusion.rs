//! Context fusion: one blob from the structural and semantic collections

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Retrieved context tagged by source, structural first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBlob {
    pub graph: Vec<Value>,
    pub vector: Vec<Value>,
}

impl ContextBlob {
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty() && self.vector.is_empty()
    }
}

/// Concatenate both collections without cross-source dedup.
pub fn fuse<A: Serialize, B: Serialize>(structural: &[A], semantic: &[B]) -> ContextBlob {
    fn values<T: Serialize>(items: &[T]) -> Vec<Value> {
        items
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect()
    }
    ContextBlob {
        graph: values(structural),
        vector: values(semantic),
    }
}

impl fmt::Display for ContextBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = serde_json::to_string_pretty(&self.graph).map_err(|_| fmt::Error)?;
        let vector = serde_json::to_string_pretty(&self.vector).map_err(|_| fmt::Error)?;
        write!(
            f,
            "=== GRAPH QUERY DATA ===\n{graph}\n\n=== VECTOR QUERY DATA ===\n{vector}"
        )
    }
}
