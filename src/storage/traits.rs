//! Storage trait definitions

use crate::graph::{Edge, Node, NodeKind, NodeRef, Relationship};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for querying nodes
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Filter by node kind
    pub kind: Option<NodeKind>,
    /// Case-insensitive substring match on the trimmed name
    pub name_contains: Option<String>,
    /// Substring match on a string property (key, needle), case-insensitive
    pub property_contains: Option<(String, String)>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_name_containing(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn with_property_containing(
        mut self,
        key: impl Into<String>,
        needle: impl Into<String>,
    ) -> Self {
        self.property_contains = Some((key.into(), needle.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a node satisfies the text predicates of this filter.
    pub fn matches(&self, node: &Node) -> bool {
        if let Some(kind) = self.kind {
            if node.kind != kind {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            match &node.name {
                Some(name) => {
                    if !contains_ignore_case(name, needle) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some((key, needle)) = &self.property_contains {
            match node.property(key).and_then(|v| v.as_str()) {
                Some(text) => {
                    if !contains_ignore_case(text, needle) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// Case-insensitive substring test, both sides trimmed.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .trim()
        .to_lowercase()
        .contains(&needle.trim().to_lowercase())
}

/// Per-kind node counts, in hierarchy order
pub type NodeCounts = Vec<(NodeKind, usize)>;

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync) so retrieval lookups
/// can run on blocking worker threads while the importer owns writes.
pub trait GraphStore: Send + Sync {
    // === Lifecycle ===

    /// Remove every node and edge
    fn clear(&self) -> StorageResult<()>;

    // === Node Operations ===

    /// Insert a node or overwrite the node with the same (kind, id)
    fn upsert_node(&self, node: &Node) -> StorageResult<()>;

    /// Load a node by reference
    fn load_node(&self, node_ref: NodeRef) -> StorageResult<Option<Node>>;

    /// Find nodes matching filter criteria, ordered by (kind, id)
    fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>>;

    /// Count nodes of one kind
    fn count_nodes(&self, kind: NodeKind) -> StorageResult<usize>;

    /// Rewrite every stored name through the key normalizer.
    ///
    /// Returns the number of names that changed.
    fn normalize_names(&self) -> StorageResult<usize>;

    // === Edge Operations ===

    /// Idempotent edge write keyed by (source, target, relationship).
    ///
    /// Returns `true` when the edge was created, `false` when it already
    /// existed; an existing edge keeps its original properties.
    fn upsert_edge(&self, edge: &Edge) -> StorageResult<bool>;

    /// Edges leaving a node, optionally restricted to one relationship
    fn edges_from(&self, node: NodeRef, relationship: Option<Relationship>)
        -> StorageResult<Vec<Edge>>;

    /// Edges arriving at a node, optionally restricted to one relationship
    fn edges_to(&self, node: NodeRef, relationship: Option<Relationship>)
        -> StorageResult<Vec<Edge>>;

    /// Count edges, optionally restricted to one relationship
    fn count_edges(&self, relationship: Option<Relationship>) -> StorageResult<usize>;

    // === Provided ===

    /// Counts for every imported kind.
    fn node_counts(&self) -> StorageResult<NodeCounts> {
        NodeKind::FMEA
            .iter()
            .map(|kind| Ok((*kind, self.count_nodes(*kind)?)))
            .collect()
    }

    /// Load the nodes at the far end of outgoing edges.
    fn targets(&self, node: NodeRef, relationship: Relationship) -> StorageResult<Vec<Node>> {
        let mut nodes = Vec::new();
        for edge in self.edges_from(node, Some(relationship))? {
            if let Some(target) = self.load_node(edge.target)? {
                nodes.push(target);
            }
        }
        Ok(nodes)
    }

    /// Load the nodes at the near end of incoming edges.
    fn sources(&self, node: NodeRef, relationship: Relationship) -> StorageResult<Vec<Node>> {
        let mut nodes = Vec::new();
        for edge in self.edges_to(node, Some(relationship))? {
            if let Some(source) = self.load_node(edge.source)? {
                nodes.push(source);
            }
        }
        Ok(nodes)
    }

    /// Measures attached to a (cause, mode) pair: `(preventive, detective)`.
    ///
    /// Preventive measures belong to the cause. A detective measure counts
    /// only when it also points at `mode` through `improvesDetectionFor`.
    fn measures_for_pair(
        &self,
        cause: NodeRef,
        mode: NodeRef,
    ) -> StorageResult<(Vec<Node>, Vec<Node>)> {
        let preventive = self.targets(cause, Relationship::IsImprovedByPreventiveMeasure)?;
        let mut detective = Vec::new();
        for measure in self.targets(cause, Relationship::IsImprovedByDetectiveMeasure)? {
            let scoped = self
                .edges_from(measure.node_ref(), Some(Relationship::ImprovesDetectionFor))?
                .iter()
                .any(|edge| edge.target == mode);
            if scoped {
                detective.push(measure);
            }
        }
        Ok((preventive, detective))
    }
}

/// Storage backends that can be opened from a path or in memory.
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
