//! Core graph data structures

mod edge;
mod node;

#[cfg(test)]
mod tests;

pub use edge::{Edge, Relationship};
pub use node::{props, MeasureKind, Node, NodeKind, NodeRef, Properties, PropertyValue};

/// A name that does not map onto a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}
