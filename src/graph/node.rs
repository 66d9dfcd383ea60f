//! Node representation in the FMEA knowledge graph

use super::UnknownVariant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Node types of the FMEA domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Product,
    Subsystem,
    SystemElement,
    Function,
    FailureMode,
    FailureCause,
    FailureEffect,
    Measure,
    /// Derived narrative summary of one failure mode context
    VectorEmbedding,
}

impl NodeKind {
    /// Every kind produced by the tabular import, hierarchy first.
    pub const FMEA: [NodeKind; 8] = [
        NodeKind::Product,
        NodeKind::Subsystem,
        NodeKind::SystemElement,
        NodeKind::Function,
        NodeKind::FailureMode,
        NodeKind::FailureCause,
        NodeKind::FailureEffect,
        NodeKind::Measure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Product => "Product",
            NodeKind::Subsystem => "Subsystem",
            NodeKind::SystemElement => "SystemElement",
            NodeKind::Function => "Function",
            NodeKind::FailureMode => "FailureMode",
            NodeKind::FailureCause => "FailureCause",
            NodeKind::FailureEffect => "FailureEffect",
            NodeKind::Measure => "Measure",
            NodeKind::VectorEmbedding => "VectorEmbedding",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::FMEA
            .iter()
            .chain(std::iter::once(&NodeKind::VectorEmbedding))
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownVariant::new("node kind", s))
    }
}

/// Whether a measure lowers occurrence or improves detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureKind {
    Preventive,
    Detective,
}

impl MeasureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureKind::Preventive => "preventive",
            MeasureKind::Detective => "detective",
        }
    }

    /// Lenient parse used for tabular input: case-insensitive, trimmed.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "preventive" => Some(MeasureKind::Preventive),
            "detective" => Some(MeasureKind::Detective),
            _ => None,
        }
    }
}

impl fmt::Display for MeasureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable reference to a node: its kind plus the per-kind integer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: i64,
}

impl NodeRef {
    pub fn new(kind: NodeKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Typed property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<PropertyValue>),
    Object(HashMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

/// Properties collection
pub type Properties = HashMap<String, PropertyValue>;

/// Well-known property keys
pub mod props {
    pub const SEVERITY_RATING: &str = "severity_rating";
    pub const OCCURRENCE_RATING: &str = "occurrence_rating";
    pub const DETECTION_RATING: &str = "detection_rating";
    /// Measure kind, stored as "preventive" or "detective"
    pub const MEASURE_TYPE: &str = "type";
    pub const TEXT_CHUNK: &str = "text_chunk";
    pub const FAILURE_MODE_ID: &str = "failure_mode_id";
}

/// A node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Unique within `kind`, allocated from 1 by the importer
    pub id: i64,
    /// Normalized display name; absent for derived nodes
    pub name: Option<String>,
    /// Kind-specific properties (ratings, measure type, text chunk)
    pub properties: Properties,
}

impl Node {
    pub fn new(kind: NodeKind, id: i64, name: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            name: Some(name.into()),
            properties: HashMap::new(),
        }
    }

    /// A node without a display name (e.g. `VectorEmbedding`).
    pub fn unnamed(kind: NodeKind, id: i64) -> Self {
        Self {
            kind,
            id,
            name: None,
            properties: HashMap::new(),
        }
    }

    /// Add a property to the node
    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Add a property only when a value is present
    pub fn with_optional_property(self, key: &str, value: Option<PropertyValue>) -> Self {
        match value {
            Some(v) => self.with_property(key, v),
            None => self,
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.kind, self.id)
    }

    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn int_property(&self, key: &str) -> Option<i64> {
        self.property(key).and_then(PropertyValue::as_int)
    }

    /// Kind of a `Measure` node, read from its `type` property.
    pub fn measure_kind(&self) -> Option<MeasureKind> {
        self.property(props::MEASURE_TYPE)
            .and_then(PropertyValue::as_str)
            .and_then(MeasureKind::parse)
    }
}
