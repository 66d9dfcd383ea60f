//! Typed, directed edges between FMEA nodes

use super::node::{MeasureKind, NodeRef, Properties, PropertyValue};
use super::UnknownVariant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Relationship types, serialized under their graph wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relationship {
    #[serde(rename = "hasSubsystem")]
    HasSubsystem,
    #[serde(rename = "hasSystemElement")]
    HasSystemElement,
    #[serde(rename = "hasFunction")]
    HasFunction,
    #[serde(rename = "hasFailureMode")]
    HasFailureMode,
    #[serde(rename = "resultsInFailureEffect")]
    ResultsInFailureEffect,
    /// Carries `detection_rating` for the (mode, cause) pair
    #[serde(rename = "isDueToFailureCause")]
    IsDueToFailureCause,
    #[serde(rename = "isImprovedByPreventiveMeasure")]
    IsImprovedByPreventiveMeasure,
    #[serde(rename = "isImprovedByDetectiveMeasure")]
    IsImprovedByDetectiveMeasure,
    /// Measure → FailureMode, scopes a detective measure to one mode
    #[serde(rename = "improvesDetectionFor")]
    ImprovesDetectionFor,
    #[serde(rename = "HAS_EMBEDDING")]
    HasEmbedding,
}

impl Relationship {
    const ALL: [Relationship; 10] = [
        Relationship::HasSubsystem,
        Relationship::HasSystemElement,
        Relationship::HasFunction,
        Relationship::HasFailureMode,
        Relationship::ResultsInFailureEffect,
        Relationship::IsDueToFailureCause,
        Relationship::IsImprovedByPreventiveMeasure,
        Relationship::IsImprovedByDetectiveMeasure,
        Relationship::ImprovesDetectionFor,
        Relationship::HasEmbedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::HasSubsystem => "hasSubsystem",
            Relationship::HasSystemElement => "hasSystemElement",
            Relationship::HasFunction => "hasFunction",
            Relationship::HasFailureMode => "hasFailureMode",
            Relationship::ResultsInFailureEffect => "resultsInFailureEffect",
            Relationship::IsDueToFailureCause => "isDueToFailureCause",
            Relationship::IsImprovedByPreventiveMeasure => "isImprovedByPreventiveMeasure",
            Relationship::IsImprovedByDetectiveMeasure => "isImprovedByDetectiveMeasure",
            Relationship::ImprovesDetectionFor => "improvesDetectionFor",
            Relationship::HasEmbedding => "HAS_EMBEDDING",
        }
    }

    /// Cause → Measure relationship for a measure kind.
    pub fn improved_by(kind: MeasureKind) -> Self {
        match kind {
            MeasureKind::Preventive => Relationship::IsImprovedByPreventiveMeasure,
            MeasureKind::Detective => Relationship::IsImprovedByDetectiveMeasure,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relationship::ALL
            .iter()
            .find(|rel| rel.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownVariant::new("relationship", s))
    }
}

/// A directed edge. Identity is `(source, target, relationship)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeRef,
    pub target: NodeRef,
    pub relationship: Relationship,
    pub properties: Properties,
}

impl Edge {
    pub fn new(source: NodeRef, target: NodeRef, relationship: Relationship) -> Self {
        Self {
            source,
            target,
            relationship,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_optional_property(self, key: &str, value: Option<PropertyValue>) -> Self {
        match value {
            Some(v) => self.with_property(key, v),
            None => self,
        }
    }

    pub fn int_property(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(PropertyValue::as_int)
    }
}
