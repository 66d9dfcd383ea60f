//! Composite-key dedup and idempotent graph writes

use super::{ImportRecord, ImportResult, ImportSummary, SkippedRow};
use crate::graph::{props, Edge, MeasureKind, Node, NodeKind, NodeRef, PropertyValue, Relationship};
use crate::normalize::normalize;
use crate::storage::GraphStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Separator between composite key components.
///
/// [`normalize`] turns every control character into a space, so no name
/// component can contain the separator.
const KEY_SEP: char = '\u{1f}';

fn composite_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEP);
        }
        key.push_str(part);
    }
    key
}

/// Result of resolving a composite key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: i64,
    /// `true` when the id was allocated by this call
    pub created: bool,
}

/// Per-kind id counters and key→id maps for one import run.
#[derive(Debug, Default)]
pub struct ImportState {
    counters: HashMap<NodeKind, i64>,
    keys: HashMap<(NodeKind, String), i64>,
}

impl ImportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.counters.clear();
        self.keys.clear();
    }

    /// Return the id for `key`, allocating the next one for `kind` if unseen.
    pub fn resolve(&mut self, kind: NodeKind, key: &str) -> Resolution {
        if let Some(id) = self.keys.get(&(kind, key.to_string())) {
            return Resolution {
                id: *id,
                created: false,
            };
        }
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        let id = *counter;
        self.keys.insert((kind, key.to_string()), id);
        Resolution { id, created: true }
    }

    pub fn lookup(&self, kind: NodeKind, key: &str) -> Option<i64> {
        self.keys.get(&(kind, key.to_string())).copied()
    }

    /// Number of ids allocated for a kind so far
    pub fn allocated(&self, kind: NodeKind) -> i64 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }
}

/// What happened to one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Imported {
        nodes_created: usize,
        edges_created: usize,
    },
    Skipped(String),
}

/// The seven mandatory names, normalized.
struct Names {
    product: String,
    subsystem: String,
    system_element: String,
    function: String,
    failure_mode: String,
    failure_cause: String,
    failure_effect: String,
}

impl Names {
    fn from_record(record: &ImportRecord) -> Result<Self, String> {
        let field = |value: &Option<String>, name: &str| -> Result<String, String> {
            value
                .as_deref()
                .map(normalize)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("missing {}", name))
        };
        Ok(Self {
            product: field(&record.product, "product")?,
            subsystem: field(&record.subsystem, "subsystem")?,
            system_element: field(&record.system_element, "system_element")?,
            function: field(&record.function, "function")?,
            failure_mode: field(&record.failure_mode, "failure_mode")?,
            failure_cause: field(&record.failure_cause, "failure_cause")?,
            failure_effect: field(&record.failure_effect, "failure_effect")?,
        })
    }
}

/// Builds the FMEA graph from flat records.
pub struct GraphImporter {
    store: Arc<dyn GraphStore>,
    state: ImportState,
}

impl GraphImporter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            state: ImportState::new(),
        }
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    /// Rebuild the graph from `records`.
    ///
    /// Clears the store, resets dedup state, imports every record and runs
    /// the name normalization pass.
    pub fn run<I>(&mut self, records: I) -> ImportResult<ImportSummary>
    where
        I: IntoIterator<Item = ImportRecord>,
    {
        self.store.clear()?;
        self.state.reset();

        let mut summary = ImportSummary::default();
        for (index, record) in records.into_iter().enumerate() {
            summary.rows_read += 1;
            match self.import_record(&record)? {
                RecordOutcome::Imported { edges_created, .. } => {
                    summary.rows_imported += 1;
                    summary.edges_created += edges_created;
                }
                RecordOutcome::Skipped(reason) => {
                    warn!(row = index + 1, %reason, "skipping import row");
                    summary.skipped.push(SkippedRow {
                        row: index + 1,
                        reason,
                    });
                }
            }
            if summary.rows_read % 1000 == 0 {
                debug!(rows = summary.rows_read, "import progress");
            }
        }

        summary.names_normalized = self.store.normalize_names()?;
        summary.created = NodeKind::FMEA
            .iter()
            .map(|kind| (*kind, self.state.allocated(*kind)))
            .collect();

        info!(
            rows = summary.rows_read,
            imported = summary.rows_imported,
            skipped = summary.skipped.len(),
            edges = summary.edges_created,
            "import complete"
        );
        Ok(summary)
    }

    /// Import a single record against the current dedup state.
    pub fn import_record(&mut self, record: &ImportRecord) -> ImportResult<RecordOutcome> {
        let names = match Names::from_record(record) {
            Ok(names) => names,
            Err(reason) => return Ok(RecordOutcome::Skipped(reason)),
        };
        let mut writes = Writes::default();

        // Hierarchy
        let product_key = composite_key(&[&names.product]);
        let product = self.node(&mut writes, NodeKind::Product, &product_key, &names.product, |n| n)?;

        let subsystem_key = composite_key(&[&product_key, &names.subsystem]);
        let subsystem =
            self.node(&mut writes, NodeKind::Subsystem, &subsystem_key, &names.subsystem, |n| n)?;
        self.edge(&mut writes, Edge::new(product, subsystem, Relationship::HasSubsystem))?;

        let element_key = composite_key(&[&subsystem_key, &names.system_element]);
        let element = self.node(
            &mut writes,
            NodeKind::SystemElement,
            &element_key,
            &names.system_element,
            |n| n,
        )?;
        self.edge(&mut writes, Edge::new(subsystem, element, Relationship::HasSystemElement))?;

        let function_key = composite_key(&[&element_key, &names.function]);
        let function =
            self.node(&mut writes, NodeKind::Function, &function_key, &names.function, |n| n)?;
        self.edge(&mut writes, Edge::new(element, function, Relationship::HasFunction))?;

        // Failures are scoped to the element, not the function, so one mode
        // reached from two functions of the same element is a single node.
        let mode_key = composite_key(&[&element_key, &names.failure_mode]);
        let mode =
            self.node(&mut writes, NodeKind::FailureMode, &mode_key, &names.failure_mode, |n| n)?;
        self.edge(&mut writes, Edge::new(function, mode, Relationship::HasFailureMode))?;

        let effect_key = composite_key(&[&element_key, &names.failure_effect]);
        let severity = record.severity.map(PropertyValue::Int);
        let effect = self.node(
            &mut writes,
            NodeKind::FailureEffect,
            &effect_key,
            &names.failure_effect,
            |n| n.with_optional_property(props::SEVERITY_RATING, severity),
        )?;
        self.edge(&mut writes, Edge::new(mode, effect, Relationship::ResultsInFailureEffect))?;

        let cause_key = composite_key(&[&element_key, &names.failure_cause]);
        let occurrence = record.occurrence.map(PropertyValue::Int);
        let cause = self.node(
            &mut writes,
            NodeKind::FailureCause,
            &cause_key,
            &names.failure_cause,
            |n| n.with_optional_property(props::OCCURRENCE_RATING, occurrence),
        )?;
        self.edge(
            &mut writes,
            Edge::new(mode, cause, Relationship::IsDueToFailureCause).with_optional_property(
                props::DETECTION_RATING,
                record.detection.map(PropertyValue::Int),
            ),
        )?;

        // Measure
        let measure_name = record
            .measure_name
            .as_deref()
            .map(normalize)
            .filter(|n| !n.is_empty());
        match (measure_name, record.measure_type) {
            (Some(name), Some(kind)) => {
                let measure_key = composite_key(&[&element_key, &name, kind.as_str()]);
                let measure = self.node(&mut writes, NodeKind::Measure, &measure_key, &name, |n| {
                    n.with_property(props::MEASURE_TYPE, PropertyValue::from(kind.as_str()))
                })?;
                self.edge(&mut writes, Edge::new(cause, measure, Relationship::improved_by(kind)))?;
                if kind == MeasureKind::Detective {
                    self.edge(
                        &mut writes,
                        Edge::new(measure, mode, Relationship::ImprovesDetectionFor),
                    )?;
                }
            }
            (Some(name), None) => {
                debug!(measure = %name, "measure without a known type, not attached");
            }
            (None, _) => {}
        }

        Ok(RecordOutcome::Imported {
            nodes_created: writes.nodes,
            edges_created: writes.edges,
        })
    }

    /// Resolve a key and write the node only when it is new.
    fn node(
        &mut self,
        writes: &mut Writes,
        kind: NodeKind,
        key: &str,
        name: &str,
        decorate: impl FnOnce(Node) -> Node,
    ) -> ImportResult<NodeRef> {
        let resolution = self.state.resolve(kind, key);
        if resolution.created {
            self.store
                .upsert_node(&decorate(Node::new(kind, resolution.id, name)))?;
            writes.nodes += 1;
        }
        Ok(NodeRef::new(kind, resolution.id))
    }

    fn edge(&self, writes: &mut Writes, edge: Edge) -> ImportResult<()> {
        if self.store.upsert_edge(&edge)? {
            writes.edges += 1;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Writes {
    nodes: usize,
    edges: usize,
}
