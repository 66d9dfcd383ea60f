//! Structural lookups: graph traversals from name-matched anchor nodes
//!
//! Neighbors are followed in either direction, restricted by node kind.
//! Optional levels behave like outer joins: an empty level contributes a
//! single `None` so the remaining levels still produce rows.

use super::GraphRecord;
use crate::graph::{props, Edge, MeasureKind, Node, NodeKind, Relationship};
use crate::storage::{contains_ignore_case, GraphStore, NodeFilter, StorageResult};
use std::collections::{BTreeSet, HashMap};

/// Every edge touching `node` with the node at its other end.
pub(crate) fn neighbors(store: &dyn GraphStore, node: &Node) -> StorageResult<Vec<(Edge, Node)>> {
    let anchor = node.node_ref();
    let outgoing = store.edges_from(anchor, None)?.into_iter().map(|e| (e.target, e));
    let incoming = store.edges_to(anchor, None)?.into_iter().map(|e| (e.source, e));
    let mut out = Vec::new();
    for (other, edge) in outgoing.chain(incoming) {
        if let Some(found) = store.load_node(other)? {
            out.push((edge, found));
        }
    }
    Ok(out)
}

/// Nodes of `kind` linked to `node` by any edge, in either direction.
pub(crate) fn linked(store: &dyn GraphStore, node: &Node, kind: NodeKind) -> StorageResult<Vec<Node>> {
    let mut seen = BTreeSet::new();
    Ok(neighbors(store, node)?
        .into_iter()
        .map(|(_, other)| other)
        .filter(|other| other.kind == kind && seen.insert(other.node_ref()))
        .collect())
}

/// Wrap a level for an optional match.
fn or_none(nodes: Vec<Node>) -> Vec<Option<Node>> {
    if nodes.is_empty() {
        vec![None]
    } else {
        nodes.into_iter().map(Some).collect()
    }
}

fn linked_opt(
    store: &dyn GraphStore,
    node: Option<&Node>,
    kind: NodeKind,
) -> StorageResult<Vec<Option<Node>>> {
    match node {
        Some(node) => Ok(or_none(linked(store, node, kind)?)),
        None => Ok(vec![None]),
    }
}

fn name(node: &Option<Node>) -> Option<String> {
    node.as_ref().and_then(|n| n.name.clone())
}

fn rating(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn anchors(store: &dyn GraphStore, kind: NodeKind, needle: &str) -> StorageResult<Vec<Node>> {
    store.find_nodes(
        &NodeFilter::new()
            .with_kind(kind)
            .with_name_containing(needle),
    )
}

/// Upward hierarchy of a function: (element, subsystem, product) combinations.
fn hierarchy_of(
    store: &dyn GraphStore,
    function: Option<&Node>,
) -> StorageResult<Vec<(Option<Node>, Option<Node>, Option<Node>)>> {
    let mut out = Vec::new();
    for element in linked_opt(store, function, NodeKind::SystemElement)? {
        for subsystem in linked_opt(store, element.as_ref(), NodeKind::Subsystem)? {
            for product in linked_opt(store, subsystem.as_ref(), NodeKind::Product)? {
                out.push((element.clone(), subsystem.clone(), product));
            }
        }
    }
    Ok(out)
}

/// Functions of every system element whose name contains the context's element.
pub(crate) fn functions_for_element(
    store: &dyn GraphStore,
    ctx: &GraphRecord,
) -> StorageResult<Vec<GraphRecord>> {
    let Some(needle) = ctx.system_element.as_deref() else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::new();
    for element in anchors(store, NodeKind::SystemElement, needle)? {
        let functions = or_none(linked(store, &element, NodeKind::Function)?);
        let subsystems = or_none(linked(store, &element, NodeKind::Subsystem)?);
        for function in &functions {
            for subsystem in &subsystems {
                for product in linked_opt(store, subsystem.as_ref(), NodeKind::Product)? {
                    rows.push(GraphRecord {
                        product: name(&product),
                        subsystem: name(subsystem),
                        system_element: element.name.clone(),
                        function: name(function),
                        ..Default::default()
                    });
                }
            }
        }
    }
    Ok(rows)
}

/// Failure modes, causes and effects of every function whose name contains
/// the context's function.
pub(crate) fn failures_for_function(
    store: &dyn GraphStore,
    ctx: &GraphRecord,
) -> StorageResult<Vec<GraphRecord>> {
    let Some(needle) = ctx.function.as_deref() else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::new();
    for function in anchors(store, NodeKind::Function, needle)? {
        let hierarchy = hierarchy_of(store, Some(&function))?;
        for mode in or_none(linked(store, &function, NodeKind::FailureMode)?) {
            let causes = linked_opt(store, mode.as_ref(), NodeKind::FailureCause)?;
            let effects = linked_opt(store, mode.as_ref(), NodeKind::FailureEffect)?;
            for cause in &causes {
                for effect in &effects {
                    for (element, subsystem, product) in &hierarchy {
                        rows.push(GraphRecord {
                            product: name(product),
                            subsystem: name(subsystem),
                            system_element: name(element),
                            function: function.name.clone(),
                            failure_mode: name(&mode),
                            failure_cause: name(cause),
                            failure_effect: name(effect),
                            ..Default::default()
                        });
                    }
                }
            }
        }
    }
    Ok(rows)
}

/// (mode, cause) pairs joined by `isDueToFailureCause` whose names contain the
/// context's mode and cause, each with the edge's `detection_rating`.
fn matching_pairs(
    store: &dyn GraphStore,
    cause_needle: &str,
    mode_needle: &str,
) -> StorageResult<Vec<(Node, Node, Option<i64>)>> {
    let mut pairs = Vec::new();
    for cause in anchors(store, NodeKind::FailureCause, cause_needle)? {
        for edge in store.edges_to(cause.node_ref(), Some(Relationship::IsDueToFailureCause))? {
            let Some(mode) = store.load_node(edge.source)? else {
                continue;
            };
            if !contains_ignore_case(mode.name_or_empty(), mode_needle) {
                continue;
            }
            let detection = edge.int_property(props::DETECTION_RATING);
            pairs.push((mode, cause.clone(), detection));
        }
    }
    Ok(pairs)
}

fn pair_measures(
    store: &dyn GraphStore,
    cause: &Node,
    mode: &Node,
) -> StorageResult<Vec<(MeasureKind, String)>> {
    let (preventive, detective) = store.measures_for_pair(cause.node_ref(), mode.node_ref())?;
    let tagged = preventive
        .into_iter()
        .map(|m| (MeasureKind::Preventive, m))
        .chain(detective.into_iter().map(|m| (MeasureKind::Detective, m)));
    Ok(tagged
        .filter_map(|(kind, m)| m.name.map(|name| (kind, name)))
        .collect())
}

/// One row per existing measure of each matching (mode, cause) pair.
pub(crate) fn measures_for_cause(
    store: &dyn GraphStore,
    ctx: &GraphRecord,
) -> StorageResult<Vec<GraphRecord>> {
    let (Some(cause_needle), Some(mode_needle)) =
        (ctx.failure_cause.as_deref(), ctx.failure_mode.as_deref())
    else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for (mode, cause, _) in matching_pairs(store, cause_needle, mode_needle)? {
        let measures: Vec<Option<(MeasureKind, String)>> = {
            let found = pair_measures(store, &cause, &mode)?;
            if found.is_empty() {
                vec![None]
            } else {
                found.into_iter().map(Some).collect()
            }
        };
        let effects = or_none(linked(store, &mode, NodeKind::FailureEffect)?);
        let functions = or_none(linked(store, &mode, NodeKind::Function)?);

        for measure in &measures {
            for effect in &effects {
                for function in &functions {
                    for (element, subsystem, product) in hierarchy_of(store, function.as_ref())? {
                        let mut row = GraphRecord {
                            product: name(&product),
                            subsystem: name(&subsystem),
                            system_element: name(&element),
                            function: name(function),
                            failure_mode: mode.name.clone(),
                            failure_cause: cause.name.clone(),
                            failure_effect: name(effect),
                            ..Default::default()
                        };
                        match measure {
                            Some((MeasureKind::Preventive, m)) => row.preventive_measure = vec![m.clone()],
                            Some((MeasureKind::Detective, m)) => row.detective_measure = vec![m.clone()],
                            None => {}
                        }
                        rows.push(row);
                    }
                }
            }
        }
    }
    Ok(rows)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|m| m == value) {
        list.push(value.to_string());
    }
}

/// Rated failure chains whose mode, cause and effect names all contain the
/// context's names, grouped by the seven names with their measures collected.
pub(crate) fn ratings_for_chain(
    store: &dyn GraphStore,
    ctx: &GraphRecord,
) -> StorageResult<Vec<GraphRecord>> {
    let (Some(cause_needle), Some(mode_needle), Some(effect_needle)) = (
        ctx.failure_cause.as_deref(),
        ctx.failure_mode.as_deref(),
        ctx.failure_effect.as_deref(),
    ) else {
        return Ok(Vec::new());
    };

    let mut order: Vec<[Option<String>; 7]> = Vec::new();
    let mut grouped: HashMap<[Option<String>; 7], GraphRecord> = HashMap::new();

    for (mode, cause, detection) in matching_pairs(store, cause_needle, mode_needle)? {
        let effects: Vec<Node> = store
            .targets(mode.node_ref(), Relationship::ResultsInFailureEffect)?
            .into_iter()
            .filter(|fe| contains_ignore_case(fe.name_or_empty(), effect_needle))
            .collect();
        if effects.is_empty() {
            continue;
        }
        let measures = pair_measures(store, &cause, &mode)?;
        let functions = or_none(linked(store, &mode, NodeKind::Function)?);

        for effect in &effects {
            for function in &functions {
                for (element, subsystem, product) in hierarchy_of(store, function.as_ref())? {
                    let key = [
                        name(&product),
                        name(&subsystem),
                        name(&element),
                        name(function),
                        mode.name.clone(),
                        cause.name.clone(),
                        effect.name.clone(),
                    ];
                    let record = grouped.entry(key.clone()).or_insert_with(|| {
                        order.push(key.clone());
                        let [product, subsystem, system_element, function, failure_mode, failure_cause, failure_effect] =
                            key;
                        GraphRecord {
                            product,
                            subsystem,
                            system_element,
                            function,
                            failure_mode,
                            failure_cause,
                            failure_effect,
                            severity: rating(effect.int_property(props::SEVERITY_RATING)),
                            occurrence: rating(cause.int_property(props::OCCURRENCE_RATING)),
                            detection: rating(detection),
                            ..Default::default()
                        }
                    });
                    for (kind, measure) in &measures {
                        match kind {
                            MeasureKind::Preventive => push_unique(&mut record.preventive_measure, measure),
                            MeasureKind::Detective => push_unique(&mut record.detective_measure, measure),
                        }
                    }
                }
            }
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|key| grouped.remove(&key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{GraphImporter, ImportRecord};
    use crate::storage::{OpenStore, SqliteStore};
    use std::sync::Arc;

    fn create_test_store() -> Arc<dyn GraphStore> {
        let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let records = vec![
            ImportRecord::new("Engine", "Cooling", "Pump", "Circulate coolant", "Leakage", "Seal wear", "Overheating")
                .with_measure("Seal inspection", MeasureKind::Preventive)
                .with_ratings(Some(8), Some(4), Some(3)),
            ImportRecord::new("Engine", "Cooling", "Pump", "Circulate coolant", "Leakage", "Seal wear", "Overheating")
                .with_measure("Pressure test", MeasureKind::Detective)
                .with_ratings(Some(8), Some(4), Some(3)),
            ImportRecord::new("Engine", "Cooling", "Pump", "Circulate coolant", "Blockage", "Seal wear", "Overheating")
                .with_measure("Flow sensor", MeasureKind::Detective)
                .with_ratings(Some(8), Some(4), Some(6)),
            ImportRecord::new("Engine", "Cooling", "Pump", "Seal housing", "Crack", "Fatigue", "Coolant loss"),
        ];
        GraphImporter::new(store.clone()).run(records).unwrap();
        store
    }

    // ========================================================================
    // Functions
    // ========================================================================

    #[test]
    fn functions_of_matching_element() {
        let store = create_test_store();
        let ctx = GraphRecord {
            system_element: Some("pump".into()),
            ..Default::default()
        };
        let rows = functions_for_element(store.as_ref(), &ctx).unwrap();
        let mut functions: Vec<_> = rows.iter().filter_map(|r| r.function.clone()).collect();
        functions.sort();
        assert_eq!(functions, vec!["Circulate coolant", "Seal housing"]);
        assert!(rows.iter().all(|r| r.product.as_deref() == Some("Engine")));
        assert!(rows.iter().all(|r| r.subsystem.as_deref() == Some("Cooling")));
    }

    #[test]
    fn missing_needle_or_no_match_is_empty() {
        let store = create_test_store();
        assert!(functions_for_element(store.as_ref(), &GraphRecord::default())
            .unwrap()
            .is_empty());
        let ctx = GraphRecord {
            system_element: Some("Turbine".into()),
            ..Default::default()
        };
        assert!(functions_for_element(store.as_ref(), &ctx).unwrap().is_empty());
    }

    // ========================================================================
    // Failures
    // ========================================================================

    #[test]
    fn failures_of_matching_function() {
        let store = create_test_store();
        let ctx = GraphRecord {
            function: Some("Circulate".into()),
            ..Default::default()
        };
        let rows = failures_for_function(store.as_ref(), &ctx).unwrap();
        let mut modes: Vec<_> = rows.iter().filter_map(|r| r.failure_mode.clone()).collect();
        modes.sort();
        modes.dedup();
        assert_eq!(modes, vec!["Blockage", "Leakage"]);
        assert!(rows
            .iter()
            .all(|r| r.system_element.as_deref() == Some("Pump") && r.failure_cause.as_deref() == Some("Seal wear")));
    }

    // ========================================================================
    // Measures
    // ========================================================================

    #[test]
    fn detective_measures_are_scoped_to_their_mode() {
        let store = create_test_store();
        let ctx = GraphRecord {
            failure_mode: Some("Leakage".into()),
            failure_cause: Some("Seal wear".into()),
            ..Default::default()
        };
        let rows = measures_for_cause(store.as_ref(), &ctx).unwrap();
        let preventive: Vec<_> = rows.iter().flat_map(|r| r.preventive_measure.clone()).collect();
        let detective: Vec<_> = rows.iter().flat_map(|r| r.detective_measure.clone()).collect();
        assert_eq!(preventive, vec!["Seal inspection"]);
        assert_eq!(detective, vec!["Pressure test"]);
    }

    #[test]
    fn pair_without_measures_yields_one_row() {
        let store = create_test_store();
        let ctx = GraphRecord {
            failure_mode: Some("Crack".into()),
            failure_cause: Some("Fatigue".into()),
            ..Default::default()
        };
        let rows = measures_for_cause(store.as_ref(), &ctx).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].failure_effect.as_deref(), Some("Coolant loss"));
        assert!(rows[0].preventive_measure.is_empty() && rows[0].detective_measure.is_empty());
    }

    // ========================================================================
    // Ratings
    // ========================================================================

    #[test]
    fn ratings_group_measures_per_chain() {
        let store = create_test_store();
        let ctx = GraphRecord {
            failure_mode: Some("Leakage".into()),
            failure_cause: Some("Seal wear".into()),
            failure_effect: Some("Overheating".into()),
            ..Default::default()
        };
        let rows = ratings_for_chain(store.as_ref(), &ctx).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.preventive_measure, vec!["Seal inspection"]);
        assert_eq!(row.detective_measure, vec!["Pressure test"]);
        assert_eq!((row.severity, row.occurrence, row.detection), (Some(8), Some(4), Some(3)));
    }

    #[test]
    fn detection_rating_belongs_to_the_pair() {
        let store = create_test_store();
        let ctx = GraphRecord {
            failure_mode: Some("Blockage".into()),
            failure_cause: Some("Seal wear".into()),
            failure_effect: Some("Overheating".into()),
            ..Default::default()
        };
        let rows = ratings_for_chain(store.as_ref(), &ctx).unwrap();
        assert_eq!(rows[0].detection, Some(6));
        assert_eq!(rows[0].detective_measure, vec!["Flow sensor"]);
        assert_eq!(rows[0].preventive_measure, vec!["Seal inspection"]);
    }
}
