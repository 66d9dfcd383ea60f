//! Entity-driven lookup for free questions

use super::structural::neighbors;
use crate::graph::{props, NodeKind, Properties};
use crate::storage::{GraphStore, NodeFilter, StorageResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Maximum rows returned for entity lookups that are not product-only.
pub const QUESTION_ROW_LIMIT: usize = 50;

const BROADER_CONTEXT: &str = "BroaderContext";
const HIDDEN_PROPERTIES: [&str; 4] = ["id", "name", "embedding", props::FAILURE_MODE_ID];

/// Entity names mentioned in a question, per FMEA node kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMap {
    entities: BTreeMap<NodeKind, Vec<String>>,
}

impl EntityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: NodeKind, names: &[&str]) -> Self {
        self.entities
            .entry(kind)
            .or_default()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Read `{"Product": [...], "FailureMode": [...], ...}`.
    ///
    /// Unknown keys, non-string items and blank names are ignored; nested
    /// lists are flattened one level.
    pub fn from_json(value: &Value) -> Self {
        let mut map = Self::default();
        let Some(object) = value.as_object() else {
            return map;
        };
        for (key, names) in object {
            let Ok(kind) = key.parse::<NodeKind>() else {
                continue;
            };
            if !NodeKind::FMEA.contains(&kind) {
                continue;
            }
            let Some(items) = names.as_array() else {
                continue;
            };
            let flat = items.iter().flat_map(|item| match item {
                Value::Array(inner) => inner.iter().collect::<Vec<_>>(),
                other => vec![other],
            });
            let names: Vec<String> = flat
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !names.is_empty() {
                map.entities.entry(kind).or_default().extend(names);
            }
        }
        map
    }

    pub fn get(&self, kind: NodeKind) -> &[String] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(Vec::is_empty)
    }

    /// Whether products are the only entities mentioned.
    pub fn only_products(&self) -> bool {
        !self.get(NodeKind::Product).is_empty()
            && self
                .entities
                .iter()
                .all(|(kind, names)| *kind == NodeKind::Product || names.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeKind, &str)> {
        self.entities
            .iter()
            .flat_map(|(kind, names)| names.iter().map(move |name| (*kind, name.as_str())))
    }
}

/// One unformatted lookup row: a node, optionally one relationship and its neighbor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestionRow {
    pub main_type: String,
    pub main_name: Option<String>,
    pub main_properties: Map<String, Value>,
    pub relationship: Option<String>,
    pub relationship_properties: Map<String, Value>,
    pub connected_type: Option<String>,
    pub connected_name: Option<String>,
    pub connected_properties: Map<String, Value>,
}

fn visible(properties: &Properties) -> Map<String, Value> {
    properties
        .iter()
        .filter(|(key, _)| !HIDDEN_PROPERTIES.contains(&key.as_str()))
        .filter_map(|(key, value)| Some((key.clone(), serde_json::to_value(value).ok()?)))
        .collect()
}

fn push_unique(rows: &mut Vec<QuestionRow>, seen: &mut HashSet<String>, row: QuestionRow) {
    let key = serde_json::to_string(&row).unwrap_or_default();
    if seen.insert(key) {
        rows.push(row);
    }
}

/// Structural rows for an entity map.
pub(crate) fn question_rows(
    store: &dyn GraphStore,
    entities: &EntityMap,
) -> StorageResult<Vec<QuestionRow>> {
    if entities.only_products() {
        product_structure(store, entities.get(NodeKind::Product))
    } else {
        entity_neighborhoods(store, entities)
    }
}

/// Product → Subsystem and Subsystem → SystemElement rows for matching products,
/// ordered by product name, subsystem rows first.
fn product_structure(store: &dyn GraphStore, products: &[String]) -> StorageResult<Vec<QuestionRow>> {
    let mut seen = HashSet::new();
    let mut tagged: Vec<(String, QuestionRow)> = Vec::new();
    let mut keep = |context: &str, row: QuestionRow, tagged: &mut Vec<(String, QuestionRow)>| {
        let key = format!("{context}\u{1f}{}", serde_json::to_string(&row).unwrap_or_default());
        if seen.insert(key) {
            tagged.push((context.to_string(), row));
        }
    };

    for needle in products {
        let filter = NodeFilter::new()
            .with_kind(NodeKind::Product)
            .with_name_containing(needle.as_str());
        for product in store.find_nodes(&filter)? {
            let context = product.name_or_empty().to_string();
            for (edge, subsystem) in neighbors(store, &product)? {
                if subsystem.kind != NodeKind::Subsystem {
                    continue;
                }
                let row = QuestionRow {
                    main_type: NodeKind::Product.to_string(),
                    main_name: product.name.clone(),
                    relationship: Some(edge.relationship.to_string()),
                    connected_type: Some(NodeKind::Subsystem.to_string()),
                    connected_name: subsystem.name.clone(),
                    ..Default::default()
                };
                keep(&context, row, &mut tagged);

                for (edge, element) in neighbors(store, &subsystem)? {
                    if element.kind != NodeKind::SystemElement {
                        continue;
                    }
                    let row = QuestionRow {
                        main_type: NodeKind::Subsystem.to_string(),
                        main_name: subsystem.name.clone(),
                        relationship: Some(edge.relationship.to_string()),
                        connected_type: Some(NodeKind::SystemElement.to_string()),
                        connected_name: element.name.clone(),
                        ..Default::default()
                    };
                    keep(&context, row, &mut tagged);
                }
            }
        }
    }

    tagged.sort_by(|(ca, a), (cb, b)| ca.cmp(cb).then_with(|| b.main_type.cmp(&a.main_type)));
    Ok(tagged.into_iter().map(|(_, row)| row).collect())
}

/// Each matching node with each non-embedding neighbor, plus text chunks
/// mentioning the entity.
fn entity_neighborhoods(store: &dyn GraphStore, entities: &EntityMap) -> StorageResult<Vec<QuestionRow>> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for (kind, needle) in entities.iter() {
        let filter = NodeFilter::new().with_kind(kind).with_name_containing(needle);
        for node in store.find_nodes(&filter)? {
            let base = QuestionRow {
                main_type: kind.to_string(),
                main_name: node.name.clone(),
                main_properties: visible(&node.properties),
                ..Default::default()
            };
            let linked: Vec<_> = neighbors(store, &node)?
                .into_iter()
                .filter(|(_, other)| other.kind != NodeKind::VectorEmbedding)
                .collect();
            if linked.is_empty() {
                push_unique(&mut rows, &mut seen, base.clone());
            }
            for (edge, other) in linked {
                let row = QuestionRow {
                    relationship: Some(edge.relationship.to_string()),
                    relationship_properties: visible(&edge.properties),
                    connected_type: Some(other.kind.to_string()),
                    connected_name: other.name.clone(),
                    connected_properties: visible(&other.properties),
                    ..base.clone()
                };
                push_unique(&mut rows, &mut seen, row);
            }
        }

        let filter = NodeFilter::new()
            .with_kind(NodeKind::VectorEmbedding)
            .with_property_containing(props::TEXT_CHUNK, needle);
        for chunk in store.find_nodes(&filter)? {
            let mut main_properties = Map::new();
            if let Some(text) = chunk.property(props::TEXT_CHUNK).and_then(|v| v.as_str()) {
                main_properties.insert(props::TEXT_CHUNK.to_string(), Value::from(text));
            }
            let row = QuestionRow {
                main_type: BROADER_CONTEXT.to_string(),
                main_properties,
                ..Default::default()
            };
            push_unique(&mut rows, &mut seen, row);
        }
    }

    rows.truncate(QUESTION_ROW_LIMIT);
    Ok(rows)
}

/// Key each row by node type: `{"FailureMode": name, "FailureMode_properties": {..},
/// "relationship": .., <relationship properties>, "<ConnectedType>": name, ..}`.
///
/// Empty property maps are omitted; a chunk row becomes `{"BroaderContext": text}`.
pub fn format_question_rows(rows: &[QuestionRow]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let mut out = Map::new();
            if row.main_type == BROADER_CONTEXT {
                if let Some(text) = row.main_properties.get(props::TEXT_CHUNK) {
                    out.insert(BROADER_CONTEXT.to_string(), text.clone());
                }
            } else {
                if let Some(name) = &row.main_name {
                    out.insert(row.main_type.clone(), Value::from(name.as_str()));
                }
                if !row.main_properties.is_empty() {
                    out.insert(
                        format!("{}_properties", row.main_type),
                        Value::Object(row.main_properties.clone()),
                    );
                }
            }
            if let Some(relationship) = &row.relationship {
                out.insert("relationship".to_string(), Value::from(relationship.as_str()));
            }
            for (key, value) in &row.relationship_properties {
                out.insert(key.clone(), value.clone());
            }
            if let Some(connected) = &row.connected_type {
                if let Some(name) = &row.connected_name {
                    out.insert(connected.clone(), Value::from(name.as_str()));
                }
                if !row.connected_properties.is_empty() {
                    out.insert(
                        format!("{connected}_properties"),
                        Value::Object(row.connected_properties.clone()),
                    );
                }
            }
            Value::Object(out)
        })
        .collect()
}
