//! Narrative text chunks for failure mode contexts
//!
//! One chunk is produced per (product, subsystem, element, function, mode)
//! path. Chunks are stored as `VectorEmbedding` nodes hanging off their
//! failure mode via `HAS_EMBEDDING`, then embedded into a vector index.

use super::{Embedder, EmbeddingError, VectorIndex};
use crate::graph::{props, Edge, Node, NodeKind, NodeRef, Properties, PropertyValue, Relationship};
use crate::storage::{GraphStore, NodeFilter, StorageResult};
use std::collections::HashMap;
use tracing::{debug, info};

/// Chunks embedded per embedder call
const EMBED_BATCH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct CauseContext {
    pub name: String,
    pub occurrence: Option<i64>,
    /// Rating of the (mode, cause) edge
    pub detection: Option<i64>,
    pub preventive: Vec<String>,
    pub detective: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectContext {
    pub name: String,
    pub severity: Option<i64>,
}

/// Everything known about one failure mode along one hierarchy path.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureModeContext {
    pub failure_mode_id: i64,
    pub failure_mode: String,
    pub product: String,
    pub subsystem: String,
    pub system_element: String,
    pub function: String,
    pub causes: Vec<CauseContext>,
    pub effects: Vec<EffectContext>,
}

fn names(nodes: Vec<Node>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for node in nodes {
        if let Some(name) = node.name {
            if !name.is_empty() && !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}

fn causes_of(store: &dyn GraphStore, mode: NodeRef) -> StorageResult<Vec<CauseContext>> {
    let mut causes = Vec::new();
    for edge in store.edges_from(mode, Some(Relationship::IsDueToFailureCause))? {
        let Some(cause) = store.load_node(edge.target)? else {
            continue;
        };
        let (preventive, detective) = store.measures_for_pair(cause.node_ref(), mode)?;
        causes.push(CauseContext {
            name: cause.name_or_empty().to_string(),
            occurrence: cause.int_property(props::OCCURRENCE_RATING),
            detection: edge.int_property(props::DETECTION_RATING),
            preventive: names(preventive),
            detective: names(detective),
        });
    }
    Ok(causes)
}

fn effects_of(store: &dyn GraphStore, mode: NodeRef) -> StorageResult<Vec<EffectContext>> {
    Ok(store
        .targets(mode, Relationship::ResultsInFailureEffect)?
        .into_iter()
        .map(|effect| EffectContext {
            severity: effect.int_property(props::SEVERITY_RATING),
            name: effect.name.unwrap_or_default(),
        })
        .collect())
}

/// Collect every failure mode context reachable from a full hierarchy path.
pub fn failure_mode_contexts(store: &dyn GraphStore) -> StorageResult<Vec<FailureModeContext>> {
    let mut contexts = Vec::new();
    for mode in store.find_nodes(&NodeFilter::new().with_kind(NodeKind::FailureMode))? {
        let mode_ref = mode.node_ref();
        let causes = causes_of(store, mode_ref)?;
        let effects = effects_of(store, mode_ref)?;

        for function in store.sources(mode_ref, Relationship::HasFailureMode)? {
            for element in store.sources(function.node_ref(), Relationship::HasFunction)? {
                for subsystem in store.sources(element.node_ref(), Relationship::HasSystemElement)? {
                    for product in store.sources(subsystem.node_ref(), Relationship::HasSubsystem)? {
                        contexts.push(FailureModeContext {
                            failure_mode_id: mode.id,
                            failure_mode: mode.name_or_empty().to_string(),
                            product: product.name_or_empty().to_string(),
                            subsystem: subsystem.name_or_empty().to_string(),
                            system_element: element.name_or_empty().to_string(),
                            function: function.name_or_empty().to_string(),
                            causes: causes.clone(),
                            effects: effects.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(contexts)
}

/// Render the narrative summary of one failure mode context.
pub fn text_chunk(ctx: &FailureModeContext) -> String {
    let fm = &ctx.failure_mode;
    let mut parts = vec![
        format!(
            "The failure mode '{}' occurs in the '{}' component, which is part of the '{}' subsystem in the '{}' system.",
            fm, ctx.system_element, ctx.subsystem, ctx.product
        ),
        format!(
            "This failure affects the '{}' function of the '{}'.",
            ctx.function, ctx.system_element
        ),
    ];

    let causes: Vec<&CauseContext> = ctx.causes.iter().filter(|c| !c.name.is_empty()).collect();
    if !causes.is_empty() {
        parts.push(format!(
            "The failure mode '{}' can be caused by the following failure causes: ",
            fm
        ));
        for cause in causes {
            let mut text = format!(" Failure cause '{}'", cause.name);
            if let Some(occurrence) = cause.occurrence {
                text.push_str(&format!(" with an occurrence rating of {}", occurrence));
            }
            match (cause.detection, cause.occurrence) {
                (Some(detection), _) => text.push_str(&format!(
                    " and a detection rating of {} in the context of the failure mode '{}'.",
                    detection, fm
                )),
                (None, Some(_)) => text.push('.'),
                (None, None) => {}
            }
            if !cause.preventive.is_empty() {
                text.push_str(&format!(
                    " Preventive measures for the failure cause '{}' are: '{}'.",
                    cause.name,
                    cause.preventive.join(", ")
                ));
            }
            if !cause.detective.is_empty() {
                text.push_str(&format!(
                    " Detective measures for detecting the failure cause '{}' in the context of failure mode '{}' are: '{}'.",
                    cause.name,
                    fm,
                    cause.detective.join(", ")
                ));
            }
            parts.push(text);
        }
    }

    let effects: Vec<&EffectContext> = ctx.effects.iter().filter(|e| !e.name.is_empty()).collect();
    if !effects.is_empty() {
        parts.push(format!(
            " The failure mode '{}' results in the following failure effects:",
            fm
        ));
        for effect in effects {
            let mut text = format!(" Failure effect '{}'", effect.name);
            if let Some(severity) = effect.severity {
                text.push_str(&format!(" with a severity rating of {}.", severity));
            }
            parts.push(text);
        }
    }

    parts.join(" ")
}

/// Write one `VectorEmbedding` node per failure mode context.
///
/// Re-running is a no-op for chunks that already exist with the same text
/// under the same failure mode. Returns every chunk node of this pass.
pub fn materialize_chunks(store: &dyn GraphStore) -> StorageResult<Vec<Node>> {
    let existing = store.find_nodes(&NodeFilter::new().with_kind(NodeKind::VectorEmbedding))?;
    let mut next_id = existing.iter().map(|n| n.id).max().unwrap_or(0);
    let mut known: HashMap<(i64, String), i64> = HashMap::new();
    for node in &existing {
        if let (Some(mode_id), Some(text)) = (
            node.int_property(props::FAILURE_MODE_ID),
            node.property(props::TEXT_CHUNK).and_then(PropertyValue::as_str),
        ) {
            known.insert((mode_id, text.to_string()), node.id);
        }
    }

    let mut chunks = Vec::new();
    for ctx in failure_mode_contexts(store)? {
        let text = text_chunk(&ctx);
        let key = (ctx.failure_mode_id, text.clone());
        let id = match known.get(&key) {
            Some(id) => *id,
            None => {
                next_id += 1;
                known.insert(key, next_id);
                next_id
            }
        };

        let node = Node::unnamed(NodeKind::VectorEmbedding, id)
            .with_property(props::TEXT_CHUNK, PropertyValue::from(text))
            .with_property(props::FAILURE_MODE_ID, PropertyValue::Int(ctx.failure_mode_id));
        store.upsert_node(&node)?;
        store.upsert_edge(&Edge::new(
            NodeRef::new(NodeKind::FailureMode, ctx.failure_mode_id),
            node.node_ref(),
            Relationship::HasEmbedding,
        ))?;
        debug!(failure_mode = %ctx.failure_mode, chunk = id, "materialized text chunk");
        if !chunks.iter().any(|c: &Node| c.id == id) {
            chunks.push(node);
        }
    }

    info!(chunks = chunks.len(), "text chunks materialized");
    Ok(chunks)
}

/// Embed chunk nodes and write them to a vector index. Returns the count.
pub fn index_chunks(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    chunks: &[Node],
) -> Result<usize, EmbeddingError> {
    let mut indexed = 0;
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<&str> = batch
            .iter()
            .map(|n| {
                n.property(props::TEXT_CHUNK)
                    .and_then(PropertyValue::as_str)
                    .unwrap_or("")
            })
            .collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::ModelError(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        for ((node, text), vector) in batch.iter().zip(&texts).zip(vectors) {
            let mut metadata = Properties::new();
            metadata.insert("vector_embedding_id".into(), PropertyValue::Int(node.id));
            if let Some(mode_id) = node.int_property(props::FAILURE_MODE_ID) {
                metadata.insert(props::FAILURE_MODE_ID.into(), PropertyValue::Int(mode_id));
            }
            index.upsert(&node.id.to_string(), text, metadata, vector)?;
            indexed += 1;
        }
    }
    Ok(indexed)
}
