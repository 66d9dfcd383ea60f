//! Semantic lookups: query construction and content dedup

use super::{ChainContext, LookupStage};
use crate::embedding::{SearchHit, SemanticSearch};
use std::collections::HashSet;
use tracing::warn;

/// Natural-language queries for a stage, in issue order.
///
/// A query whose required names are absent is not issued.
pub fn semantic_queries(stage: LookupStage, ctx: &ChainContext) -> Vec<String> {
    let mode = ctx.failure_mode.as_deref().unwrap_or_default();
    match stage {
        LookupStage::Functions => ctx
            .system_element
            .iter()
            .map(|element| format!("Functions of {element}"))
            .collect(),
        LookupStage::Failures => ctx
            .function
            .iter()
            .map(|function| {
                format!("Failure Modes of Function {function} with failure effects and failure causes")
            })
            .collect(),
        LookupStage::Measures => match ctx.failure_cause.as_deref() {
            Some(cause) => vec![
                format!("Detective Measures for Failure cause {cause}"),
                format!(
                    "Preventive Measures for Failure cause {cause} in the context of failure mode {mode}"
                ),
            ],
            None => Vec::new(),
        },
        LookupStage::Ratings => {
            let mut queries = Vec::new();
            if let Some(cause) = ctx.failure_cause.as_deref() {
                queries.push(format!(
                    "Detection of failure cause {cause} in the context of failure mode {mode}"
                ));
                queries.push(format!("Occurrence of failure cause {cause}"));
            }
            if let Some(effect) = ctx.failure_effect.as_deref() {
                queries.push(format!("Severity of failure effect {effect}"));
            }
            queries
        }
    }
}

/// Run each query and concatenate the hits.
///
/// With `dedup`, a hit whose content was already returned is dropped.
/// A failing query contributes nothing.
pub(crate) fn run_queries(
    search: &SemanticSearch,
    queries: &[String],
    k: usize,
    dedup: bool,
) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for query in queries {
        let found = match search.search(query, k) {
            Ok(found) => found,
            Err(e) => {
                warn!(%query, error = %e, "semantic lookup failed");
                continue;
            }
        };
        for hit in found {
            if dedup && !seen.insert(hit.content.clone()) {
                continue;
            }
            hits.push(hit);
        }
    }
    hits
}
