//! Context retrieval for analysis units
//!
//! Every lookup issues two independent read-only queries against a partial
//! FMEA context: a structural traversal of the graph store and a semantic
//! nearest-neighbor search over the failure mode text chunks. Both sides
//! degrade to an empty collection on failure; they never return errors.

mod question;
mod semantic;
mod structural;

pub use question::{format_question_rows, EntityMap, QuestionRow, QUESTION_ROW_LIMIT};
pub use semantic::semantic_queries;

use crate::embedding::{SearchHit, SemanticSearch};
use crate::storage::GraphStore;
use crate::table::TableRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_TOP_K: usize = 10;

/// A partial FMEA context: the unit of analysis and the shape of structural rows.
///
/// Serializes with PascalCase keys. Absent names serialize as null; empty
/// measure lists and absent ratings are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChainContext {
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub subsystem: Option<String>,
    #[serde(default)]
    pub system_element: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub failure_mode: Option<String>,
    #[serde(default)]
    pub failure_cause: Option<String>,
    #[serde(default)]
    pub failure_effect: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preventive_measure: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detective_measure: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<u32>,
}

/// Row returned by a structural lookup
pub type GraphRecord = ChainContext;

fn some(s: &str) -> Option<String> {
    Some(s.to_string())
}

impl ChainContext {
    /// Context of one system element.
    pub fn element(product: &str, subsystem: &str, system_element: &str) -> Self {
        Self {
            product: some(product),
            subsystem: some(subsystem),
            system_element: some(system_element),
            ..Default::default()
        }
    }

    /// Context of one function.
    pub fn function(product: &str, subsystem: &str, system_element: &str, function: &str) -> Self {
        Self {
            function: some(function),
            ..Self::element(product, subsystem, system_element)
        }
    }

    /// A complete failure chain.
    pub fn chain(
        product: &str,
        subsystem: &str,
        system_element: &str,
        function: &str,
        failure_mode: &str,
        failure_cause: &str,
        failure_effect: &str,
    ) -> Self {
        Self {
            failure_mode: some(failure_mode),
            failure_cause: some(failure_cause),
            failure_effect: some(failure_effect),
            ..Self::function(product, subsystem, system_element, function)
        }
    }

    /// The names, measures and ratings of a table row.
    pub fn from_row(row: &TableRow) -> Self {
        Self {
            product: row.product.clone(),
            subsystem: row.subsystem.clone(),
            system_element: row.system_element.clone(),
            function: row.function.clone(),
            failure_mode: row.failure_mode.clone(),
            failure_cause: row.failure_cause.clone(),
            failure_effect: row.failure_effect.clone(),
            preventive_measure: row.preventive_measure.iter().cloned().collect(),
            detective_measure: row.detective_measure.iter().cloned().collect(),
            severity: row.severity,
            occurrence: row.occurrence,
            detection: row.detection,
        }
    }

    pub fn with_measures(mut self, preventive: Vec<String>, detective: Vec<String>) -> Self {
        self.preventive_measure = preventive;
        self.detective_measure = detective;
        self
    }

    pub fn with_ratings(
        mut self,
        severity: Option<u32>,
        occurrence: Option<u32>,
        detection: Option<u32>,
    ) -> Self {
        self.severity = severity;
        self.occurrence = occurrence;
        self.detection = detection;
        self
    }

    /// The seven context names in hierarchy order.
    pub fn names(&self) -> [Option<&str>; 7] {
        [
            self.product.as_deref(),
            self.subsystem.as_deref(),
            self.system_element.as_deref(),
            self.function.as_deref(),
            self.failure_mode.as_deref(),
            self.failure_cause.as_deref(),
            self.failure_effect.as_deref(),
        ]
    }
}

/// Which lookup a pipeline stage needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupStage {
    Functions,
    Failures,
    Measures,
    Ratings,
}

/// The two independent result collections of one lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieved {
    pub structural: Vec<GraphRecord>,
    pub semantic: Vec<SearchHit>,
}

/// Structural and semantic lookups over a shared graph store.
///
/// Cheap to clone; lookups are synchronous and meant to run on blocking
/// worker threads.
#[derive(Clone)]
pub struct RetrievalFacade {
    store: Arc<dyn GraphStore>,
    semantic: Option<SemanticSearch>,
    top_k: usize,
}

impl RetrievalFacade {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            semantic: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_semantic(mut self, semantic: SemanticSearch) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Structural lookup; failures are logged and yield no rows.
    pub fn structural(&self, stage: LookupStage, ctx: &ChainContext) -> Vec<GraphRecord> {
        let store = self.store.as_ref();
        let result = match stage {
            LookupStage::Functions => structural::functions_for_element(store, ctx),
            LookupStage::Failures => structural::failures_for_function(store, ctx),
            LookupStage::Measures => structural::measures_for_cause(store, ctx),
            LookupStage::Ratings => structural::ratings_for_chain(store, ctx),
        };
        result.unwrap_or_else(|e| {
            warn!(?stage, error = %e, "structural lookup failed");
            Vec::new()
        })
    }

    /// Semantic lookup; hits from later queries are dropped when their
    /// content was already returned, for stages that issue several queries.
    pub fn semantic(&self, stage: LookupStage, ctx: &ChainContext) -> Vec<SearchHit> {
        let Some(search) = &self.semantic else {
            return Vec::new();
        };
        let queries = semantic_queries(stage, ctx);
        semantic::run_queries(search, &queries, self.top_k, queries.len() > 1)
    }

    fn lookup(&self, stage: LookupStage, ctx: &ChainContext) -> Retrieved {
        Retrieved {
            structural: self.structural(stage, ctx),
            semantic: self.semantic(stage, ctx),
        }
    }

    pub fn functions_for_element(&self, ctx: &ChainContext) -> Retrieved {
        self.lookup(LookupStage::Functions, ctx)
    }

    pub fn failures_for_function(&self, ctx: &ChainContext) -> Retrieved {
        self.lookup(LookupStage::Failures, ctx)
    }

    pub fn measures_for_cause(&self, ctx: &ChainContext) -> Retrieved {
        self.lookup(LookupStage::Measures, ctx)
    }

    pub fn ratings_for_chain(&self, ctx: &ChainContext) -> Retrieved {
        self.lookup(LookupStage::Ratings, ctx)
    }

    /// Entity-driven lookup for a free question.
    ///
    /// The structural side is formatted into rows keyed by node type; the
    /// semantic side searches the raw question.
    pub fn question(&self, entities: &EntityMap, question: &str) -> (Vec<Value>, Vec<SearchHit>) {
        let rows = question::question_rows(self.store.as_ref(), entities).unwrap_or_else(|e| {
            warn!(error = %e, "question lookup failed");
            Vec::new()
        });
        let hits = match &self.semantic {
            Some(search) => semantic::run_queries(search, &[question.to_string()], self.top_k, false),
            None => Vec::new(),
        };
        (format_question_rows(&rows), hits)
    }
}
