//! Shared fixtures for the integration tests
//!
//! A small imported FMEA graph, a deterministic bag-of-words embedder and
//! helpers for scripting the mock generation client.

#![allow(dead_code)]

use fmea_graph::embedding::{
    index_chunks, materialize_chunks, Embedder, EmbeddingError, InMemoryVectorIndex,
    SemanticSearch,
};
use fmea_graph::{
    GraphImporter, GraphStore, ImportRecord, MeasureKind, OpenStore, RetrievalFacade, SqliteStore,
};
use std::sync::Arc;

pub const DIMENSIONS: usize = 32;

/// Hashes each lowercase word onto one axis. Texts sharing words score high.
pub struct WordHashEmbedder;

impl WordHashEmbedder {
    fn embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSIONS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let slot = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            vector[slot % DIMENSIONS] += 1.0;
        }
        vector
    }
}

impl Embedder for WordHashEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }
}

/// Cooling pump and ignition coil, two failure chains each.
pub fn fixture_records() -> Vec<ImportRecord> {
    vec![
        ImportRecord::new("EngineBlock", "Cooling", "WaterPump", "Circulate coolant", "Leakage", "Seal wear", "Overheating")
            .with_measure("Seal inspection", MeasureKind::Preventive)
            .with_ratings(Some(8), Some(4), Some(3)),
        ImportRecord::new("EngineBlock", "Cooling", "WaterPump", "Circulate coolant", "Leakage", "Seal wear", "Overheating")
            .with_measure("Pressure test", MeasureKind::Detective)
            .with_ratings(Some(8), Some(4), Some(3)),
        ImportRecord::new("EngineBlock", "Cooling", "WaterPump", "Circulate coolant", "Blockage", "Debris", "Overheating")
            .with_measure("Coolant filter", MeasureKind::Preventive)
            .with_ratings(Some(7), Some(3), Some(5)),
        ImportRecord::new("EngineBlock", "Ignition", "Coil", "Generate spark", "No spark", "Winding short", "Misfire")
            .with_measure("Resistance check", MeasureKind::Detective)
            .with_ratings(Some(6), Some(2), Some(4)),
    ]
}

pub fn create_test_store() -> Arc<dyn GraphStore> {
    let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    GraphImporter::new(store.clone()).run(fixture_records()).unwrap();
    store
}

/// Facade over the fixture graph with its chunks embedded in memory.
pub fn create_test_facade() -> RetrievalFacade {
    let store = create_test_store();
    let chunks = materialize_chunks(store.as_ref()).unwrap();
    let embedder = Arc::new(WordHashEmbedder);
    let index = Arc::new(InMemoryVectorIndex::new());
    index_chunks(embedder.as_ref(), index.as_ref(), &chunks).unwrap();
    RetrievalFacade::new(store)
        .with_top_k(3)
        .with_semantic(SemanticSearch::new(embedder, index))
}

/// A well-formed response body for a list-shaped stage.
pub fn list_response(decision: &str, items: &str) -> String {
    format!(r#"{{"analysis_decision":"{decision}","content":{items}}}"#)
}
