//! Text chunks, embedders and vector indexes for semantic lookup
//!
//! Each failure mode context in the graph is summarized as one narrative
//! text chunk (see [`chunk`]). Chunks are embedded through the [`Embedder`]
//! trait and stored in a [`VectorIndex`], so production code can use
//! fastembed-rs with sqlite-vec while tests use deterministic mocks and the
//! in-memory index.

pub mod chunk;
mod sqlite_vec;

pub use chunk::{
    failure_mode_contexts, index_chunks, materialize_chunks, text_chunk, CauseContext,
    EffectContext, FailureModeContext,
};
#[cfg(feature = "embeddings")]
pub use sqlite_vec::{SqliteVecIndex, DEFAULT_EMBEDDING_DIMENSIONS};

use crate::graph::Properties;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Error type for embedding and vector index operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding model returned no results
    #[error("embedding returned no results")]
    EmptyResult,
    /// Model loading or inference failed
    #[error("embedding model error: {0}")]
    ModelError(String),
    /// The vector index rejected a read or write
    #[error("vector index error: {0}")]
    Index(String),
}

/// Trait for embedding text into vectors.
///
/// Implementations handle model loading and inference.
/// fastembed-rs for production, mock for tests.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// One ranked nearest-neighbor result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// The indexed text
    pub content: String,
    /// Cosine similarity to the query
    pub score: f32,
    pub metadata: Properties,
}

/// Trait for storing and querying embedding vectors.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the entry with this id.
    fn upsert(
        &self,
        id: &str,
        content: &str,
        metadata: Properties,
        vector: Vec<f32>,
    ) -> Result<(), EmbeddingError>;

    /// The `k` entries most similar to `query`, best first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, EmbeddingError>;

    fn clear(&self) -> Result<(), EmbeddingError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct IndexedEntry {
    id: String,
    content: String,
    metadata: Properties,
    vector: Vec<f32>,
}

/// In-memory vector index.
///
/// Thread-safe via RwLock. Brute-force cosine scan; fine for the few
/// thousand failure mode chunks a single analysis produces.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<IndexedEntry>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn upsert(
        &self,
        id: &str,
        content: &str,
        metadata: Properties,
        vector: Vec<f32>,
    ) -> Result<(), EmbeddingError> {
        let mut entries = self.entries.write().unwrap();
        let entry = IndexedEntry {
            id: id.to_string(),
            content: content.to_string(),
            metadata,
            vector,
        };
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, EmbeddingError> {
        let entries = self.entries.read().unwrap();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|e| SearchHit {
                content: e.content.clone(),
                score: cosine_similarity(query, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn clear(&self) -> Result<(), EmbeddingError> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

/// Embedder plus index: text in, ranked hits out.
#[derive(Clone)]
pub struct SemanticSearch {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl SemanticSearch {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, EmbeddingError> {
        let mut vectors = self.embedder.embed_batch(&[text])?;
        let query = vectors.pop().ok_or(EmbeddingError::EmptyResult)?;
        self.index.search(&query, k)
    }
}

// ---------------------------------------------------------------------------
// FastEmbedEmbedder: production embedder behind the `embeddings` feature
// ---------------------------------------------------------------------------

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{Embedder, EmbeddingError};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Production embedder backed by fastembed (ONNX Runtime).
    ///
    /// `TextEmbedding::embed` needs `&mut self`, hence the mutex.
    pub struct FastEmbedEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedEmbedder {
        pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(embedding),
            })
        }

        /// mxbai-embed-large, 1024 dimensions
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::MxbaiEmbedLargeV1)
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self.model.lock().unwrap();
            let embeddings = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            if embeddings.is_empty() {
                return Err(EmbeddingError::EmptyResult);
            }
            Ok(embeddings)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;

    /// Maps a handful of keywords to fixed axes.
    struct KeywordEmbedder;

    impl Embedder for KeywordEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("leak") { 1.0 } else { 0.0 },
                        if t.contains("spark") { 1.0 } else { 0.0 },
                        0.1,
                    ]
                })
                .collect())
        }
    }

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn in_memory_search_ranks_and_truncates() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", "alpha", Properties::new(), vec![1.0, 0.0]).unwrap();
        index.upsert("b", "beta", Properties::new(), vec![0.7, 0.7]).unwrap();
        index.upsert("c", "gamma", Properties::new(), vec![0.0, 1.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "alpha");
        assert_eq!(hits[1].content, "beta");
    }

    #[test]
    fn upsert_replaces_same_id() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", "old", Properties::new(), vec![1.0]).unwrap();
        index.upsert("a", "new", Properties::new(), vec![1.0]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.search(&[1.0], 5).unwrap()[0].content, "new");

        index.clear().unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn semantic_search_embeds_the_query_text() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let mut meta = Properties::new();
        meta.insert("failure_mode_id".into(), PropertyValue::Int(1));
        index
            .upsert("1", "Leak at the seal", meta, vec![1.0, 0.0, 0.1])
            .unwrap();
        index
            .upsert("2", "Weak spark", Properties::new(), vec![0.0, 1.0, 0.1])
            .unwrap();

        let search = SemanticSearch::new(Arc::new(KeywordEmbedder), index);
        let hits = search.search("coolant leak", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Leak at the seal");
        assert_eq!(hits[0].metadata["failure_mode_id"], PropertyValue::Int(1));
    }
}
