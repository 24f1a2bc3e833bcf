//! Dense retriever: an [`Embedder`] paired with a document [`EmbeddingMatrix`].

use std::sync::Arc;

use tracing::debug;

use crate::model::types::DocId;
use crate::search::ann_index::HnswIndex;
use crate::search::embedder::{Embedder, EmbedderError, EmbedderResult, l2_normalize};
use crate::search::vector_index::EmbeddingMatrix;

/// Embeds query text and finds nearest documents by cosine similarity.
pub trait DenseRetriever: Send + Sync {
    /// L2-normalized query embedding.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Top-`k` `(doc_id, similarity)`, descending, ties by ascending id.
    fn search(&self, query: &[f32], k: usize) -> Vec<(DocId, f32)>;

    /// Cosine similarity between a normalized query and one document.
    fn similarity(&self, query: &[f32], doc_id: DocId) -> f32;

    /// Identity of the embedding model behind the similarities.
    fn id(&self) -> &str {
        "dense"
    }
}

/// [`DenseRetriever`] over a persisted embedding matrix, searched exactly or
/// through an in-memory HNSW graph.
pub struct EmbeddingRetriever {
    embedder: Arc<dyn Embedder>,
    matrix: Arc<EmbeddingMatrix>,
    hnsw: Option<HnswIndex>,
}

impl EmbeddingRetriever {
    /// Pair `embedder` with `matrix`; both must come from the same model.
    pub fn new(embedder: Arc<dyn Embedder>, matrix: Arc<EmbeddingMatrix>) -> EmbedderResult<Self> {
        if matrix.embedder_id() != embedder.id() {
            return Err(EmbedderError::InvalidConfig {
                field: "embedding_matrix".to_string(),
                value: matrix.embedder_id().to_string(),
                reason: format!("matrix was built with a different embedder than `{}`", embedder.id()),
            });
        }
        if matrix.dimension() != embedder.dimension() {
            return Err(EmbedderError::InvalidConfig {
                field: "dimension".to_string(),
                value: matrix.dimension().to_string(),
                reason: format!("embedder produces {} dimensions", embedder.dimension()),
            });
        }
        Ok(Self {
            embedder,
            matrix,
            hnsw: None,
        })
    }

    /// Serve searches from an HNSW graph built over the matrix.
    pub fn with_hnsw(mut self, m: usize, ef_construction: usize, ef_search: usize) -> Self {
        self.hnsw = HnswIndex::build(&self.matrix, m, ef_construction, ef_search);
        self
    }

    pub fn is_approximate(&self) -> bool {
        self.hnsw.is_some()
    }

    pub fn matrix(&self) -> &EmbeddingMatrix {
        &self.matrix
    }
}

impl DenseRetriever for EmbeddingRetriever {
    fn id(&self) -> &str {
        self.embedder.id()
    }

    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        let mut vector = self.embedder.embed_sync(text)?;
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(DocId, f32)> {
        let hits = match &self.hnsw {
            Some(index) => index.search(&self.matrix, query, k),
            None => self.matrix.search_exact(query, k),
        };
        debug!(k, returned = hits.len(), approximate = self.hnsw.is_some(), "dense search");
        hits
    }

    fn similarity(&self, query: &[f32], doc_id: DocId) -> f32 {
        self.matrix.similarity(query, doc_id)
    }
}

impl std::fmt::Debug for EmbeddingRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingRetriever")
            .field("embedder", &self.embedder.id())
            .field("documents", &self.matrix.len())
            .field("hnsw", &self.hnsw)
            .finish()
    }
}
