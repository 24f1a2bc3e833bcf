//! HNSW approximate nearest neighbour index over an [`EmbeddingMatrix`].
//!
//! The graph is rebuilt in-process from the persisted matrix; only the matrix
//! itself is written to disk. Candidate ids come from the graph, but the
//! returned similarities are recomputed exactly against the matrix so the
//! dense feature does not depend on which index served the query.
//!
//! Default parameters:
//! - M = 16 (edges per node)
//! - ef_construction = 200
//! - ef_search = 64 (tunable per query)

use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::{DistDot, Neighbour};

use crate::model::types::DocId;
use crate::search::vector_index::{EmbeddingMatrix, sort_hits};

pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_EF_SEARCH: usize = 64;

/// Maximum layers in the HNSW graph.
const DEFAULT_MAX_LAYER: usize = 16;

/// HNSW graph whose ids are row indices into the source matrix.
pub struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistDot>,
    count: usize,
    dimension: usize,
    ef_search: usize,
}

impl HnswIndex {
    /// Build the graph from every row of `matrix`. Returns `None` for an empty matrix.
    pub fn build(
        matrix: &EmbeddingMatrix,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Option<Self> {
        let count = matrix.len();
        if count == 0 {
            return None;
        }
        let dimension = matrix.dimension();

        tracing::info!(count, dimension, m, ef_construction, "Building HNSW index");

        // DistDot computes 1 - dot_product, so lower distance = higher similarity.
        let hnsw: Hnsw<f32, DistDot> =
            Hnsw::new(m, count, DEFAULT_MAX_LAYER, ef_construction, DistDot);

        let vectors: Vec<Vec<f32>> = matrix.rows().map(<[f32]>::to_vec).collect();
        let vectors_with_ids: Vec<(&Vec<f32>, usize)> = vectors
            .iter()
            .enumerate()
            .map(|(idx, vec)| (vec, idx))
            .collect();
        hnsw.parallel_insert(&vectors_with_ids);

        tracing::debug!(count, "HNSW index built");

        Some(Self {
            hnsw,
            count,
            dimension,
            ef_search: ef_search.max(1),
        })
    }

    /// Approximate top-`k` search. Similarities are exact dot products against
    /// `matrix`, ordered descending with ties by ascending id.
    pub fn search(&self, matrix: &EmbeddingMatrix, query: &[f32], k: usize) -> Vec<(DocId, f32)> {
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        let ef = self.ef_search.max(k);
        let neighbours: Vec<Neighbour> = self.hnsw.search(query, k, ef);
        let mut hits: Vec<(DocId, f32)> = neighbours
            .into_iter()
            .filter(|n| n.d_id < self.count)
            .map(|n| (n.d_id, matrix.similarity(query, n.d_id)))
            .collect();
        sort_hits(&mut hits);
        hits.dedup_by_key(|(id, _)| *id);
        hits.truncate(k);
        hits
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("count", &self.count)
            .field("dimension", &self.dimension)
            .field("ef_search", &self.ef_search)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::DocumentStore;
    use crate::model::types::Document;
    use crate::search::embedder::Embedder;
    use crate::search::hash_embedder::HashEmbedder;

    fn matrix(embedder: &HashEmbedder) -> EmbeddingMatrix {
        let docs = vec![
            Document::new(0, "Paris", "paris is the capital of france", ["cities"]),
            Document::new(1, "Lyon", "lyon sits where the rhone meets the saone", ["cities"]),
            Document::new(2, "Rust", "rust is a systems programming language", ["tech"]),
            Document::new(3, "Python", "python is a dynamic programming language", ["tech"]),
        ];
        let store = DocumentStore::new(docs).unwrap();
        EmbeddingMatrix::build(&store, embedder, 8).unwrap()
    }

    #[test]
    fn finds_the_exact_neighbour_on_a_small_corpus() {
        let embedder = HashEmbedder::new(128);
        let m = matrix(&embedder);
        let index = HnswIndex::build(&m, DEFAULT_M, DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH)
            .unwrap();
        assert_eq!(index.len(), 4);

        let q = embedder.embed_sync("paris is the capital of france").unwrap();
        let approx = index.search(&m, &q, 4);
        let exact = m.search_exact(&q, 4);
        assert_eq!(approx[0].0, 0);
        assert_eq!(approx, exact);
    }

    #[test]
    fn rebuilds_from_a_persisted_matrix() {
        let embedder = HashEmbedder::new(64);
        let m = matrix(&embedder);
        let reloaded = EmbeddingMatrix::from_bytes(&m.to_bytes().unwrap()).unwrap();
        let index = HnswIndex::build(&reloaded, 4, 16, 16).unwrap();
        let q = embedder.embed_sync("programming language").unwrap();
        let hits = index.search(&reloaded, &q, 2);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(id, _)| *id == 2 || *id == 3));
    }

    #[test]
    fn zero_k_and_bad_dimension_return_nothing() {
        let embedder = HashEmbedder::new(16);
        let m = matrix(&embedder);
        let index = HnswIndex::build(&m, 4, 32, 16).unwrap();
        assert!(index.search(&m, &[0.5; 16], 0).is_empty());
        assert!(index.search(&m, &[0.5; 3], 2).is_empty());
    }
}
