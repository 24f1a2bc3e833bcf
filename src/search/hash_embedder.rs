//! FNV-1a feature-hashing embedder.
//!
//! Deterministic and dependency-free: each lower-cased token (and each
//! adjacent token pair) is hashed into one of `dimension` buckets with a
//! hash-derived sign, then the vector is L2-normalized. Texts sharing words
//! land close together, which is enough for a reproducible dense signal when
//! no ML model bundle is installed.

use super::embedder::{Embedder, EmbedderError, EmbedderResult, l2_normalize};
use crate::search::canonicalize::whitespace_tokens;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Default output dimension.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

/// Weight of bigram features relative to unigrams.
const BIGRAM_WEIGHT: f32 = 0.5;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            id: format!("fnv1a-{dimension}"),
        }
    }

    fn add_feature(&self, embedding: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
        embedding[bucket] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    fn embed_sync(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedderError::InvalidConfig {
                field: "input_text".to_string(),
                value: "(empty)".to_string(),
                reason: "empty text".to_string(),
            });
        }

        let tokens = whitespace_tokens(text);
        let mut embedding = vec![0.0f32; self.dimension];
        for token in &tokens {
            self.add_feature(&mut embedding, token, 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut embedding, &bigram, BIGRAM_WEIGHT);
        }
        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        false
    }
}
