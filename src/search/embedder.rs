//! Embedder trait and types for dense retrieval.
//!
//! All embedding implementations satisfy [`Embedder`], a synchronous interface
//! that is safe to share across ranking worker threads.
//!
//! # Implementations
//!
//! - **Hash embedder**: FNV-1a feature hashing (always available, deterministic)
//! - **ML embedder**: FastEmbed ONNX bundle loaded from disk (feature `fastembed`)

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Errors at the embedder boundary.
#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("embedder `{model}` unavailable: {reason}")]
    EmbedderUnavailable { model: String, reason: String },

    #[error("embedding with `{model}` failed: {source}")]
    EmbeddingFailed {
        model: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("invalid embedder input `{field}` ({value}): {reason}")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    #[error("{subsystem} error: {source}")]
    SubsystemError {
        subsystem: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Result type for embedder operations.
pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// Text-to-vector model.
///
/// Implementations must be `Send + Sync`; ranking workers share one instance.
pub trait Embedder: Send + Sync {
    /// Embed one text. Output has [`dimension`](Self::dimension) entries.
    fn embed_sync(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Embed many texts, one vector per input in input order.
    ///
    /// Results must not depend on how callers split their batches.
    fn embed_batch_sync(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed_sync(text)).collect()
    }

    fn dimension(&self) -> usize;

    /// Stable identifier, used to name persisted embedding matrices.
    fn id(&self) -> &str;

    /// Whether it's a semantic (ML) embedder.
    fn is_semantic(&self) -> bool;
}

/// Scale `embedding` to unit length in place.
///
/// Zero, NaN or infinite norms zero the vector so it cannot poison similarity.
pub fn l2_normalize(embedding: &mut [f32]) {
    let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
    if norm_sq.is_finite() && norm_sq > f32::EPSILON {
        let inv_norm = 1.0 / norm_sq.sqrt();
        for v in embedding.iter_mut() {
            *v *= inv_norm;
        }
    } else {
        embedding.fill(0.0);
    }
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Metadata about an embedder for display and logging.
#[derive(Debug, Clone)]
pub struct EmbedderInfo {
    pub id: String,
    pub dimension: usize,
    pub is_semantic: bool,
}

impl EmbedderInfo {
    pub fn from_embedder(embedder: &dyn Embedder) -> Self {
        Self {
            id: embedder.id().to_string(),
            dimension: embedder.dimension(),
            is_semantic: embedder.is_semantic(),
        }
    }
}

impl fmt::Display for EmbedderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_semantic {
            "semantic"
        } else {
            "lexical"
        };
        write!(f, "{} ({}, {} dims)", self.id, kind, self.dimension)
    }
}
