//! Relevance scorer trait and types for (query, snippet) pair scoring.
//!
//! A relevance scorer jointly looks at a query and a document snippet and
//! produces one relevance score per pair. Cross-encoders are the usual
//! implementation: more accurate than independent embeddings, and costlier.
//!
//! # Implementations
//!
//! - **Token overlap scorer**: deterministic lexical stand-in, always available.
//! - **FastEmbed reranker**: ONNX cross-encoder loaded from disk (feature `fastembed`).
//! - **Caching scorer**: memoizes any scorer per (query, snippet).
//!
//! # Example
//!
//! ```ignore
//! use crate::search::reranker::{RelevanceScorer, score_in_batches};
//!
//! let pairs = vec![("cities. capital of france", "Paris is the capital ...")];
//! let scores = score_in_batches(&scorer, &pairs, 64)?;
//! assert_eq!(scores.len(), pairs.len());
//! ```

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;

use crate::search::canonicalize::whitespace_tokens;

/// Error type for relevance scorer operations.
#[derive(Debug)]
pub enum ScorerError {
    /// The scorer is not available (e.g., model not installed).
    Unavailable(String),
    /// Failed to score the input.
    ScoreFailed(String),
    /// Input is empty or invalid.
    InvalidInput(String),
    /// Internal error in the scorer.
    Internal(String),
}

impl fmt::Display for ScorerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScorerError::Unavailable(msg) => write!(f, "relevance scorer unavailable: {msg}"),
            ScorerError::ScoreFailed(msg) => write!(f, "scoring failed: {msg}"),
            ScorerError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            ScorerError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ScorerError {}

/// Result type for relevance scorer operations.
pub type ScorerResult<T> = Result<T, ScorerError>;

/// Trait for (query, snippet) relevance scoring.
///
/// # Thread Safety
///
/// Implementations should be `Send + Sync` to allow use across threads.
pub trait RelevanceScorer: Send + Sync {
    /// Score (query, snippet) pairs.
    ///
    /// Returns one score per pair, in input order. Higher is more relevant.
    /// Scores must not depend on how pairs are grouped into calls.
    ///
    /// # Errors
    ///
    /// - [`ScorerError::InvalidInput`] if a query is empty.
    /// - [`ScorerError::Unavailable`] if the scorer is not ready.
    /// - [`ScorerError::ScoreFailed`] if scoring fails.
    fn score_pairs(&self, pairs: &[(&str, &str)]) -> ScorerResult<Vec<f32>>;

    /// Unique identifier for this scorer.
    fn id(&self) -> &str;

    /// Whether this scorer is available and ready to use.
    fn is_available(&self) -> bool;
}

/// Score `pairs` in chunks of `batch_size`, concatenating results.
pub fn score_in_batches(
    scorer: &dyn RelevanceScorer,
    pairs: &[(&str, &str)],
    batch_size: usize,
) -> ScorerResult<Vec<f32>> {
    let mut scores = Vec::with_capacity(pairs.len());
    for chunk in pairs.chunks(batch_size.max(1)) {
        let chunk_scores = scorer.score_pairs(chunk)?;
        if chunk_scores.len() != chunk.len() {
            return Err(ScorerError::Internal(format!(
                "scorer `{}` returned {} scores for {} pairs",
                scorer.id(),
                chunk_scores.len(),
                chunk.len()
            )));
        }
        scores.extend(chunk_scores);
    }
    Ok(scores)
}

/// Fraction of distinct query tokens that occur in the snippet.
///
/// A lexical stand-in for a cross-encoder: deterministic, cheap, and in
/// `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct TokenOverlapScorer;

impl TokenOverlapScorer {
    pub const ID: &'static str = "token-overlap";

    fn score_one(query: &str, snippet: &str) -> ScorerResult<f32> {
        let query_tokens: HashSet<String> = whitespace_tokens(query).into_iter().collect();
        if query_tokens.is_empty() {
            return Err(ScorerError::InvalidInput("empty query".to_string()));
        }
        let snippet_tokens: HashSet<String> = whitespace_tokens(snippet).into_iter().collect();
        let hits = query_tokens
            .iter()
            .filter(|t| snippet_tokens.contains(*t))
            .count();
        Ok(hits as f32 / query_tokens.len() as f32)
    }
}

impl RelevanceScorer for TokenOverlapScorer {
    fn score_pairs(&self, pairs: &[(&str, &str)]) -> ScorerResult<Vec<f32>> {
        pairs
            .iter()
            .map(|(query, snippet)| Self::score_one(query, snippet))
            .collect()
    }

    fn id(&self) -> &str {
        Self::ID
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Snapshot of a [`CachingScorer`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Memoizes an inner scorer per (query, snippet).
///
/// Keys are 128-bit BLAKE3 prefixes of the length-prefixed pair, so scores
/// returned from the cache equal what the inner scorer would return.
pub struct CachingScorer {
    inner: Arc<dyn RelevanceScorer>,
    cache: Mutex<LruCache<u128, f32, FxBuildHasher>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingScorer {
    pub fn new(inner: Arc<dyn RelevanceScorer>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::with_hasher(capacity, FxBuildHasher)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn key(query: &str, snippet: &str) -> u128 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(query.len() as u64).to_le_bytes());
        hasher.update(query.as_bytes());
        hasher.update(snippet.as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 16];
        prefix.copy_from_slice(&digest.as_bytes()[..16]);
        u128::from_le_bytes(prefix)
    }
}

impl RelevanceScorer for CachingScorer {
    fn score_pairs(&self, pairs: &[(&str, &str)]) -> ScorerResult<Vec<f32>> {
        let keys: Vec<u128> = pairs.iter().map(|(q, s)| Self::key(q, s)).collect();
        let mut scores: Vec<Option<f32>> = {
            let mut cache = self.cache.lock();
            keys.iter().map(|k| cache.get(k).copied()).collect()
        };

        let missing: Vec<usize> = (0..pairs.len()).filter(|&i| scores[i].is_none()).collect();
        self.hits
            .fetch_add((pairs.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses
            .fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let to_score: Vec<(&str, &str)> = missing.iter().map(|&i| pairs[i]).collect();
            let fresh = self.inner.score_pairs(&to_score)?;
            if fresh.len() != to_score.len() {
                return Err(ScorerError::Internal(format!(
                    "scorer `{}` returned {} scores for {} pairs",
                    self.inner.id(),
                    fresh.len(),
                    to_score.len()
                )));
            }
            let mut cache = self.cache.lock();
            for (&idx, score) in missing.iter().zip(fresh) {
                cache.put(keys[idx], score);
                scores[idx] = Some(score);
            }
        }

        Ok(scores.into_iter().map(|s| s.unwrap_or_default()).collect())
    }

    fn id(&self) -> &str {
        self.inner.id()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

/// Metadata about a relevance scorer for display and logging.
#[derive(Debug, Clone)]
pub struct ScorerInfo {
    pub id: String,
    pub is_available: bool,
}

impl ScorerInfo {
    pub fn from_scorer(scorer: &dyn RelevanceScorer) -> Self {
        Self {
            id: scorer.id().to_string(),
            is_available: scorer.is_available(),
        }
    }
}

impl fmt::Display for ScorerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_available {
            "available"
        } else {
            "unavailable"
        };
        write!(f, "{} ({})", self.id, status)
    }
}
