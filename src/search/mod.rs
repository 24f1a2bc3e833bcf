//! Retrieval collaborators consumed by the ranking pipeline.
//!
//! - **[`lexical`]**: BM25 Okapi inverted index.
//! - **[`embedder`]**: Embedder trait for dense retrieval (hash and ML implementations).
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic fallback).
//! - **[`fastembed_embedder`]**: FastEmbed-backed ML embedder (feature `fastembed`).
//! - **[`vector_index`]**: Normalized document embedding matrix with exact search.
//! - **[`ann_index`]**: HNSW approximate nearest neighbour search.
//! - **[`dense`]**: Dense retriever over an embedder and an embedding matrix.
//! - **[`reranker`]**: Relevance scorer trait, token-overlap scorer, LRU cache wrapper.
//! - **[`fastembed_reranker`]**: FastEmbed-backed cross-encoder (feature `fastembed`).
//! - **[`canonicalize`]**: Tokenization and snippets.

pub mod ann_index;
pub mod canonicalize;
pub mod dense;
pub mod embedder;
#[cfg(feature = "fastembed")]
pub mod fastembed_embedder;
#[cfg(feature = "fastembed")]
pub mod fastembed_reranker;
pub mod hash_embedder;
pub mod lexical;
pub mod reranker;
pub mod vector_index;
