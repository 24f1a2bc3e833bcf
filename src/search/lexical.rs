//! BM25 Okapi lexical retriever.
//!
//! Documents and queries are tokenized with
//! [`whitespace_tokens`](crate::search::canonicalize::whitespace_tokens).
//! Scores are raw BM25 values, never renormalized: the fusion model consumes
//! their absolute scale.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::DocumentStore;
use crate::model::types::DocId;
use crate::search::canonicalize::whitespace_tokens;

/// Term-frequency saturation.
pub const BM25_K1: f64 = 1.5;
/// Length normalization.
pub const BM25_B: f64 = 0.75;
/// Floor for negative idf values, as a fraction of the mean idf.
pub const BM25_EPSILON: f64 = 0.25;

/// Scores every document of the store against a token query.
pub trait LexicalRetriever: Send + Sync {
    /// One score per document, in store order.
    fn score_all(&self, tokens: &[String]) -> Vec<f64>;

    /// Scores for `ids` only, in the order given. Values equal the matching
    /// entries of [`score_all`](Self::score_all).
    fn score_subset(&self, tokens: &[String], ids: &[DocId]) -> Vec<f64> {
        let all = self.score_all(tokens);
        ids.iter()
            .map(|&id| all.get(id).copied().unwrap_or(0.0))
            .collect()
    }

    fn doc_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Posting {
    doc_id: u32,
    term_frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TermEntry {
    idf: f64,
    /// Sorted by `doc_id`.
    postings: Vec<Posting>,
}

/// Inverted BM25 index over document bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Index {
    terms: BTreeMap<String, TermEntry>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f64,
    /// Fingerprint of the corpus this index was built from.
    corpus_fingerprint: String,
}

impl Bm25Index {
    pub fn build(store: &DocumentStore) -> Self {
        let mut postings: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        let mut doc_lengths = Vec::with_capacity(store.len());
        let mut total_tokens = 0u64;

        for doc in store.documents() {
            let tokens = whitespace_tokens(&doc.body);
            doc_lengths.push(tokens.len() as u32);
            total_tokens += tokens.len() as u64;

            let mut tf: BTreeMap<String, u32> = BTreeMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (term, term_frequency) in tf {
                postings.entry(term).or_default().push(Posting {
                    doc_id: doc.id as u32,
                    term_frequency,
                });
            }
        }

        let n = store.len() as f64;
        let mut terms: BTreeMap<String, TermEntry> = postings
            .into_iter()
            .map(|(term, postings)| {
                let df = postings.len() as f64;
                let idf = (n - df + 0.5).ln() - (df + 0.5).ln();
                (term, TermEntry { idf, postings })
            })
            .collect();

        if !terms.is_empty() {
            let mean_idf = terms.values().map(|t| t.idf).sum::<f64>() / terms.len() as f64;
            let floor = BM25_EPSILON * mean_idf;
            for entry in terms.values_mut() {
                if entry.idf < 0.0 {
                    entry.idf = floor;
                }
            }
        }

        let avg_doc_length = if store.is_empty() {
            0.0
        } else {
            total_tokens as f64 / n
        };

        info!(
            documents = store.len(),
            terms = terms.len(),
            avg_doc_length,
            "Built BM25 index"
        );

        Self {
            terms,
            doc_lengths,
            avg_doc_length,
            corpus_fingerprint: store.fingerprint().to_string(),
        }
    }

    pub fn corpus_fingerprint(&self) -> &str {
        &self.corpus_fingerprint
    }

    pub fn vocabulary_size(&self) -> usize {
        self.terms.len()
    }

    fn term_weight(&self, idf: f64, tf: u32, doc_id: usize) -> f64 {
        let tf = f64::from(tf);
        let dl = f64::from(self.doc_lengths.get(doc_id).copied().unwrap_or(0));
        let length_norm = if self.avg_doc_length > 0.0 {
            1.0 - BM25_B + BM25_B * dl / self.avg_doc_length
        } else {
            1.0
        };
        idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * length_norm)
    }
}

impl LexicalRetriever for Bm25Index {
    fn score_all(&self, tokens: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.doc_lengths.len()];
        for token in tokens {
            let Some(entry) = self.terms.get(token) else {
                continue;
            };
            for posting in &entry.postings {
                let doc = posting.doc_id as usize;
                scores[doc] += self.term_weight(entry.idf, posting.term_frequency, doc);
            }
        }
        scores
    }

    fn score_subset(&self, tokens: &[String], ids: &[DocId]) -> Vec<f64> {
        let mut scores = vec![0.0; ids.len()];
        for token in tokens {
            let Some(entry) = self.terms.get(token) else {
                continue;
            };
            for (slot, &doc) in ids.iter().enumerate() {
                if let Ok(pos) = entry
                    .postings
                    .binary_search_by_key(&(doc as u32), |p| p.doc_id)
                {
                    let tf = entry.postings[pos].term_frequency;
                    scores[slot] += self.term_weight(entry.idf, tf, doc);
                }
            }
        }
        scores
    }

    fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::Document;

    fn tokens(q: &str) -> Vec<String> {
        whitespace_tokens(q)
    }

    fn build_corpus() -> Bm25Index {
        let store = DocumentStore::new(vec![
            Document::new(0, "Rust", "rust programming systems language fast", ["lang"]),
            Document::new(1, "Python", "python programming scripting easy", ["lang"]),
            Document::new(2, "Java", "java enterprise programming verbose", ["lang"]),
            Document::new(3, "Memory", "rust memory safety zero cost abstractions", ["topic"]),
            Document::new(4, "Go", "go concurrency goroutines channels", ["lang"]),
        ])
        .unwrap();
        Bm25Index::build(&store)
    }

    #[test]
    fn scores_one_value_per_document() {
        let idx = build_corpus();
        let scores = idx.score_all(&tokens("rust"));
        assert_eq!(scores.len(), 5);
        assert!(scores[0] > 0.0);
        assert!(scores[3] > 0.0);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn empty_query_scores_zero() {
        let idx = build_corpus();
        assert!(idx.score_all(&[]).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn unknown_terms_score_zero() {
        let idx = build_corpus();
        assert!(idx.score_all(&tokens("nonexistent_xyz")).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn higher_tf_ranks_first() {
        let store = DocumentStore::new(vec![
            Document::new(0, "a", "rust rust rust", Vec::<String>::new()),
            Document::new(1, "b", "rust programming", Vec::<String>::new()),
            Document::new(2, "c", "java beans", Vec::<String>::new()),
        ])
        .unwrap();
        let idx = Bm25Index::build(&store);
        let scores = idx.score_all(&tokens("rust"));
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn ubiquitous_terms_get_floored_idf() {
        // "programming" appears in 3 of 5 docs: raw idf is negative.
        let idx = build_corpus();
        let scores = idx.score_all(&tokens("programming"));
        for doc in [0, 1, 2] {
            assert!(scores[doc] > 0.0, "floored idf should stay positive");
        }
        assert_eq!(scores[3], 0.0);
    }

    #[test]
    fn subset_matches_full_scores() {
        let idx = build_corpus();
        let q = tokens("rust programming memory");
        let all = idx.score_all(&q);
        let subset = idx.score_subset(&q, &[3, 1]);
        assert_eq!(subset, vec![all[3], all[1]]);
    }

    #[test]
    fn repeated_query_tokens_accumulate() {
        let idx = build_corpus();
        let once = idx.score_all(&tokens("rust"));
        let twice = idx.score_all(&tokens("rust rust"));
        assert!((twice[0] - 2.0 * once[0]).abs() < 1e-12);
    }

    #[test]
    fn msgpack_roundtrip_preserves_scores() {
        let idx = build_corpus();
        let bytes = rmp_serde::to_vec(&idx).unwrap();
        let loaded: Bm25Index = rmp_serde::from_slice(&bytes).unwrap();
        let q = tokens("rust memory programming");
        assert_eq!(idx.score_all(&q), loaded.score_all(&q));
        assert_eq!(idx, loaded);
    }
}
