//! Document store and category index.
//!
//! Both are built once per process and shared read-only (behind `Arc`) by
//! every worker that ranks queries.

pub mod loader;

use std::collections::{BTreeSet, HashMap};

use crate::error::{RankError, RankResult};
use crate::model::types::{DocId, Document, Query};

/// Ordered, immutable document collection. `documents()[i].id == i`.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    documents: Vec<Document>,
    fingerprint: String,
}

impl DocumentStore {
    /// Build a store, renumbering ids to positions.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::EmptyCorpus`] when `documents` is empty.
    pub fn new(documents: Vec<Document>) -> RankResult<Self> {
        if documents.is_empty() {
            return Err(RankError::EmptyCorpus);
        }
        let documents: Vec<Document> = documents
            .into_iter()
            .enumerate()
            .map(|(id, doc)| Document { id, ..doc })
            .collect();
        let fingerprint = corpus_fingerprint(&documents);
        Ok(Self {
            documents,
            fingerprint,
        })
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, id: DocId) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// BLAKE3 digest over every document; persisted artifacts are keyed on it.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn corpus_fingerprint(documents: &[Document]) -> String {
    let mut hasher = blake3::Hasher::new();
    for doc in documents {
        hasher.update(&(doc.id as u64).to_le_bytes());
        for field in [doc.title.as_str(), doc.body.as_str()] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        for labels in [
            doc.categories.iter().map(String::as_str).collect::<Vec<_>>(),
            doc.section_headers.iter().map(String::as_str).collect(),
        ] {
            hasher.update(&(labels.len() as u64).to_le_bytes());
            for label in labels {
                hasher.update(&(label.len() as u64).to_le_bytes());
                hasher.update(label.as_bytes());
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// BLAKE3 digest over a question set, in order. Stored models remember the
/// set they were trained on.
pub fn question_set_fingerprint(queries: &[Query]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(queries.len() as u64).to_le_bytes());
    for query in queries {
        hasher.update(&[u8::from(query.expected_title.is_some())]);
        for field in [
            query.category_hint.as_str(),
            query.clue_text.as_str(),
            query.expected_title.as_deref().unwrap_or_default(),
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Category label -> ids of documents carrying it.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    by_category: HashMap<String, BTreeSet<DocId>>,
}

static EMPTY_POOL: BTreeSet<DocId> = BTreeSet::new();

impl CategoryIndex {
    pub fn build(store: &DocumentStore) -> Self {
        let mut by_category: HashMap<String, BTreeSet<DocId>> = HashMap::new();
        for doc in store.documents() {
            for category in &doc.categories {
                by_category
                    .entry(category.clone())
                    .or_default()
                    .insert(doc.id);
            }
        }
        Self { by_category }
    }

    /// Documents tagged with `category`. Unknown categories yield an empty set.
    pub fn docs_for(&self, category: &str) -> &BTreeSet<DocId> {
        self.by_category.get(category).unwrap_or(&EMPTY_POOL)
    }

    pub fn category_count(&self) -> usize {
        self.by_category.len()
    }
}
