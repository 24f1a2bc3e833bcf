//! Normalized entity structs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::features::FeatureVector;

/// Stable document identifier: the document's position in the store.
pub type DocId = usize;

/// Compare two answer titles the way the evaluator and the trainer do.
pub fn titles_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// One corpus page. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    /// Answer key, compared case-insensitively.
    pub title: String,
    pub body: String,
    /// Lower-cased category labels.
    pub categories: BTreeSet<String>,
    /// Lower-cased section headers, in page order.
    #[serde(default)]
    pub section_headers: Vec<String>,
}

impl Document {
    pub fn new<I, S>(id: DocId, title: impl Into<String>, body: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            categories: categories
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            section_headers: Vec::new(),
        }
    }

    pub fn with_section_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.section_headers = headers
            .into_iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// A clue with its category hint.
///
/// `expected_title` is only present for training and evaluation sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub category_hint: String,
    pub clue_text: String,
    #[serde(default)]
    pub expected_title: Option<String>,
}

impl Query {
    pub fn new(category_hint: impl AsRef<str>, clue_text: impl Into<String>) -> Self {
        Self {
            category_hint: category_hint.as_ref().trim().to_lowercase(),
            clue_text: clue_text.into(),
            expected_title: None,
        }
    }

    pub fn with_expected(mut self, title: impl Into<String>) -> Self {
        self.expected_title = Some(title.into());
        self
    }

    /// Text handed to the embedder and the relevance scorer: `"{category}. {clue}"`.
    pub fn query_text(&self) -> String {
        format!("{}. {}", self.category_hint, self.clue_text)
    }

    /// Lower-cased whitespace tokens of the clue (lexical query and title overlap).
    pub fn clue_tokens(&self) -> Vec<String> {
        crate::search::canonicalize::whitespace_tokens(&self.clue_text)
    }

    /// Binary training label for a candidate title.
    pub fn label_for(&self, title: &str) -> bool {
        self.expected_title
            .as_deref()
            .is_some_and(|expected| titles_match(expected, title))
    }
}

/// A fused candidate with its assembled features. Query-scoped.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub doc_id: DocId,
    pub title: String,
    pub features: FeatureVector,
}

/// One row of a ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub doc_id: DocId,
    pub title: String,
    pub probability: f64,
}

/// Candidates for one query, descending by probability.
///
/// Ties keep the fused-candidate order (stable sort).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub entries: Vec<RankedEntry>,
}

impl RankedResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn top_title(&self) -> Option<&str> {
        self.entries.first().map(|e| e.title.as_str())
    }

    /// 1-based rank of the first entry matching `title` within the top `k`.
    pub fn rank_of(&self, title: &str, k: usize) -> Option<usize> {
        self.entries
            .iter()
            .take(k)
            .position(|e| titles_match(&e.title, title))
            .map(|idx| idx + 1)
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.title.as_str())
    }
}

impl fmt::Display for RankedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, entry) in self.entries.iter().enumerate() {
            writeln!(f, "{:>3}. {} ({:.4})", idx + 1, entry.title, entry.probability)?;
        }
        Ok(())
    }
}
