//! Category policy: how a query's category hint shapes lexical scoring and the
//! dense candidate pool.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::types::DocId;
use crate::search::lexical::LexicalRetriever;

/// Bonus added to the lexical score of in-category documents under `boost`.
pub const DEFAULT_BOOST_BONUS: f64 = 1.0;

fn default_bonus() -> f64 {
    DEFAULT_BOOST_BONUS
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CategoryPolicy {
    /// Add `bonus` to the selection score of every in-category document.
    /// The candidate pool stays unrestricted.
    Boost {
        #[serde(default = "default_bonus")]
        bonus: f64,
    },
    /// Score only in-category documents, falling back to the whole corpus when
    /// the category has none. Dense hits are post-filtered to the same pool.
    Filter,
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self::Boost {
            bonus: DEFAULT_BOOST_BONUS,
        }
    }
}

impl fmt::Display for CategoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boost { bonus } => write!(f, "boost({bonus})"),
            Self::Filter => write!(f, "filter"),
        }
    }
}

impl FromStr for CategoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boost" => Ok(Self::default()),
            "filter" => Ok(Self::Filter),
            other => Err(format!("unknown category policy `{other}` (expected boost|filter)")),
        }
    }
}

/// Lexical scores for one query after the policy has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalView {
    /// Retriever score per document, unmodified. Documents outside a
    /// restricted pool are never scored and read 0.0.
    pub raw: Vec<f64>,
    /// Score used to pick the top lexical candidates.
    pub selection: Vec<f64>,
    /// Documents eligible for lexical selection; `None` means all.
    pub eligible: Option<Vec<DocId>>,
    /// Set when `filter` found an empty pool and scored the whole corpus.
    pub fell_back: bool,
}

impl CategoryPolicy {
    /// Score `tokens` against the corpus under this policy.
    ///
    /// `pool` is the set of documents tagged with the query's category.
    pub fn lexical_view(
        &self,
        retriever: &dyn LexicalRetriever,
        tokens: &[String],
        pool: &BTreeSet<DocId>,
    ) -> LexicalView {
        match *self {
            Self::Boost { bonus } => {
                let raw = retriever.score_all(tokens);
                let mut selection = raw.clone();
                for &id in pool {
                    if let Some(score) = selection.get_mut(id) {
                        *score += bonus;
                    }
                }
                LexicalView {
                    raw,
                    selection,
                    eligible: None,
                    fell_back: false,
                }
            }
            Self::Filter if pool.is_empty() => {
                debug!("category pool empty; scoring full corpus");
                let raw = retriever.score_all(tokens);
                LexicalView {
                    selection: raw.clone(),
                    raw,
                    eligible: None,
                    fell_back: true,
                }
            }
            Self::Filter => {
                let ids: Vec<DocId> = pool.iter().copied().collect();
                let subset = retriever.score_subset(tokens, &ids);
                let mut raw = vec![0.0; retriever.doc_count()];
                for (&id, score) in ids.iter().zip(subset) {
                    if let Some(slot) = raw.get_mut(id) {
                        *slot = score;
                    }
                }
                LexicalView {
                    selection: raw.clone(),
                    raw,
                    eligible: Some(ids),
                    fell_back: false,
                }
            }
        }
    }

    /// Restrict dense hits to `pool` under `filter` when the pool is non-empty.
    pub fn filter_dense(
        &self,
        mut hits: Vec<(DocId, f32)>,
        pool: &BTreeSet<DocId>,
    ) -> Vec<(DocId, f32)> {
        if matches!(self, Self::Filter) && !pool.is_empty() {
            hits.retain(|(id, _)| pool.contains(id));
        }
        hits
    }
}
