//! Named, versioned feature schema and the assembler that fills it.
//!
//! Training and serving both build vectors through [`FeatureAssembler`], and a
//! [`FusionModel`](crate::pipeline::ranker::FusionModel) remembers the schema it
//! was fitted on, so a reordered or resized vector is rejected instead of being
//! scored.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::FeatureToggles;
use crate::error::{RankError, RankResult};
use crate::model::types::{Document, Query};
use crate::search::canonicalize::{snippet, title_token_set};

/// Bumped whenever the meaning of an existing slot changes.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// One feature slot. Declaration order is the canonical slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Raw lexical retriever score.
    LexicalScore,
    /// Cosine similarity of query and document embeddings.
    DenseSimilarity,
    /// Relevance scorer output for (query text, body snippet).
    RelevanceScore,
    /// 1.0 when the query's category is one of the document's categories.
    CategoryMatch,
    /// Clue tokens found in the title's token set, duplicates counted.
    TitleOverlap,
    /// Clue tokens found in each section header's words, summed over headers.
    /// Off unless switched on.
    HeaderOverlap,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::LexicalScore,
        FeatureKind::DenseSimilarity,
        FeatureKind::RelevanceScore,
        FeatureKind::CategoryMatch,
        FeatureKind::TitleOverlap,
        FeatureKind::HeaderOverlap,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            Self::LexicalScore => "lex",
            Self::DenseSimilarity => "dense",
            Self::RelevanceScore => "rel",
            Self::CategoryMatch => "cat",
            Self::TitleOverlap => "title",
            Self::HeaderOverlap => "hdr",
        }
    }

    /// Slots that configuration may switch off.
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            Self::RelevanceScore | Self::TitleOverlap | Self::HeaderOverlap
        )
    }
}

/// Ordered feature slots plus a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSchema {
    version: u32,
    features: Vec<FeatureKind>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::full()
    }
}

impl FeatureSchema {
    /// The default five slots in canonical order.
    pub fn full() -> Self {
        Self::from_toggles(FeatureToggles::default())
    }

    /// Canonical schema minus the optional slots switched off in `toggles`.
    pub fn from_toggles(toggles: FeatureToggles) -> Self {
        let features = FeatureKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                FeatureKind::RelevanceScore => toggles.relevance_score,
                FeatureKind::TitleOverlap => toggles.title_overlap,
                FeatureKind::HeaderOverlap => toggles.header_overlap,
                _ => true,
            })
            .collect();
        Self {
            version: FEATURE_SCHEMA_VERSION,
            features,
        }
    }

    /// Explicit slot list. Slots must be distinct, in canonical order, and
    /// include every mandatory kind.
    pub fn new(version: u32, features: Vec<FeatureKind>) -> RankResult<Self> {
        if !features.windows(2).all(|w| w[0] < w[1]) {
            return Err(RankError::InvalidConfig(
                "feature slots must be distinct and in canonical order".into(),
            ));
        }
        if let Some(missing) = FeatureKind::ALL
            .into_iter()
            .find(|kind| !kind.is_optional() && !features.contains(kind))
        {
            return Err(RankError::InvalidConfig(format!(
                "feature schema is missing mandatory slot `{}`",
                missing.short_name()
            )));
        }
        Ok(Self { version, features })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn features(&self) -> &[FeatureKind] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn contains(&self, kind: FeatureKind) -> bool {
        self.features.contains(&kind)
    }

    pub fn position(&self, kind: FeatureKind) -> Option<usize> {
        self.features.iter().position(|k| *k == kind)
    }

    /// Human-readable identity, e.g. `v1:lex,dense,rel,cat,title`.
    pub fn id(&self) -> String {
        let names: Vec<&str> = self.features.iter().map(|k| k.short_name()).collect();
        format!("v{}:{}", self.version, names.join(","))
    }

    /// File-name safe identity, e.g. `v1-lex-dense-rel-cat-title`.
    pub fn slug(&self) -> String {
        let mut slug = format!("v{}", self.version);
        for kind in &self.features {
            slug.push('-');
            slug.push_str(kind.short_name());
        }
        slug
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Feature values tagged with the schema that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: Arc<FeatureSchema>,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Pair `values` with `schema`; lengths must agree.
    pub fn new(schema: Arc<FeatureSchema>, values: Vec<f64>) -> RankResult<Self> {
        if values.len() != schema.len() {
            return Err(RankError::SchemaMismatch {
                expected: schema.id(),
                found: format!("{} values", values.len()),
            });
        }
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, kind: FeatureKind) -> Option<f64> {
        self.schema.position(kind).map(|i| self.values[i])
    }
}

/// Per-candidate inputs from the retrievers and scorer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CandidateSignals {
    pub lexical_score: f64,
    pub dense_similarity: f64,
    pub relevance_score: f64,
    pub category_match: bool,
    pub title_overlap: usize,
    pub header_overlap: usize,
}

/// Number of `clue_tokens` present in `title`'s token set, duplicates counted.
pub fn title_overlap(clue_tokens: &[String], title_tokens: &HashSet<String>) -> usize {
    clue_tokens
        .iter()
        .filter(|t| title_tokens.contains(t.as_str()))
        .count()
}

/// Sum over `headers` of the `clue_tokens` present in that header's words.
pub fn header_overlap(clue_tokens: &[String], headers: &[String]) -> usize {
    headers
        .iter()
        .map(|header| {
            let words: HashSet<&str> = header.split_whitespace().collect();
            clue_tokens
                .iter()
                .filter(|t| words.contains(t.as_str()))
                .count()
        })
        .sum()
}

/// Builds feature vectors for one schema.
#[derive(Debug, Clone)]
pub struct FeatureAssembler {
    schema: Arc<FeatureSchema>,
    snippet_words: usize,
}

impl FeatureAssembler {
    pub fn new(schema: FeatureSchema, snippet_words: usize) -> Self {
        Self {
            schema: Arc::new(schema),
            snippet_words,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Whether the relevance scorer has to be called at all.
    pub fn needs_relevance(&self) -> bool {
        self.schema.contains(FeatureKind::RelevanceScore)
    }

    /// Body prefix handed to the relevance scorer.
    pub fn snippet(&self, doc: &Document) -> String {
        snippet(&doc.body, self.snippet_words)
    }

    /// Gather the query/document signals that do not need an external call.
    pub fn signals(
        &self,
        query: &Query,
        clue_tokens: &[String],
        doc: &Document,
        lexical_score: f64,
        dense_similarity: f64,
        relevance_score: f64,
    ) -> CandidateSignals {
        let title_overlap = if self.schema.contains(FeatureKind::TitleOverlap) {
            title_overlap(clue_tokens, &title_token_set(&doc.title))
        } else {
            0
        };
        let header_overlap = if self.schema.contains(FeatureKind::HeaderOverlap) {
            header_overlap(clue_tokens, &doc.section_headers)
        } else {
            0
        };
        CandidateSignals {
            lexical_score,
            dense_similarity,
            relevance_score,
            category_match: doc.has_category(&query.category_hint),
            title_overlap,
            header_overlap,
        }
    }

    /// Lay `signals` out in schema order.
    pub fn assemble(&self, signals: &CandidateSignals) -> FeatureVector {
        let values = self
            .schema
            .features()
            .iter()
            .map(|kind| match kind {
                FeatureKind::LexicalScore => signals.lexical_score,
                FeatureKind::DenseSimilarity => signals.dense_similarity,
                FeatureKind::RelevanceScore => signals.relevance_score,
                FeatureKind::CategoryMatch => {
                    if signals.category_match {
                        1.0
                    } else {
                        0.0
                    }
                }
                FeatureKind::TitleOverlap => signals.title_overlap as f64,
                FeatureKind::HeaderOverlap => signals.header_overlap as f64,
            })
            .collect();
        FeatureVector {
            schema: Arc::clone(&self.schema),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> CandidateSignals {
        CandidateSignals {
            lexical_score: 2.0,
            dense_similarity: 0.9,
            relevance_score: 0.8,
            category_match: true,
            title_overlap: 1,
            header_overlap: 2,
        }
    }

    #[test]
    fn full_schema_has_five_slots_in_order() {
        let schema = FeatureSchema::full();
        assert_eq!(schema.len(), 5);
        assert_eq!(schema.id(), "v1:lex,dense,rel,cat,title");
        assert_eq!(schema.slug(), "v1-lex-dense-rel-cat-title");

        let v = FeatureAssembler::new(schema, 500).assemble(&signals());
        assert_eq!(v.values(), &[2.0, 0.9, 0.8, 1.0, 1.0]);
    }

    #[test]
    fn toggles_drop_optional_slots_and_change_identity() {
        let schema = FeatureSchema::from_toggles(FeatureToggles {
            relevance_score: false,
            ..Default::default()
        });
        assert_eq!(schema.id(), "v1:lex,dense,cat,title");
        assert_ne!(schema, FeatureSchema::full());

        let assembler = FeatureAssembler::new(schema, 500);
        assert!(!assembler.needs_relevance());
        let v = assembler.assemble(&signals());
        assert_eq!(v.values(), &[2.0, 0.9, 1.0, 1.0]);
        assert_eq!(v.get(FeatureKind::RelevanceScore), None);
        assert_eq!(v.get(FeatureKind::CategoryMatch), Some(1.0));
    }

    #[test]
    fn header_overlap_is_an_opt_in_trailing_slot() {
        let schema = FeatureSchema::from_toggles(FeatureToggles {
            header_overlap: true,
            ..Default::default()
        });
        assert_eq!(schema.id(), "v1:lex,dense,rel,cat,title,hdr");
        assert_eq!(schema.slug(), "v1-lex-dense-rel-cat-title-hdr");
        assert_ne!(schema, FeatureSchema::full());
        assert!(!FeatureSchema::full().contains(FeatureKind::HeaderOverlap));

        let v = FeatureAssembler::new(schema, 500).assemble(&signals());
        assert_eq!(v.values(), &[2.0, 0.9, 0.8, 1.0, 1.0, 2.0]);
        assert_eq!(v.get(FeatureKind::HeaderOverlap), Some(2.0));
    }

    #[test]
    fn header_overlap_sums_over_headers() {
        let headers = vec!["early history".to_string(), "history of art".to_string()];
        let clue: Vec<String> = ["history", "art", "history"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(header_overlap(&clue, &headers), 5);
        assert_eq!(header_overlap(&clue, &[]), 0);
    }

    #[test]
    fn signals_count_header_overlap_only_when_enabled() {
        let doc = Document::new(0, "Paris", "paris is the capital", ["cities"])
            .with_section_headers(["History", "Culture and art"]);
        let query = Query::new("cities", "its history and art");
        let tokens = query.clue_tokens();

        let on = FeatureAssembler::new(
            FeatureSchema::from_toggles(FeatureToggles {
                header_overlap: true,
                ..Default::default()
            }),
            10,
        );
        assert_eq!(on.signals(&query, &tokens, &doc, 0.0, 0.0, 0.0).header_overlap, 3);

        let off = FeatureAssembler::new(FeatureSchema::full(), 10);
        assert_eq!(off.signals(&query, &tokens, &doc, 0.0, 0.0, 0.0).header_overlap, 0);
    }

    #[test]
    fn explicit_schema_must_be_canonical() {
        use FeatureKind::*;
        assert!(FeatureSchema::new(1, vec![LexicalScore, DenseSimilarity, CategoryMatch]).is_ok());
        assert!(FeatureSchema::new(1, vec![DenseSimilarity, LexicalScore, CategoryMatch]).is_err());
        assert!(FeatureSchema::new(1, vec![LexicalScore, CategoryMatch]).is_err());
        assert!(
            FeatureSchema::new(1, vec![LexicalScore, LexicalScore, DenseSimilarity, CategoryMatch])
                .is_err()
        );
    }

    #[test]
    fn vector_length_must_match_schema() {
        let schema = Arc::new(FeatureSchema::full());
        assert!(FeatureVector::new(Arc::clone(&schema), vec![0.0; 5]).is_ok());
        assert!(matches!(
            FeatureVector::new(schema, vec![0.0; 4]),
            Err(RankError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn title_overlap_counts_duplicate_clue_tokens() {
        let title = title_token_set("The Rhone River");
        let clue: Vec<String> = ["the", "river", "the", "seine"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(title_overlap(&clue, &title), 3);
    }

    #[test]
    fn signals_use_category_hint_and_title() {
        let assembler = FeatureAssembler::new(FeatureSchema::full(), 3);
        let doc = Document::new(0, "Paris", "paris is the capital of france", ["Cities"]);
        let query = Query::new("cities", "this capital of france");
        let s = assembler.signals(&query, &query.clue_tokens(), &doc, 1.5, 0.2, 0.3);
        assert!(s.category_match);
        assert_eq!(s.title_overlap, 0);
        assert_eq!(assembler.snippet(&doc), "paris is the");

        let other = Query::new("rivers", "paris on the seine");
        let s = assembler.signals(&other, &other.clue_tokens(), &doc, 0.0, 0.0, 0.0);
        assert!(!s.category_match);
        assert_eq!(s.title_overlap, 1);
    }
}
