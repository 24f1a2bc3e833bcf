//! Property tests for fusion, lexical selection, category policy and metrics.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use cluerank::config::FeatureToggles;
use cluerank::evaluation::EvaluationReport;
use cluerank::model::types::{DocId, Query, RankedEntry, RankedResult};
use cluerank::pipeline::features::{FeatureKind, FeatureSchema};
use cluerank::pipeline::fusion::{fuse_candidates, top_k_lexical};
use cluerank::pipeline::policy::CategoryPolicy;
use cluerank::search::lexical::LexicalRetriever;
use proptest::prelude::*;

/// Scores every document from a fixed table.
struct Table(Vec<f64>);

impl LexicalRetriever for Table {
    fn score_all(&self, _tokens: &[String]) -> Vec<f64> {
        self.0.clone()
    }

    fn doc_count(&self) -> usize {
        self.0.len()
    }
}

fn ranked(titles: &[String]) -> RankedResult {
    RankedResult {
        entries: titles
            .iter()
            .enumerate()
            .map(|(i, title)| RankedEntry {
                doc_id: i,
                title: title.clone(),
                probability: 1.0 / (i + 1) as f64,
            })
            .collect(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn fused_candidates_are_unique_and_dense_first(
        dense in prop::collection::vec(0usize..40, 0..15),
        lexical in prop::collection::vec(0usize..40, 0..60),
        k_dense in 0usize..12,
        k_lex in 0usize..55,
    ) {
        let fused = fuse_candidates(&dense, &lexical, k_dense, k_lex);

        let unique: HashSet<DocId> = fused.iter().copied().collect();
        prop_assert_eq!(unique.len(), fused.len());
        prop_assert!(fused.len() <= k_dense + k_lex);

        let inputs: HashSet<DocId> = dense.iter().take(k_dense)
            .chain(lexical.iter().take(k_lex))
            .copied()
            .collect();
        prop_assert_eq!(unique, inputs);

        let mut dense_prefix = Vec::new();
        for id in dense.iter().take(k_dense) {
            if !dense_prefix.contains(id) {
                dense_prefix.push(*id);
            }
        }
        prop_assert_eq!(&fused[..dense_prefix.len()], dense_prefix.as_slice());
    }

    #[test]
    fn lexical_top_k_is_sorted_and_complete(
        scores in prop::collection::vec(-5.0f64..5.0, 0..80),
        k in 0usize..60,
    ) {
        let top = top_k_lexical(&scores, None, k);
        prop_assert_eq!(top.len(), k.min(scores.len()));
        for pair in top.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            prop_assert_eq!(
                scores[b].total_cmp(&scores[a]).then(a.cmp(&b)),
                Ordering::Less
            );
        }
        if let Some(&last) = top.last() {
            let chosen: HashSet<DocId> = top.iter().copied().collect();
            for (id, score) in scores.iter().enumerate() {
                if !chosen.contains(&id) {
                    prop_assert!(*score <= scores[last]);
                }
            }
        }
    }

    #[test]
    fn filter_policy_never_starves_lexical_selection(
        scores in prop::collection::vec(0.0f64..10.0, 1..50),
        pool in prop::collection::btree_set(0usize..60, 0..10),
    ) {
        let retriever = Table(scores.clone());
        let pool: BTreeSet<DocId> = pool.into_iter().filter(|&id| id < scores.len()).collect();
        let view = CategoryPolicy::Filter.lexical_view(&retriever, &[], &pool);

        let selected = top_k_lexical(&view.selection, view.eligible.as_deref(), 50);
        prop_assert!(!selected.is_empty());
        prop_assert_eq!(view.fell_back, pool.is_empty());
        if !pool.is_empty() {
            prop_assert!(selected.iter().all(|id| pool.contains(id)));
            for &id in &pool {
                prop_assert_eq!(view.raw[id], scores[id]);
            }
        }
    }

    #[test]
    fn boost_policy_keeps_raw_scores(
        scores in prop::collection::vec(0.0f64..10.0, 1..50),
        pool in prop::collection::btree_set(0usize..50, 0..10),
        bonus in 0.0f64..5.0,
    ) {
        let retriever = Table(scores.clone());
        let view = CategoryPolicy::Boost { bonus }.lexical_view(&retriever, &[], &pool);
        prop_assert_eq!(&view.raw, &scores);
        for (id, score) in view.selection.iter().enumerate() {
            let expected = if pool.contains(&id) { scores[id] + bonus } else { scores[id] };
            prop_assert_eq!(*score, expected);
        }
    }

    #[test]
    fn precision_never_exceeds_mrr(
        lists in prop::collection::vec(
            (prop::collection::vec("[a-e]", 0..6), "[a-e]"),
            1..20,
        ),
        top_k in 1usize..8,
    ) {
        let queries: Vec<Query> = lists
            .iter()
            .map(|(_, expected)| Query::new("cat", "clue").with_expected(expected.clone()))
            .collect();
        let results: Vec<RankedResult> = lists.iter().map(|(titles, _)| ranked(titles)).collect();

        let report = EvaluationReport::compute(&queries, &results, top_k).unwrap();
        prop_assert_eq!(report.queries, lists.len());
        prop_assert!((0.0..=1.0).contains(&report.precision_at_1));
        prop_assert!((0.0..=1.0).contains(&report.mrr));
        prop_assert!(report.precision_at_1 <= report.mrr + 1e-12);
    }

    #[test]
    fn schemas_always_carry_the_mandatory_slots(
        relevance_score in any::<bool>(),
        title_overlap in any::<bool>(),
        header_overlap in any::<bool>(),
    ) {
        let schema = FeatureSchema::from_toggles(FeatureToggles {
            relevance_score,
            title_overlap,
            header_overlap,
        });
        for kind in FeatureKind::ALL {
            let expected = match kind {
                FeatureKind::RelevanceScore => relevance_score,
                FeatureKind::TitleOverlap => title_overlap,
                FeatureKind::HeaderOverlap => header_overlap,
                _ => !kind.is_optional(),
            };
            prop_assert_eq!(schema.contains(kind), expected);
        }
        prop_assert_eq!(
            schema.len(),
            3 + relevance_score as usize + title_overlap as usize + header_overlap as usize
        );
    }
}

#[test]
fn full_schema_has_five_slots_in_order() {
    let schema = FeatureSchema::full();
    assert_eq!(schema.len(), 5);
    assert_eq!(schema.features(), &FeatureKind::ALL[..5]);
    assert_eq!(schema.id(), "v1:lex,dense,rel,cat,title");
}
