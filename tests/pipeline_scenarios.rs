//! End-to-end ranking scenarios over fixed and real collaborators.

use std::sync::Arc;

use cluerank::config::FeatureToggles;
use cluerank::corpus::CategoryIndex;
use cluerank::model::types::Query;
use cluerank::pipeline::features::FeatureKind;
use cluerank::pipeline::policy::CategoryPolicy;
use cluerank::{Pipeline, PipelineConfig, RankError};

mod util;

use util::{FixedDense, FixedLexical, FixedScorer, TestTracing};

#[test]
fn paris_wins_after_training_on_itself() {
    let pipeline = util::paris_lyon_pipeline(PipelineConfig::default());
    let queries = vec![util::paris_query()];

    let model = pipeline.train(&queries).unwrap();
    assert_eq!(model.training_counts(), (2, 1));

    let ranked = pipeline.rank(&queries[0]).unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked.top_title(), Some("Paris"));
    assert!(ranked.entries[0].probability > ranked.entries[1].probability);

    let report = pipeline.evaluate(&queries).unwrap();
    assert_eq!(report.queries, 1);
    assert_eq!(report.correct_at_1, 1);
    assert_eq!(report.precision_at_1, 1.0);
    assert_eq!(report.mrr, 1.0);
    assert_eq!(report.to_string(), "Precision@1: 1.0000\nMRR:         1.0000");
}

#[test]
fn query_without_expected_title_scores_zero() {
    let pipeline = util::paris_lyon_pipeline(PipelineConfig::default());
    pipeline.train(&[util::paris_query()]).unwrap();

    let unlabeled = Query::new("cities", "capital of france");
    let report = pipeline.evaluate(&[unlabeled]).unwrap();
    assert_eq!(report.queries, 1);
    assert_eq!(report.precision_at_1, 0.0);
    assert_eq!(report.mrr, 0.0);
    assert_eq!(report.empty_results, 0);
}

#[test]
fn unlabeled_queries_are_left_out_of_training() {
    let pipeline = util::paris_lyon_pipeline(PipelineConfig::default());
    let set = pipeline.training_set(&[
        util::paris_query(),
        Query::new("cities", "a city on the rhone"),
    ]);
    assert_eq!(set.queries, 1);
    assert_eq!(set.examples.len(), 2);
    assert_eq!(set.positives(), 1);
}

#[test]
fn ranking_before_training_is_refused() {
    let pipeline = util::paris_lyon_pipeline(PipelineConfig::default());
    let err = pipeline.rank(&util::paris_query()).unwrap_err();
    assert!(matches!(err, RankError::ModelNotTrained));
    assert!(err.is_configuration());
}

#[test]
fn scorer_failures_drop_queries_from_training() {
    let store = util::paris_lyon_store();
    let categories = Arc::new(CategoryIndex::build(&store));
    // Lyon has no relevance score, so every candidate list fails to score.
    let pipeline = Pipeline::new(
        store,
        categories,
        Arc::new(FixedLexical(vec![2.0, 0.5])),
        Arc::new(FixedDense {
            sims: vec![0.9, 0.3],
            fail: false,
        }),
        Arc::new(FixedScorer(vec![("paris", 0.8)])),
        PipelineConfig {
            scorer_cache_capacity: 0,
            ..Default::default()
        },
    )
    .unwrap();

    let set = pipeline.training_set(&[util::paris_query()]);
    assert_eq!(set.queries, 0);
    assert!(matches!(
        pipeline.train(&[util::paris_query()]),
        Err(RankError::NoPositiveLabels { .. })
    ));
}

#[test]
fn filter_policy_keeps_candidates_inside_the_category() {
    let pipeline = util::wiki_pipeline(PipelineConfig {
        category_policy: CategoryPolicy::Filter,
        ..Default::default()
    });
    let query = Query::new("rivers", "this river flows into the north sea");
    let candidates = pipeline.candidates_for(&query).unwrap();

    let titles: Vec<&str> = candidates.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles.len(), 2, "got {titles:?}");
    assert!(titles.contains(&"Rhine"));
    assert!(titles.contains(&"Danube"));
    assert!(candidates
        .iter()
        .all(|c| c.features.get(FeatureKind::CategoryMatch) == Some(1.0)));
}

#[test]
fn filter_policy_falls_back_to_whole_corpus() {
    let pipeline = util::wiki_pipeline(PipelineConfig {
        category_policy: CategoryPolicy::Filter,
        ..Default::default()
    });
    let query = Query::new("opera", "this river flows into the north sea");
    let candidates = pipeline.candidates_for(&query).unwrap();
    assert_eq!(candidates.len(), 5);
}

#[test]
fn wiki_fixture_trains_and_evaluates() {
    let pipeline = util::wiki_pipeline(PipelineConfig::default());
    let queries = util::wiki_queries();
    assert_eq!(queries.len(), 5);

    let model = pipeline.train(&queries).unwrap();
    assert_eq!(model.training_counts(), (25, 5));
    assert_eq!(model.weights().len(), 5);

    let results = pipeline.rank_batch(&queries).unwrap();
    assert_eq!(results.len(), queries.len());
    for ranked in &results {
        assert_eq!(ranked.len(), 5);
        assert!(ranked
            .entries
            .windows(2)
            .all(|w| w[0].probability >= w[1].probability));
        assert!(ranked
            .entries
            .iter()
            .all(|e| (0.0..=1.0).contains(&e.probability)));
    }

    let report = pipeline.evaluate(&queries).unwrap();
    assert_eq!(report.queries, 5);
    assert_eq!(report.empty_results, 0);
    assert!(report.precision_at_1 <= report.mrr);
    assert!(report.mrr > 0.0);
    assert_eq!(report.outcomes.len(), 5);
}

#[test]
fn header_overlap_adds_a_sixth_trained_slot() {
    let pipeline = util::wiki_pipeline(PipelineConfig {
        features: FeatureToggles {
            header_overlap: true,
            ..Default::default()
        },
        ..Default::default()
    });
    assert_eq!(pipeline.schema().id(), "v1:lex,dense,rel,cat,title,hdr");

    let query = Query::new("cities", "its history ended with the french kings");
    let candidates = pipeline.candidates_for(&query).unwrap();
    let header = |title: &str| {
        candidates
            .iter()
            .find(|c| c.title == title)
            .and_then(|c| c.features.get(FeatureKind::HeaderOverlap))
    };
    assert_eq!(header("Paris"), Some(1.0));
    assert_eq!(header("Lyon"), Some(0.0));

    let model = pipeline.train(&util::wiki_queries()).unwrap();
    assert_eq!(model.weights().len(), 6);
    assert_eq!(pipeline.rank_batch(&util::wiki_queries()).unwrap().len(), 5);
}

#[test]
fn training_logs_the_fitted_model() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let pipeline = util::paris_lyon_pipeline(PipelineConfig::default());
    pipeline.train(&[util::paris_query()]).unwrap();

    tracing.assert_contains("Pipeline ready");
    tracing.assert_contains("Fitted fusion ranker");
}
