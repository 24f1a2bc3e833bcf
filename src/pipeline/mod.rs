//! Hybrid candidate generation and learned fusion ranking.
//!
//! One [`Pipeline`] serves both training and inference, so the feature
//! vectors a model is fitted on are produced by exactly the code that later
//! produces the vectors it scores.
//!
//! Per query:
//! 1. the [`CategoryPolicy`](policy::CategoryPolicy) shapes lexical scores;
//! 2. dense and lexical top-k lists are fused ([`fusion`]);
//! 3. the relevance scorer runs over the fused candidates in batches;
//! 4. the [`FeatureAssembler`](features::FeatureAssembler) builds vectors;
//! 5. the [`FusionModel`](ranker::FusionModel) orders them.

pub mod features;
pub mod fusion;
pub mod policy;
pub mod ranker;

use std::num::NonZeroUsize;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::corpus::{CategoryIndex, DocumentStore, question_set_fingerprint};
use crate::error::{RankError, RankResult};
use crate::evaluation::EvaluationReport;
use crate::model::types::{Candidate, DocId, Query, RankedResult};
use crate::search::dense::DenseRetriever;
use crate::search::embedder::EmbedderError;
use crate::search::lexical::LexicalRetriever;
use crate::search::reranker::{
    CacheStats, CachingScorer, RelevanceScorer, ScorerError, ScorerInfo, score_in_batches,
};

use self::features::{FeatureAssembler, FeatureSchema};
use self::fusion::{fuse_candidates, top_k_lexical};
use self::ranker::{FusionModel, LogisticTrainer, ModelHandle, TrainingSet};

/// Failure of an external collaborator while building one query's candidates.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
    #[error(transparent)]
    Scorer(#[from] ScorerError),
}

/// Shared, read-only inputs plus the current fusion model.
pub struct Pipeline {
    store: Arc<DocumentStore>,
    categories: Arc<CategoryIndex>,
    lexical: Arc<dyn LexicalRetriever>,
    dense: Arc<dyn DenseRetriever>,
    scorer: Arc<dyn RelevanceScorer>,
    cache: Option<Arc<CachingScorer>>,
    assembler: FeatureAssembler,
    config: PipelineConfig,
    model: ModelHandle,
}

impl Pipeline {
    pub fn new(
        store: Arc<DocumentStore>,
        categories: Arc<CategoryIndex>,
        lexical: Arc<dyn LexicalRetriever>,
        dense: Arc<dyn DenseRetriever>,
        scorer: Arc<dyn RelevanceScorer>,
        config: PipelineConfig,
    ) -> RankResult<Self> {
        config.validate()?;
        if store.is_empty() {
            return Err(RankError::EmptyCorpus);
        }

        let (scorer, cache): (Arc<dyn RelevanceScorer>, _) =
            match NonZeroUsize::new(config.scorer_cache_capacity) {
                Some(capacity) => {
                    let cache = Arc::new(CachingScorer::new(scorer, capacity));
                    (Arc::clone(&cache) as Arc<dyn RelevanceScorer>, Some(cache))
                }
                None => (scorer, None),
            };
        let assembler = FeatureAssembler::new(
            FeatureSchema::from_toggles(config.features),
            config.snippet_words,
        );

        info!(
            documents = store.len(),
            categories = categories.category_count(),
            schema = %assembler.schema(),
            policy = %config.category_policy,
            scorer = %ScorerInfo::from_scorer(scorer.as_ref()),
            "Pipeline ready"
        );

        Ok(Self {
            store,
            categories,
            lexical,
            dense,
            scorer,
            cache,
            assembler,
            config,
            model: ModelHandle::default(),
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.assembler.schema()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// BLAKE3 digest of every setting that shapes candidates, features or the
    /// fit. A stored model is only reused under the same digest.
    pub fn training_fingerprint(&self) -> String {
        let c = &self.config;
        let settings = format!(
            "schema={};policy={};k_dense={};k_lex={};snippet={};dense_index={:?};dense={};scorer={};trainer={:?}",
            self.schema().id(),
            c.category_policy,
            c.k_dense,
            c.k_lex,
            c.snippet_words,
            c.dense_index,
            self.dense.id(),
            self.scorer.id(),
            c.trainer,
        );
        blake3::hash(settings.as_bytes()).to_hex().to_string()
    }

    pub fn scorer_cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Fused, feature-assembled candidates for `query`, in fusion order.
    pub fn candidates_for(&self, query: &Query) -> Result<Vec<Candidate>, CollaboratorError> {
        let clue_tokens = query.clue_tokens();
        let query_text = query.query_text();
        let pool = self.categories.docs_for(&query.category_hint);
        let policy = self.config.category_policy;

        let view = policy.lexical_view(self.lexical.as_ref(), &clue_tokens, pool);
        if view.fell_back {
            debug!(category = %query.category_hint, "No documents in category; using full corpus");
        }
        let lexical_ids = top_k_lexical(&view.selection, view.eligible.as_deref(), self.config.k_lex);

        let query_vector = self.dense.embed(&query_text)?;
        let dense_hits = policy.filter_dense(
            self.dense.search(&query_vector, self.config.k_dense),
            pool,
        );
        let dense_ids: Vec<DocId> = dense_hits.iter().map(|(id, _)| *id).collect();

        let fused = fuse_candidates(&dense_ids, &lexical_ids, self.config.k_dense, self.config.k_lex);
        let docs: Vec<_> = fused.iter().filter_map(|&id| self.store.get(id)).collect();
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let relevance = if self.assembler.needs_relevance() {
            let snippets: Vec<String> = docs.iter().map(|doc| self.assembler.snippet(doc)).collect();
            let pairs: Vec<(&str, &str)> = snippets
                .iter()
                .map(|s| (query_text.as_str(), s.as_str()))
                .collect();
            score_in_batches(self.scorer.as_ref(), &pairs, self.config.batch_size)?
        } else {
            vec![0.0; docs.len()]
        };

        let candidates = docs
            .iter()
            .zip(relevance)
            .map(|(doc, relevance)| {
                let signals = self.assembler.signals(
                    query,
                    &clue_tokens,
                    doc,
                    view.raw.get(doc.id).copied().unwrap_or(0.0),
                    f64::from(self.dense.similarity(&query_vector, doc.id)),
                    f64::from(relevance),
                );
                Candidate {
                    doc_id: doc.id,
                    title: doc.title.clone(),
                    features: self.assembler.assemble(&signals),
                }
            })
            .collect();
        Ok(candidates)
    }

    /// Labeled vectors across every query that carries an expected title.
    ///
    /// Queries whose collaborators fail are skipped with a warning.
    pub fn training_set(&self, queries: &[Query]) -> TrainingSet {
        let per_query: Vec<Option<Vec<_>>> = queries
            .par_iter()
            .map(|query| {
                query.expected_title.as_ref()?;
                match self.candidates_for(query) {
                    Ok(candidates) => Some(
                        candidates
                            .into_iter()
                            .map(|c| {
                                let label = query.label_for(&c.title);
                                (c.features, label)
                            })
                            .collect(),
                    ),
                    Err(e) => {
                        warn!(clue = %query.clue_text, error = %e, "Skipping training query");
                        None
                    }
                }
            })
            .collect();

        let mut set = TrainingSet::new(self.schema().clone());
        for examples in per_query.into_iter().flatten() {
            set.queries += 1;
            set.examples.extend(examples);
        }
        info!(
            queries = set.queries,
            examples = set.examples.len(),
            positives = set.positives(),
            "Gathered training data"
        );
        set
    }

    /// Fit a model on `queries`, publish it, and return it.
    pub fn train(&self, queries: &[Query]) -> RankResult<Arc<FusionModel>> {
        let set = self.training_set(queries);
        let model = LogisticTrainer::new(self.config.trainer)
            .fit(&set)?
            .with_corpus_fingerprint(self.store.fingerprint())
            .with_training_provenance(self.training_fingerprint(), question_set_fingerprint(queries));
        self.install(model)
    }

    /// Publish a trained or loaded model after checking its schema.
    pub fn install(&self, model: FusionModel) -> RankResult<Arc<FusionModel>> {
        model.check_schema(self.schema())?;
        self.model.replace(model);
        self.model.current().ok_or(RankError::ModelNotTrained)
    }

    pub fn model(&self) -> Option<Arc<FusionModel>> {
        self.model.current()
    }

    fn serving_model(&self) -> RankResult<Arc<FusionModel>> {
        let model = self.model.current().ok_or(RankError::ModelNotTrained)?;
        model.check_schema(self.schema())?;
        Ok(model)
    }

    fn rank_with(&self, model: &FusionModel, query: &Query) -> RankResult<RankedResult> {
        match self.candidates_for(query) {
            Ok(candidates) => model.rank(candidates),
            Err(e) => {
                warn!(clue = %query.clue_text, error = %e, "No candidates for query");
                Ok(RankedResult::empty())
            }
        }
    }

    /// Rank one query with the current model.
    pub fn rank(&self, query: &Query) -> RankResult<RankedResult> {
        let model = self.serving_model()?;
        self.rank_with(&model, query)
    }

    /// Rank `queries` in parallel; results are in input order.
    pub fn rank_batch(&self, queries: &[Query]) -> RankResult<Vec<RankedResult>> {
        let model = self.serving_model()?;
        queries
            .par_iter()
            .map(|query| self.rank_with(&model, query))
            .collect()
    }

    /// Rank `queries` and score them against their expected titles.
    pub fn evaluate(&self, queries: &[Query]) -> RankResult<EvaluationReport> {
        let results = self.rank_batch(queries)?;
        let report = EvaluationReport::compute(queries, &results, self.config.eval_top_k)?;
        info!(
            queries = report.queries,
            precision_at_1 = report.precision_at_1,
            mrr = report.mrr,
            empty = report.empty_results,
            "Evaluation finished"
        );
        if let Some(stats) = self.scorer_cache_stats() {
            debug!(hits = stats.hits, misses = stats.misses, "Relevance cache");
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("documents", &self.store.len())
            .field("schema", &self.schema().id())
            .field("policy", &self.config.category_policy)
            .field("trained", &self.model.is_trained())
            .finish()
    }
}
