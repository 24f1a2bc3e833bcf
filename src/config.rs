//! Pipeline configuration.
//!
//! Resolution order: [`PipelineConfig::default`], then an optional TOML file,
//! then `CLUERANK_*` environment variables, then CLI flags (applied by the
//! caller). [`PipelineConfig::validate`] runs last.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RankError, RankResult};
use crate::pipeline::policy::CategoryPolicy;
use crate::search::ann_index::{DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH, DEFAULT_M};
use crate::search::canonicalize::SNIPPET_WORDS;
use crate::search::hash_embedder::DEFAULT_HASH_DIMENSION;

const ENV_PREFIX: &str = "CLUERANK_";

/// Which optional feature slots the assembler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub relevance_score: bool,
    pub title_overlap: bool,
    /// Section-header overlap; adds a sixth slot when on.
    pub header_overlap: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            relevance_score: true,
            title_overlap: true,
            header_overlap: false,
        }
    }
}

/// Nearest-neighbour strategy for the dense retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DenseIndexKind {
    #[default]
    Exact,
    Hnsw {
        #[serde(default = "default_m")]
        m: usize,
        #[serde(default = "default_ef_construction")]
        ef_construction: usize,
        #[serde(default = "default_ef_search")]
        ef_search: usize,
    },
}

fn default_m() -> usize {
    DEFAULT_M
}

fn default_ef_construction() -> usize {
    DEFAULT_EF_CONSTRUCTION
}

fn default_ef_search() -> usize {
    DEFAULT_EF_SEARCH
}

impl DenseIndexKind {
    pub fn hnsw() -> Self {
        Self::Hnsw {
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
        }
    }
}

/// Text embedder backing the dense retriever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Deterministic feature hashing.
    Hash {
        #[serde(default = "default_hash_dimension")]
        dimension: usize,
    },
    /// Local ONNX sentence-embedding bundle (feature `fastembed`).
    Fastembed { model_dir: PathBuf },
}

fn default_hash_dimension() -> usize {
    DEFAULT_HASH_DIMENSION
}

impl Default for EmbedderKind {
    fn default() -> Self {
        Self::Hash {
            dimension: DEFAULT_HASH_DIMENSION,
        }
    }
}

/// Relevance scorer backing the relevance feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScorerKind {
    #[default]
    TokenOverlap,
    /// Local ONNX cross-encoder bundle (feature `fastembed`).
    CrossEncoder { model_dir: PathBuf },
}

/// Logistic-regression fitting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// L2 penalty strength (bias is not penalized).
    pub l2: f64,
    pub max_iter: usize,
    /// Step size in standardized feature space.
    pub learning_rate: f64,
    /// Stop once the loss improves by less than this.
    pub tolerance: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            l2: 1.0,
            max_iter: 1000,
            learning_rate: 0.5,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Dense neighbours per query.
    pub k_dense: usize,
    /// Lexical candidates per query.
    pub k_lex: usize,
    /// Words of document body sent to the relevance scorer.
    pub snippet_words: usize,
    /// Embedding and relevance-scoring batch size.
    pub batch_size: usize,
    /// Ranked-list cut-off for Precision@1 and MRR.
    pub eval_top_k: usize,
    pub category_policy: CategoryPolicy,
    pub features: FeatureToggles,
    pub dense_index: DenseIndexKind,
    pub embedder: EmbedderKind,
    pub scorer: ScorerKind,
    pub trainer: TrainerConfig,
    /// LRU entries for cached relevance scores; 0 disables the cache.
    pub scorer_cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            k_dense: 10,
            k_lex: 50,
            snippet_words: SNIPPET_WORDS,
            batch_size: 64,
            eval_top_k: 10,
            category_policy: CategoryPolicy::default(),
            features: FeatureToggles::default(),
            dense_index: DenseIndexKind::default(),
            embedder: EmbedderKind::default(),
            scorer: ScorerKind::default(),
            trainer: TrainerConfig::default(),
            scorer_cache_capacity: 100_000,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> RankResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults, then `path` (if any), then the environment. Validated.
    pub fn load(path: Option<&Path>) -> RankResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CLUERANK_*` overrides from the process environment (and `.env`).
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| dotenvy::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        override_parsed(&get, "K_DENSE", &mut self.k_dense);
        override_parsed(&get, "K_LEX", &mut self.k_lex);
        override_parsed(&get, "SNIPPET_WORDS", &mut self.snippet_words);
        override_parsed(&get, "BATCH_SIZE", &mut self.batch_size);
        override_parsed(&get, "EVAL_TOP_K", &mut self.eval_top_k);
        override_parsed(&get, "SCORER_CACHE_CAPACITY", &mut self.scorer_cache_capacity);
        override_parsed(&get, "RELEVANCE_FEATURE", &mut self.features.relevance_score);
        override_parsed(&get, "TITLE_OVERLAP_FEATURE", &mut self.features.title_overlap);
        override_parsed(&get, "HEADER_OVERLAP_FEATURE", &mut self.features.header_overlap);
        override_parsed(&get, "TRAINER_L2", &mut self.trainer.l2);
        override_parsed(&get, "TRAINER_MAX_ITER", &mut self.trainer.max_iter);

        if let Some(val) = get("CATEGORY_POLICY") {
            match val.parse::<CategoryPolicy>() {
                Ok(policy) => self.category_policy = policy,
                Err(reason) => warn!(value = %val, %reason, "ignoring CLUERANK_CATEGORY_POLICY"),
            }
        }

        if let Some(val) = get("BOOST_BONUS")
            && let CategoryPolicy::Boost { bonus } = &mut self.category_policy
        {
            match val.parse() {
                Ok(parsed) => *bonus = parsed,
                Err(_) => warn!(value = %val, "ignoring CLUERANK_BOOST_BONUS"),
            }
        }

        if let Some(val) = get("DENSE_INDEX") {
            match val.to_ascii_lowercase().as_str() {
                "exact" => self.dense_index = DenseIndexKind::Exact,
                "hnsw" => {
                    if !matches!(self.dense_index, DenseIndexKind::Hnsw { .. }) {
                        self.dense_index = DenseIndexKind::hnsw();
                    }
                }
                _ => warn!(value = %val, "ignoring CLUERANK_DENSE_INDEX"),
            }
        }

        if let Some(val) = get("HASH_DIMENSION")
            && let EmbedderKind::Hash { dimension } = &mut self.embedder
        {
            match val.parse() {
                Ok(parsed) => *dimension = parsed,
                Err(_) => warn!(value = %val, "ignoring CLUERANK_HASH_DIMENSION"),
            }
        }

        if let Some(val) = get("EMBEDDER_MODEL_DIR") {
            self.embedder = EmbedderKind::Fastembed {
                model_dir: PathBuf::from(val),
            };
        }

        if let Some(val) = get("SCORER_MODEL_DIR") {
            self.scorer = ScorerKind::CrossEncoder {
                model_dir: PathBuf::from(val),
            };
        }
    }

    /// Reject settings that cannot produce a meaningful ranking.
    pub fn validate(&self) -> RankResult<()> {
        let invalid = |msg: String| Err(RankError::InvalidConfig(msg));

        match self.k_dense.checked_add(self.k_lex) {
            None => return invalid("k_dense + k_lex overflows".into()),
            Some(0) => return invalid("k_dense + k_lex must be at least 1".into()),
            Some(_) => {}
        }
        if self.snippet_words == 0 {
            return invalid("snippet_words must be at least 1".into());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1".into());
        }
        if self.eval_top_k == 0 {
            return invalid("eval_top_k must be at least 1".into());
        }
        if let CategoryPolicy::Boost { bonus } = self.category_policy
            && !(bonus.is_finite() && bonus >= 0.0)
        {
            return invalid(format!("boost bonus must be finite and >= 0, got {bonus}"));
        }
        if let DenseIndexKind::Hnsw {
            m,
            ef_construction,
            ef_search,
        } = self.dense_index
            && (m == 0 || ef_construction == 0 || ef_search == 0)
        {
            return invalid("hnsw parameters must be at least 1".into());
        }
        if let EmbedderKind::Hash { dimension } = self.embedder
            && dimension == 0
        {
            return invalid("hash embedder dimension must be at least 1".into());
        }
        let t = &self.trainer;
        if !(t.learning_rate.is_finite() && t.learning_rate > 0.0) {
            return invalid(format!("trainer.learning_rate must be > 0, got {}", t.learning_rate));
        }
        if !(t.l2.is_finite() && t.l2 >= 0.0) {
            return invalid(format!("trainer.l2 must be >= 0, got {}", t.l2));
        }
        if t.max_iter == 0 {
            return invalid("trainer.max_iter must be at least 1".into());
        }
        Ok(())
    }
}

fn override_parsed<T, G>(get: &G, name: &str, slot: &mut T)
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(val) = get(name) {
        match val.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(variable = %format!("{ENV_PREFIX}{name}"), value = %val, "ignoring unparsable override"),
        }
    }
}
