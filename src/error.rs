//! Crate-level error type.
//!
//! Configuration errors are fatal and surface before any ranking starts.
//! External-collaborator failures have their own error types
//! ([`crate::search::embedder::EmbedderError`], [`crate::search::reranker::ScorerError`])
//! and are recovered per query by the pipeline.

use thiserror::Error;

/// Errors raised by the ranking core and its persistence layer.
#[derive(Error, Debug)]
pub enum RankError {
    #[error("document corpus is empty")]
    EmptyCorpus,

    #[error(
        "training set has no positive labels ({examples} examples across {queries} queries); \
         refusing to fit a degenerate model"
    )]
    NoPositiveLabels { queries: usize, examples: usize },

    #[error("feature schema mismatch: model expects `{expected}`, got `{found}`")]
    SchemaMismatch { expected: String, found: String },

    #[error("no fusion model has been trained or loaded")]
    ModelNotTrained,

    #[error("{results} ranked results for {queries} queries")]
    ResultCountMismatch { queries: usize, results: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("artifact `{key}` is unusable: {reason}")]
    Artifact { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to encode MessagePack: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode MessagePack: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl RankError {
    /// Whether this error is a fatal configuration problem (as opposed to I/O).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyCorpus
                | Self::NoPositiveLabels { .. }
                | Self::SchemaMismatch { .. }
                | Self::ModelNotTrained
                | Self::InvalidConfig(_)
        )
    }
}

/// Result alias for the ranking core.
pub type RankResult<T> = Result<T, RankError>;
