//! FastEmbed-based ML embedder.
//!
//! Loads a local ONNX model + tokenizer bundle and produces semantic
//! embeddings. Model assets are never downloaded; a missing bundle is reported
//! as [`EmbedderError::EmbedderUnavailable`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fastembed::{
    InitOptionsUserDefined, Pooling, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};

use super::embedder::{Embedder, EmbedderError, EmbedderResult, l2_normalize};

const MPNET_MODEL_ID: &str = "all-mpnet-base-v2";
const MPNET_EMBEDDER_ID: &str = "mpnet-768";
const MPNET_DIMENSION: usize = 768;

// Prefer the onnx/ subdir layout, fall back to a flat bundle.
pub(crate) const MODEL_ONNX_SUBDIR: &str = "onnx/model.onnx";
pub(crate) const MODEL_ONNX_LEGACY: &str = "model.onnx";
pub(crate) const TOKENIZER_JSON: &str = "tokenizer.json";
pub(crate) const CONFIG_JSON: &str = "config.json";
pub(crate) const SPECIAL_TOKENS_JSON: &str = "special_tokens_map.json";
pub(crate) const TOKENIZER_CONFIG_JSON: &str = "tokenizer_config.json";

/// Configuration for loading an ONNX embedder.
#[derive(Debug, Clone)]
pub struct OnnxEmbedderConfig {
    /// Unique embedder ID; names the persisted embedding matrix.
    pub embedder_id: String,
    /// Model identifier for logging.
    pub model_id: String,
    pub dimension: usize,
    pub pooling: Pooling,
}

impl Default for OnnxEmbedderConfig {
    fn default() -> Self {
        Self {
            embedder_id: MPNET_EMBEDDER_ID.to_string(),
            model_id: MPNET_MODEL_ID.to_string(),
            dimension: MPNET_DIMENSION,
            pooling: Pooling::Mean,
        }
    }
}

/// Read the tokenizer bundle shared by embedders and cross-encoders.
pub(crate) fn read_tokenizer_files(model_dir: &Path) -> Result<TokenizerFiles, String> {
    Ok(TokenizerFiles {
        tokenizer_file: read_required(model_dir.join(TOKENIZER_JSON), TOKENIZER_JSON)?,
        config_file: read_required(model_dir.join(CONFIG_JSON), CONFIG_JSON)?,
        special_tokens_map_file: read_required(
            model_dir.join(SPECIAL_TOKENS_JSON),
            SPECIAL_TOKENS_JSON,
        )?,
        tokenizer_config_file: read_required(
            model_dir.join(TOKENIZER_CONFIG_JSON),
            TOKENIZER_CONFIG_JSON,
        )?,
    })
}

/// Locate the ONNX file, preferring `onnx/model.onnx` over `model.onnx`.
pub(crate) fn select_model_file(model_dir: &Path) -> Option<PathBuf> {
    [MODEL_ONNX_SUBDIR, MODEL_ONNX_LEGACY]
        .into_iter()
        .map(|name| model_dir.join(name))
        .find(|path| path.is_file())
}

pub(crate) fn read_required(path: PathBuf, label: &str) -> Result<Vec<u8>, String> {
    fs::read(&path).map_err(|e| format!("unable to read {label} at {}: {e}", path.display()))
}

/// FastEmbed-backed semantic embedder.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    id: String,
    model_id: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Load the default sentence-embedding bundle from `model_dir`.
    pub fn load_from_dir(model_dir: &Path) -> EmbedderResult<Self> {
        Self::load_with_config(model_dir, OnnxEmbedderConfig::default())
    }

    pub fn load_with_config(model_dir: &Path, config: OnnxEmbedderConfig) -> EmbedderResult<Self> {
        let unavailable = |reason: String| EmbedderError::EmbedderUnavailable {
            model: config.embedder_id.clone(),
            reason,
        };

        if !model_dir.is_dir() {
            return Err(unavailable(format!(
                "model directory not found: {}",
                model_dir.display()
            )));
        }
        let onnx_path = select_model_file(model_dir).ok_or_else(|| {
            unavailable(format!(
                "no ONNX model file in {} (checked {MODEL_ONNX_SUBDIR} and {MODEL_ONNX_LEGACY})",
                model_dir.display()
            ))
        })?;

        let model_file = read_required(onnx_path, "model.onnx").map_err(&unavailable)?;
        let tokenizer_files = read_tokenizer_files(model_dir).map_err(&unavailable)?;

        let mut model = UserDefinedEmbeddingModel::new(model_file, tokenizer_files);
        model.pooling = Some(config.pooling);

        let model = TextEmbedding::try_new_from_user_defined(model, InitOptionsUserDefined::new())
            .map_err(|e| EmbedderError::EmbeddingFailed {
                model: config.embedder_id.clone(),
                source: Box::new(std::io::Error::other(format!("fastembed init failed: {e}"))),
            })?;

        tracing::info!(
            embedder = %config.embedder_id,
            model = %config.model_id,
            dimension = config.dimension,
            "Loaded fastembed model"
        );

        Ok(Self {
            model: Mutex::new(model),
            id: config.embedder_id,
            model_id: config.model_id,
            dimension: config.dimension,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl Embedder for FastEmbedder {
    fn embed_sync(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        self.embed_batch_sync(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::EmbeddingFailed {
                model: self.id.clone(),
                source: Box::new(std::io::Error::other("fastembed returned no embedding")),
            })
    }

    fn embed_batch_sync(&self, texts: &[&str]) -> EmbedderResult<Vec<Vec<f32>>> {
        if texts.iter().any(|text| text.is_empty()) {
            return Err(EmbedderError::InvalidConfig {
                field: "input_text".to_string(),
                value: "(empty)".to_string(),
                reason: "empty text in batch".to_string(),
            });
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        #[allow(unused_mut)]
        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbedderError::SubsystemError {
                subsystem: "embedder",
                source: Box::new(std::io::Error::other("fastembed lock poisoned")),
            })?;

        let mut embeddings =
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbedderError::EmbeddingFailed {
                    model: self.id.clone(),
                    source: Box::new(std::io::Error::other(format!(
                        "fastembed embed failed: {e}"
                    ))),
                })?;

        for embedding in embeddings.iter_mut() {
            if embedding.len() != self.dimension {
                return Err(EmbedderError::EmbeddingFailed {
                    model: self.id.clone(),
                    source: Box::new(std::io::Error::other(format!(
                        "fastembed dimension mismatch: expected {}, got {}",
                        self.dimension,
                        embedding.len()
                    ))),
                });
            }
            l2_normalize(embedding);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        true
    }
}
