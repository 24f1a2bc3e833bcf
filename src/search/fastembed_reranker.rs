//! FastEmbed-based cross-encoder relevance scorer.
//!
//! Loads a local ms-marco style cross-encoder bundle (ONNX model plus
//! tokenizer files, same layout as [`super::fastembed_embedder`]).

use std::path::Path;
use std::sync::Mutex;

use fastembed::{RerankInitOptionsUserDefined, TextRerank, UserDefinedRerankingModel};

use super::fastembed_embedder::{read_required, read_tokenizer_files, select_model_file};
use super::reranker::{RelevanceScorer, ScorerError, ScorerResult};

const CROSS_ENCODER_ID: &str = "ms-marco-minilm-l12";

/// Cross-encoder scorer backed by fastembed's `TextRerank`.
pub struct FastEmbedReranker {
    model: Mutex<TextRerank>,
    id: String,
}

impl FastEmbedReranker {
    pub fn load_from_dir(model_dir: &Path) -> ScorerResult<Self> {
        Self::load_with_id(model_dir, CROSS_ENCODER_ID)
    }

    pub fn load_with_id(model_dir: &Path, id: &str) -> ScorerResult<Self> {
        if !model_dir.is_dir() {
            return Err(ScorerError::Unavailable(format!(
                "{id}: model directory not found: {}",
                model_dir.display()
            )));
        }
        let onnx_path = select_model_file(model_dir).ok_or_else(|| {
            ScorerError::Unavailable(format!(
                "{id}: no ONNX model file in {}",
                model_dir.display()
            ))
        })?;
        let unavailable = |e: String| ScorerError::Unavailable(format!("{id}: {e}"));
        let onnx_file = read_required(onnx_path, "model.onnx").map_err(unavailable)?;
        let tokenizer_files = read_tokenizer_files(model_dir).map_err(unavailable)?;

        let model = UserDefinedRerankingModel::new(onnx_file, tokenizer_files);
        let model =
            TextRerank::try_new_from_user_defined(model, RerankInitOptionsUserDefined::default())
                .map_err(|e| ScorerError::Unavailable(format!("{id}: fastembed init failed: {e}")))?;

        tracing::info!(scorer = id, "Loaded cross-encoder");

        Ok(Self {
            model: Mutex::new(model),
            id: id.to_string(),
        })
    }
}

impl RelevanceScorer for FastEmbedReranker {
    fn score_pairs(&self, pairs: &[(&str, &str)]) -> ScorerResult<Vec<f32>> {
        let mut scores = vec![0.0f32; pairs.len()];

        #[allow(unused_mut)]
        let mut model = self
            .model
            .lock()
            .map_err(|_| ScorerError::Internal("cross-encoder lock poisoned".to_string()))?;

        // Consecutive pairs sharing a query go to the model as one rerank call.
        let mut start = 0;
        while start < pairs.len() {
            let query = pairs[start].0;
            let end = pairs[start..]
                .iter()
                .position(|(q, _)| *q != query)
                .map_or(pairs.len(), |offset| start + offset);
            let documents: Vec<&str> = pairs[start..end].iter().map(|(_, doc)| *doc).collect();

            let results = model
                .rerank(query, documents, false, None)
                .map_err(|e| ScorerError::ScoreFailed(format!("{}: {e}", self.id)))?;
            for result in results {
                if let Some(slot) = scores.get_mut(start + result.index) {
                    *slot = result.score;
                }
            }
            start = end;
        }
        Ok(scores)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_available(&self) -> bool {
        true
    }
}
