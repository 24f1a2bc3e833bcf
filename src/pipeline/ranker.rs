//! Fusion ranker: an L2-regularized logistic regression over feature vectors.
//!
//! [`LogisticTrainer`] fits a [`FusionModel`]; the model only ever evaluates
//! `sigmoid(w·x + b)`. A published model is immutable and shared through
//! [`ModelHandle`]; retraining swaps in a new instance.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TrainerConfig;
use crate::error::{RankError, RankResult};
use crate::model::types::{Candidate, RankedEntry, RankedResult};
use crate::pipeline::features::{FeatureSchema, FeatureVector};

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Descending by probability; NaN sorts last.
fn by_probability_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Trained linear model plus the schema it was fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionModel {
    schema: FeatureSchema,
    weights: Vec<f64>,
    bias: f64,
    /// Corpus fingerprint of the training run, if known.
    #[serde(default)]
    corpus_fingerprint: Option<String>,
    /// Digest of the pipeline settings that produced the training data.
    #[serde(default)]
    training_fingerprint: Option<String>,
    /// Digest of the question set the model was fitted on.
    #[serde(default)]
    questions_fingerprint: Option<String>,
    #[serde(default)]
    examples: usize,
    #[serde(default)]
    positives: usize,
}

impl FusionModel {
    pub fn new(schema: FeatureSchema, weights: Vec<f64>, bias: f64) -> RankResult<Self> {
        if weights.len() != schema.len() {
            return Err(RankError::SchemaMismatch {
                expected: schema.id(),
                found: format!("{} weights", weights.len()),
            });
        }
        Ok(Self {
            schema,
            weights,
            bias,
            corpus_fingerprint: None,
            training_fingerprint: None,
            questions_fingerprint: None,
            examples: 0,
            positives: 0,
        })
    }

    pub fn with_corpus_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.corpus_fingerprint = Some(fingerprint.into());
        self
    }

    /// Tag the model with the settings and questions it was fitted under.
    pub fn with_training_provenance(
        mut self,
        settings: impl Into<String>,
        questions: impl Into<String>,
    ) -> Self {
        self.training_fingerprint = Some(settings.into());
        self.questions_fingerprint = Some(questions.into());
        self
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn corpus_fingerprint(&self) -> Option<&str> {
        self.corpus_fingerprint.as_deref()
    }

    pub fn training_fingerprint(&self) -> Option<&str> {
        self.training_fingerprint.as_deref()
    }

    pub fn questions_fingerprint(&self) -> Option<&str> {
        self.questions_fingerprint.as_deref()
    }

    /// Training examples and positive labels the model was fitted on.
    pub fn training_counts(&self) -> (usize, usize) {
        (self.examples, self.positives)
    }

    /// Refuse any schema other than the one the model was trained on.
    pub fn check_schema(&self, schema: &FeatureSchema) -> RankResult<()> {
        if *schema != self.schema || self.weights.len() != self.schema.len() {
            return Err(RankError::SchemaMismatch {
                expected: self.schema.id(),
                found: schema.id(),
            });
        }
        Ok(())
    }

    /// Probability that the candidate is the expected answer.
    pub fn predict(&self, features: &FeatureVector) -> RankResult<f64> {
        self.check_schema(features.schema())?;
        let z: f64 = self
            .weights
            .iter()
            .zip(features.values())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        Ok(sigmoid(z))
    }

    /// Score and order candidates. Ties keep the input order.
    pub fn rank(&self, candidates: Vec<Candidate>) -> RankResult<RankedResult> {
        let mut entries = candidates
            .into_iter()
            .map(|c| {
                Ok(RankedEntry {
                    probability: self.predict(&c.features)?,
                    doc_id: c.doc_id,
                    title: c.title,
                })
            })
            .collect::<RankResult<Vec<_>>>()?;
        entries.sort_by(|a, b| by_probability_desc(a.probability, b.probability));
        Ok(RankedResult { entries })
    }

    pub fn to_json(&self) -> RankResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> RankResult<Self> {
        let model: Self = serde_json::from_slice(bytes)?;
        if model.weights.len() != model.schema.len() {
            return Err(RankError::SchemaMismatch {
                expected: model.schema.id(),
                found: format!("{} weights", model.weights.len()),
            });
        }
        Ok(model)
    }
}

/// Labeled feature vectors gathered across training queries.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub schema: FeatureSchema,
    pub examples: Vec<(FeatureVector, bool)>,
    pub queries: usize,
}

impl TrainingSet {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            examples: Vec::new(),
            queries: 0,
        }
    }

    pub fn positives(&self) -> usize {
        self.examples.iter().filter(|(_, label)| *label).count()
    }
}

/// Full-batch gradient descent on mean log-loss with an L2 penalty.
///
/// Fitting happens on standardized features; the weights are folded back into
/// raw-feature space before the model is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticTrainer {
    config: TrainerConfig,
}

impl LogisticTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn fit(&self, set: &TrainingSet) -> RankResult<FusionModel> {
        let n = set.examples.len();
        let positives = set.positives();
        if positives == 0 {
            return Err(RankError::NoPositiveLabels {
                queries: set.queries,
                examples: n,
            });
        }
        for (features, _) in &set.examples {
            if *features.schema() != set.schema {
                return Err(RankError::SchemaMismatch {
                    expected: set.schema.id(),
                    found: features.schema().id(),
                });
            }
        }
        if positives == n {
            warn!(examples = n, "training set has no negative labels");
        }
        info!(
            queries = set.queries,
            examples = n,
            positives,
            schema = %set.schema,
            "Training fusion ranker"
        );

        let d = set.schema.len();
        let nf = n as f64;
        let rows: Vec<&[f64]> = set.examples.iter().map(|(f, _)| f.values()).collect();
        let labels: Vec<f64> = set
            .examples
            .iter()
            .map(|(_, y)| if *y { 1.0 } else { 0.0 })
            .collect();

        let mut mean = vec![0.0; d];
        for row in &rows {
            for (m, x) in mean.iter_mut().zip(row.iter()) {
                *m += x / nf;
            }
        }
        let mut scale = vec![0.0; d];
        for row in &rows {
            for j in 0..d {
                scale[j] += (row[j] - mean[j]).powi(2) / nf;
            }
        }
        for s in scale.iter_mut() {
            *s = s.sqrt();
            if !s.is_finite() || *s < 1e-12 {
                *s = 1.0;
            }
        }
        let standardized: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| (0..d).map(|j| (row[j] - mean[j]) / scale[j]).collect())
            .collect();

        let TrainerConfig {
            l2,
            max_iter,
            learning_rate,
            tolerance,
        } = self.config;

        let loss = |w: &[f64], b: f64| -> f64 {
            let data: f64 = standardized
                .iter()
                .zip(&labels)
                .map(|(z, y)| {
                    let m = dot(w, z) + b;
                    softplus(m) - y * m
                })
                .sum::<f64>()
                / nf;
            data + l2 / (2.0 * nf) * dot(w, w)
        };

        let mut w = vec![0.0; d];
        let mut b = 0.0;
        let mut current = loss(&w, b);
        let mut iterations = 0;

        for _ in 0..max_iter {
            iterations += 1;
            let mut grad_w = vec![0.0; d];
            let mut grad_b = 0.0;
            for (z, y) in standardized.iter().zip(&labels) {
                let residual = sigmoid(dot(&w, z) + b) - y;
                for (g, x) in grad_w.iter_mut().zip(z) {
                    *g += residual * x;
                }
                grad_b += residual;
            }
            for (g, wj) in grad_w.iter_mut().zip(&w) {
                *g = *g / nf + l2 / nf * wj;
            }
            grad_b /= nf;

            for (wj, g) in w.iter_mut().zip(&grad_w) {
                *wj -= learning_rate * g;
            }
            b -= learning_rate * grad_b;

            let next = loss(&w, b);
            let improvement = current - next;
            current = next;
            if improvement.abs() < tolerance {
                break;
            }
        }
        debug!(iterations, loss = current, "Gradient descent finished");

        let weights: Vec<f64> = (0..d).map(|j| w[j] / scale[j]).collect();
        let bias = b - (0..d).map(|j| w[j] * mean[j] / scale[j]).sum::<f64>();

        info!(weights = ?weights, bias, iterations, loss = current, "Fitted fusion ranker");

        let mut model = FusionModel::new(set.schema.clone(), weights, bias)?;
        model.examples = n;
        model.positives = positives;
        Ok(model)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Shared, atomically replaceable reference to the serving model.
///
/// Starts untrained; [`replace`](Self::replace) publishes a model.
#[derive(Debug, Default)]
pub struct ModelHandle {
    current: RwLock<Option<Arc<FusionModel>>>,
}

impl ModelHandle {
    pub fn new(model: FusionModel) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(model))),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.current.read().is_some()
    }

    /// Snapshot of the model being served. Holders keep it alive across swaps.
    pub fn current(&self) -> Option<Arc<FusionModel>> {
        self.current.read().clone()
    }

    /// Publish `model`, returning the previous instance.
    pub fn replace(&self, model: FusionModel) -> Option<Arc<FusionModel>> {
        self.current.write().replace(Arc::new(model))
    }
}
