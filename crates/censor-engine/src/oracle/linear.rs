//! Linear model oracle
//!
//! Evaluates exported single-layer models: `activation(W · x + b)`.
//! Each model file is JSON:
//!
//! ```json
//! {
//!   "input_len": 20,
//!   "weights": [[0.01, ...], [-0.01, ...]],
//!   "bias": [0.0, 0.0],
//!   "activation": "softmax"
//! }
//! ```
//!
//! Files are read once at startup.

use super::{ModelShape, OracleError, ScoringOracle};
use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Output activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Channels sum to one
    #[default]
    Softmax,
    /// Each channel independently in (0, 1)
    Sigmoid,
}

/// One exported model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    /// Feature vector length
    pub input_len: usize,
    /// One row of `input_len` weights per output channel
    pub weights: Vec<Vec<f32>>,
    /// One bias per output channel
    pub bias: Vec<f32>,
    /// Output activation
    #[serde(default)]
    pub activation: Activation,
}

impl LinearModel {
    /// Check the weight matrix against the declared shape
    pub fn validate(&self, name: &str) -> Result<(), OracleError> {
        let load_err = |reason: String| OracleError::Load {
            name: name.to_string(),
            reason,
        };

        if self.weights.is_empty() {
            return Err(load_err("model has no output channels".into()));
        }
        if self.weights.len() != self.bias.len() {
            return Err(load_err(format!(
                "{} weight rows but {} biases",
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(idx) = self.weights.iter().position(|row| row.len() != self.input_len) {
            return Err(load_err(format!(
                "weight row {} has {} values, expected {}",
                idx,
                self.weights[idx].len(),
                self.input_len
            )));
        }
        Ok(())
    }

    /// Model geometry
    pub fn shape(&self) -> ModelShape {
        ModelShape {
            input_len: self.input_len,
            output_channels: self.weights.len(),
        }
    }

    /// Evaluate on a feature vector of length `input_len`
    pub fn predict(&self, features: &[f32]) -> Vec<f32> {
        let logits = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f32>() + b);

        match self.activation {
            Activation::Sigmoid => logits.map(|z| 1.0 / (1.0 + (-z).exp())).collect(),
            Activation::Softmax => {
                let logits: Vec<f32> = logits.collect();
                let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = logits.iter().map(|z| (z - max).exp()).collect();
                let sum: f32 = exps.iter().sum();
                exps.into_iter().map(|e| e / sum).collect()
            }
        }
    }
}

/// Oracle backed by linear models loaded from disk
#[derive(Debug, Default)]
pub struct LinearOracle {
    models: HashMap<String, LinearModel>,
}

impl LinearOracle {
    /// Create new empty oracle
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every configured model that names a file
    pub fn from_config(config: &EngineConfig) -> Result<Self, OracleError> {
        let mut oracle = Self::new();
        for (name, model) in &config.models {
            if let Some(path) = &model.path {
                oracle.load(name, path)?;
            }
        }
        Ok(oracle)
    }

    /// Load one model file
    pub fn load(&mut self, name: &str, path: impl AsRef<Path>) -> Result<(), OracleError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| OracleError::Load {
            name: name.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        let model: LinearModel = serde_json::from_str(&content).map_err(|e| OracleError::Load {
            name: name.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;

        self.insert(name, model)?;
        info!(model = name, path = %path.display(), "loaded scoring model");
        Ok(())
    }

    /// Register an in-memory model
    pub fn insert(&mut self, name: &str, model: LinearModel) -> Result<(), OracleError> {
        model.validate(name)?;
        self.models.insert(name.to_string(), model);
        Ok(())
    }

    /// Number of loaded models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ScoringOracle for LinearOracle {
    fn evaluate(&self, model: &str, features: &[f32]) -> Result<Vec<f32>, OracleError> {
        let m = self
            .models
            .get(model)
            .ok_or_else(|| OracleError::UnknownModel(model.to_string()))?;

        if features.len() != m.input_len {
            return Err(OracleError::ShapeMismatch {
                model: model.to_string(),
                expected: m.input_len,
                actual: features.len(),
            });
        }

        Ok(m.predict(features))
    }

    fn shape(&self, model: &str) -> Option<ModelShape> {
        self.models.get(model).map(LinearModel::shape)
    }
}
