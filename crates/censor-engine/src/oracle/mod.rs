//! Scoring oracle interface
//!
//! The engine consumes a trained scorer through one narrow call:
//! `evaluate(model, features) -> probabilities`. Model internals are opaque.

mod linear;
mod worker;

pub use linear::{Activation, LinearModel, LinearOracle};
pub use worker::BoundedOracle;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Input and output geometry of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
    /// Feature vector length
    pub input_len: usize,
    /// Probability vector length
    pub output_channels: usize,
}

/// Oracle errors
#[derive(Debug, Error)]
pub enum OracleError {
    /// No model by that name
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Feature vector has the wrong length
    #[error("model {model}: expected {expected} features, got {actual}")]
    ShapeMismatch {
        /// Model name
        model: String,
        /// Model input length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// No answer within the call budget
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    /// Request queue full
    #[error("oracle queue full")]
    Busy,

    /// Worker pool gone
    #[error("oracle workers disconnected")]
    Disconnected,

    /// Model file could not be loaded
    #[error("failed to load model {name}: {reason}")]
    Load {
        /// Model name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// Model evaluation failed
    #[error("model evaluation failed: {0}")]
    Evaluation(String),

    /// Worker thread could not be started
    #[error("failed to spawn oracle worker: {0}")]
    Spawn(String),
}

/// Maps a feature vector to per-channel probabilities
pub trait ScoringOracle: Send + Sync {
    /// Evaluate `model` on `features`
    fn evaluate(&self, model: &str, features: &[f32]) -> Result<Vec<f32>, OracleError>;

    /// Geometry of `model`, or `None` if the oracle does not know it
    fn shape(&self, model: &str) -> Option<ModelShape>;
}

impl<T: ScoringOracle + ?Sized> ScoringOracle for Arc<T> {
    fn evaluate(&self, model: &str, features: &[f32]) -> Result<Vec<f32>, OracleError> {
        (**self).evaluate(model, features)
    }

    fn shape(&self, model: &str) -> Option<ModelShape> {
        (**self).shape(model)
    }
}
