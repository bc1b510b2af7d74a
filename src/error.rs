//! Error types

use thiserror::Error;

/// Errors raised while building, evaluating or training a model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NnError {
    /// Adjacent widths or tensor shapes disagree
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Prediction/target (or input/target) batches have different shapes
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A batch or simulation was asked for a non-positive number of samples
    #[error("invalid sample count: {0} (must be positive)")]
    InvalidSampleCount(usize),

    /// A model spec without any stage
    #[error("model must contain at least one stage")]
    EmptyModel,

    /// A hyperparameter outside its domain
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// NaN or infinity in sample data
    #[error("non-finite value in {0}")]
    NonFiniteValue(String),
}

impl NnError {
    /// Create a shape mismatch error
    pub fn shape(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a dimension mismatch error
    pub fn dimension(expected: &[usize], actual: &[usize]) -> Self {
        Self::DimensionMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, NnError>;
