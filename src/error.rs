//! Error types for distboost.

use ndarray::ShapeError;
use thiserror::Error;

/// Result type alias for distboost operations.
pub type Result<T> = std::result::Result<T, DistBoostError>;

/// Errors that can occur while fitting or querying a distributional booster.
#[derive(Error, Debug)]
pub enum DistBoostError {
    /// No distribution is registered under the requested name.
    #[error("Unknown distribution '{name}', available: {available}")]
    UnknownDistribution { name: String, available: String },
    /// Labels are empty, degenerate, or outside the distribution's domain.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),
    /// Prediction was requested before a successful `fit`.
    #[error("Model is not fitted yet, call `fit` first")]
    NotFitted,
    /// A failure reported by the boosting engine.
    #[error("Engine error: {0}")]
    Engine(String),
    /// Invalid parameter value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Shape mismatch in arrays.
    #[error("Shape mismatch: expected {expected_shape}, got {actual_shape}")]
    ShapeMismatch {
        expected_shape: String,
        actual_shape: String,
    },
    /// An IO error.
    #[error("IO error: {0}")]
    Io(String),
    /// A serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DistBoostError {
    pub(crate) fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        DistBoostError::ShapeMismatch {
            expected_shape: expected.into(),
            actual_shape: actual.into(),
        }
    }
}

impl From<ShapeError> for DistBoostError {
    fn from(err: ShapeError) -> Self {
        DistBoostError::ShapeMismatch {
            expected_shape: "unknown".to_string(),
            actual_shape: err.to_string(),
        }
    }
}

impl From<std::io::Error> for DistBoostError {
    fn from(err: std::io::Error) -> Self {
        DistBoostError::Io(err.to_string())
    }
}

impl From<bincode::Error> for DistBoostError {
    fn from(err: bincode::Error) -> Self {
        DistBoostError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DistBoostError {
    fn from(err: serde_json::Error) -> Self {
        DistBoostError::Serialization(err.to_string())
    }
}
