//! Error types for the drytime training service

use thiserror::Error;

/// Result type alias for drytime operations
pub type Result<T> = std::result::Result<T, DrytimeError>;

/// Main error type for the training pipeline and its collaborators
#[derive(Error, Debug)]
pub enum DrytimeError {
    /// Payload shape not recognized, required column missing, or unparseable value
    #[error("Schema error: {0}")]
    Schema(String),

    /// Numerical or data-volume failure while fitting a model
    #[error("Fit error: {0}")]
    Fit(String),

    #[error("Export error: {0}")]
    Export(String),

    /// Object storage rejected an artifact
    #[error("Upload error: {0}")]
    Upload(String),

    /// Remote sensor API could not be reached or returned an error status
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,
}

impl From<serde_json::Error> for DrytimeError {
    fn from(err: serde_json::Error) -> Self {
        DrytimeError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for DrytimeError {
    fn from(err: ndarray::ShapeError) -> Self {
        DrytimeError::Shape {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<prost::DecodeError> for DrytimeError {
    fn from(err: prost::DecodeError) -> Self {
        DrytimeError::Export(format!("ONNX decode failed: {}", err))
    }
}

impl From<reqwest::Error> for DrytimeError {
    fn from(err: reqwest::Error) -> Self {
        DrytimeError::Fetch(err.to_string())
    }
}

impl From<object_store::Error> for DrytimeError {
    fn from(err: object_store::Error) -> Self {
        DrytimeError::Upload(err.to_string())
    }
}
