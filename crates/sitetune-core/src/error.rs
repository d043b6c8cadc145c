//! Error types for the sitetune backends.

use sitetune_training::TrainingError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by models, trainers, cloud clients, and export.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("Model not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Unsupported model type: {0}")]
    UnsupportedModelType(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("GCP_PROJECT_ID and GCP_BUCKET_NAME environment variables must be set")]
    MissingGcpSettings,

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cloud API returned {status}: {message}")]
    CloudApi { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl From<CoreError> for TrainingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Training(inner) => inner,
            other => TrainingError::Trainer(other.to_string()),
        }
    }
}

impl CoreError {
    pub(crate) fn tokenizer(err: impl std::fmt::Display) -> Self {
        Self::Training(TrainingError::Tokenizer(err.to_string()))
    }
}
