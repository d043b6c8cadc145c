use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training job spec: {0}")]
    InvalidSpec(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("content error in {path}: {message}")]
    Content { path: PathBuf, message: String },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("hub error: {0}")]
    Hub(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error("training job {0} was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub(crate) fn content(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Content { path: path.into(), message: message.into() }
    }
}
