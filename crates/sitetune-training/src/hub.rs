//! Hugging Face Hub access (models and datasets).

use crate::error::{TrainingError, TrainingResult};
use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::{Cache, Repo, RepoType};
use std::path::PathBuf;
use tracing::debug;

/// Build a Hub client, honoring `HF_TOKEN` and the cached login token.
pub fn hub_api() -> TrainingResult<Api> {
    let token = std::env::var("HF_TOKEN")
        .ok()
        .or_else(|| Cache::from_env().token());

    let mut builder = ApiBuilder::new();
    if let Some(token) = token {
        builder = builder.with_token(Some(token));
    }
    builder.build().map_err(|e| TrainingError::Hub(format!("failed to initialize Hub API: {e}")))
}

fn fetch(repo: Repo, file: &str) -> TrainingResult<PathBuf> {
    let repo_id = repo.url();
    debug!(repo = %repo_id, file, "fetching from hub");
    hub_api()?
        .repo(repo)
        .get(file)
        .map_err(|e| TrainingError::Hub(format!("failed to download {file} from {repo_id}: {e}")))
}

/// Download (or reuse the cached copy of) a file from a model repository.
pub fn fetch_model_file(model_id: &str, file: &str) -> TrainingResult<PathBuf> {
    fetch(Repo::new(model_id.to_string(), RepoType::Model), file)
}

/// Download (or reuse the cached copy of) a file from a dataset repository.
pub fn fetch_dataset_file(repo_id: &str, file: &str) -> TrainingResult<PathBuf> {
    fetch(Repo::new(repo_id.to_string(), RepoType::Dataset), file)
}
