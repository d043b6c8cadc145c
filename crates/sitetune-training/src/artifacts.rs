use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{ModelSpec, TrainingHyperParams, TrainingJobId, TrainingObjective};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// File name of the manifest written next to every trained model.
pub const MANIFEST_FILE: &str = "training_manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Weights,
    Tokenizer,
    Config,
    TrainerState,
    ModelCard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    /// Path relative to the model directory.
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TrainingMetrics {
    pub train_loss: Option<f64>,
    pub eval_loss: Option<f64>,
    pub eval_accuracy: Option<f64>,
    pub steps: Option<u64>,
    pub epochs_completed: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub objective: TrainingObjective,
    pub base_model: ModelSpec,
    pub dataset_id: DatasetId,
    pub hyperparams: TrainingHyperParams,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
}

impl TrainingManifest {
    pub fn read(model_dir: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(model_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn write(&self, model_dir: &Path) -> TrainingResult<()> {
        std::fs::write(model_dir.join(MANIFEST_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    #[must_use]
    pub fn artifact(&self, kind: &ArtifactKind) -> Option<&TrainingArtifact> {
        self.artifacts.iter().find(|a| &a.kind == kind)
    }

    /// Re-hash every artifact under `model_dir` and compare with the recorded digests.
    pub fn verify(&self, model_dir: &Path) -> TrainingResult<()> {
        for artifact in &self.artifacts {
            let actual = sha256_file(&model_dir.join(&artifact.path))?;
            if actual != artifact.sha256 {
                return Err(TrainingError::Artifact(format!(
                    "checksum mismatch for {}",
                    artifact.path.display()
                )));
            }
        }
        Ok(())
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Describe `model_dir/rel` as an artifact of the given kind.
pub fn make_artifact(kind: ArtifactKind, model_dir: &Path, rel: impl Into<PathBuf>) -> TrainingResult<TrainingArtifact> {
    let rel = rel.into();
    let path = model_dir.join(&rel);
    if !path.exists() {
        return Err(TrainingError::Artifact(format!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let hash = sha256_file(&path)?;
    Ok(TrainingArtifact { kind, path: rel, sha256: hash })
}
