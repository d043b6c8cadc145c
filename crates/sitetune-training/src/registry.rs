use crate::artifacts::{TrainingManifest, MANIFEST_FILE};
use crate::error::TrainingResult;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A trained model found on disk.
#[derive(Debug, Clone)]
pub struct TrainedModelEntry {
    /// Directory name under the model root (what `ModelLoader::load_model` takes).
    pub name: String,
    pub model_dir: PathBuf,
    pub manifest: TrainingManifest,
}

/// Discover trained models by scanning `<model_root>/*/training_manifest.json`.
///
/// Directories whose manifest cannot be parsed are logged and skipped.
pub fn discover_trained_models(model_root: &Path) -> TrainingResult<Vec<TrainedModelEntry>> {
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(model_root) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let model_dir = entry.path();
        if !model_dir.is_dir() || !model_dir.join(MANIFEST_FILE).exists() {
            continue;
        }
        match TrainingManifest::read(&model_dir) {
            Ok(manifest) => out.push(TrainedModelEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                model_dir,
                manifest,
            }),
            Err(e) => warn!("skipping {}: unreadable manifest: {}", model_dir.display(), e),
        }
    }

    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::TrainingMetrics;
    use crate::dataset::DatasetId;
    use crate::job::{ModelSpec, TrainingHyperParams, TrainingJobId, TrainingObjective};
    use tempfile::TempDir;

    #[test]
    fn test_discover_skips_dirs_without_manifest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::create_dir_all(root.join("broken")).unwrap();
        std::fs::write(root.join("broken").join(MANIFEST_FILE), "not json").unwrap();
        std::fs::create_dir_all(root.join("finetuned_phi")).unwrap();

        let manifest = TrainingManifest {
            job_id: TrainingJobId("job-1".to_string()),
            created_at: chrono::Utc::now(),
            objective: TrainingObjective::CausalLm,
            base_model: ModelSpec::candle("microsoft/phi-2"),
            dataset_id: DatasetId("d".to_string()),
            hyperparams: TrainingHyperParams::causal_preset(),
            metrics: TrainingMetrics::default(),
            artifacts: vec![],
        };
        manifest.write(&root.join("finetuned_phi")).unwrap();

        let found = discover_trained_models(root).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "finetuned_phi");
        assert_eq!(found[0].manifest.job_id.0, "job-1");
    }

    #[test]
    fn test_discover_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(discover_trained_models(&temp.path().join("none")).unwrap().is_empty());
    }
}
