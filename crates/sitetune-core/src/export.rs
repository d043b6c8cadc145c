//! Prepare a fine-tuned model for static hosting.
//!
//! The export re-saves the model through the same loader the application uses,
//! so a model that fails to load never reaches the web directory.

use crate::error::CoreResult;
use crate::loader::{LoadedModel, ModelKind};
use crate::models::ModelFiles;
use crate::training::save_tokenizer;
use candle_core::Device;
use serde_json::Value;
use sitetune_training::layout::{CONFIG_FILE, MODEL_CARD_FILE, TOKENIZER_FILE, WEIGHTS_FILE};
use sitetune_training::{make_artifact, ArtifactKind, TrainingLayout, TrainingManifest, TrainingObjective};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_WEB_MODEL_DIR: &str = "static/models/finetuned_distilbert";

/// Used when no manifest records the training sequence length.
const FALLBACK_MAX_SEQ_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCard {
    pub title: String,
    pub description: String,
    pub base_model: String,
    pub task: String,
    pub num_labels: Option<usize>,
    pub max_seq_len: usize,
}

impl ModelCard {
    #[must_use]
    pub fn describe(model: &LoadedModel, manifest: Option<&TrainingManifest>) -> Self {
        let base_model = manifest.map_or_else(|| "unknown".to_string(), |m| m.base_model.model_id.clone());
        let max_seq_len = manifest.map_or(FALLBACK_MAX_SEQ_LEN, |m| m.hyperparams.max_seq_len);
        match model.kind {
            ModelKind::SequenceClassification => Self {
                title: "Fine-tuned DistilBERT for Sentiment Analysis".to_string(),
                description: "This model is a fine-tuned version of DistilBERT for sentiment analysis of customer inquiries.\nIt was trained on review ratings and adapted for web deployment.".to_string(),
                base_model,
                task: "Text Classification".to_string(),
                num_labels: model.num_labels(),
                max_seq_len,
            },
            ModelKind::CausalLm => Self {
                title: "Fine-tuned Phi for Site Content".to_string(),
                description: "This model is a fine-tuned causal language model trained on instruction/response pairs extracted from the site's content.".to_string(),
                base_model,
                task: "Text Generation".to_string(),
                num_labels: None,
                max_seq_len,
            },
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut details = format!("- Base Model: {}\n- Task: {}\n", self.base_model, self.task);
        if let Some(n) = self.num_labels {
            details.push_str(&format!("- Number of Labels: {n}\n"));
        }
        details.push_str(&format!("- Max Sequence Length: {}\n", self.max_seq_len));

        format!(
            "# {}\n\n{}\n\n## Model Details\n{}\n## Usage\nThis model is optimized for web deployment and can be used with the Transformers.js library.\n",
            self.title, self.description, details
        )
    }
}

#[derive(Debug, Clone)]
pub struct WebExport {
    pub web_dir: PathBuf,
    pub card: ModelCard,
    pub manifest: Option<TrainingManifest>,
}

fn detect_kind(files: &ModelFiles) -> CoreResult<ModelKind> {
    let config: Value = files.read_config()?;
    Ok(match config.get("model_type").and_then(Value::as_str) {
        Some("phi") => ModelKind::CausalLm,
        _ => ModelKind::SequenceClassification,
    })
}

/// Copy a trained model into `web_dir` with a README model card.
pub fn prepare_web_model(model_dir: &Path, web_dir: &Path) -> CoreResult<WebExport> {
    info!("Starting web model preparation...");
    let layout = TrainingLayout::new(web_dir);
    layout.ensure_dirs()?;

    info!(path = %model_dir.display(), "Loading model and tokenizer...");
    let files = ModelFiles::from_dir(model_dir)?;
    let kind = detect_kind(&files)?;
    let model = LoadedModel::load(model_dir, kind, &Device::Cpu)?;
    let tokenizer = files.load_tokenizer()?;

    info!("Saving model files for web deployment...");
    model.save(&layout)?;
    save_tokenizer(&layout, &tokenizer)?;

    let source_manifest = match TrainingManifest::read(model_dir) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(path = %model_dir.display(), "no readable training manifest, model card uses defaults: {e}");
            None
        }
    };
    if let Some(manifest) = &source_manifest {
        if let TrainingObjective::SequenceClassification { num_labels } = manifest.objective {
            if Some(num_labels) != model.num_labels() {
                warn!(manifest = num_labels, config = ?model.num_labels(), "label count differs between manifest and config");
            }
        }
    }

    info!("Creating model card...");
    let card = ModelCard::describe(&model, source_manifest.as_ref());
    std::fs::write(web_dir.join(MODEL_CARD_FILE), card.render())?;

    let manifest = match source_manifest {
        Some(source) => {
            let root = layout.root();
            let manifest = TrainingManifest {
                artifacts: vec![
                    make_artifact(ArtifactKind::Weights, root, WEIGHTS_FILE)?,
                    make_artifact(ArtifactKind::Config, root, CONFIG_FILE)?,
                    make_artifact(ArtifactKind::Tokenizer, root, TOKENIZER_FILE)?,
                    make_artifact(ArtifactKind::ModelCard, root, MODEL_CARD_FILE)?,
                ],
                ..source
            };
            manifest.write(root)?;
            Some(manifest)
        }
        None => None,
    };

    info!("Model preparation completed successfully!");
    info!("Model files are ready in: {}", web_dir.display());
    Ok(WebExport { web_dir: web_dir.to_path_buf(), card, manifest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::training::test_support::{write_tiny_distilbert, write_tiny_phi};
    use tempfile::TempDir;

    #[test]
    fn test_render_card() {
        let card = ModelCard {
            title: "Fine-tuned DistilBERT for Sentiment Analysis".to_string(),
            description: "desc".to_string(),
            base_model: "distilbert-base-uncased".to_string(),
            task: "Text Classification".to_string(),
            num_labels: Some(5),
            max_seq_len: 128,
        };
        let text = card.render();
        assert!(text.starts_with("# Fine-tuned DistilBERT for Sentiment Analysis\n\ndesc\n"));
        assert!(text.contains("- Base Model: distilbert-base-uncased\n"));
        assert!(text.contains("- Number of Labels: 5\n"));
        assert!(text.contains("- Max Sequence Length: 128\n"));
        assert!(text.contains("Transformers.js"));
    }

    #[test]
    fn test_export_classifier_without_manifest() {
        let temp = TempDir::new().unwrap();
        let model_dir = temp.path().join("models/finetuned_distilbert");
        write_tiny_distilbert(&model_dir);
        let web_dir = temp.path().join("static/models/finetuned_distilbert");

        let export = prepare_web_model(&model_dir, &web_dir).unwrap();
        assert!(export.manifest.is_none());
        assert_eq!(export.card.num_labels, Some(2));
        assert_eq!(export.card.max_seq_len, FALLBACK_MAX_SEQ_LEN);
        for file in [WEIGHTS_FILE, CONFIG_FILE, TOKENIZER_FILE, MODEL_CARD_FILE] {
            assert!(web_dir.join(file).exists(), "missing {file}");
        }

        let reloaded = LoadedModel::load(&web_dir, ModelKind::SequenceClassification, &Device::Cpu).unwrap();
        assert_eq!(reloaded.num_labels(), Some(2));
    }

    #[test]
    fn test_export_carries_manifest_details() {
        let temp = TempDir::new().unwrap();
        let model_dir = temp.path().join("clf");
        write_tiny_distilbert(&model_dir);
        let mut job = sitetune_training::TrainingJobSpec::review_classifier();
        job.objective = TrainingObjective::SequenceClassification { num_labels: 2 };
        crate::training::write_manifest(
            &job,
            &TrainingLayout::new(&model_dir),
            sitetune_training::DatasetId("reviews".to_string()),
            sitetune_training::TrainingMetrics::default(),
        )
        .unwrap();

        let web_dir = temp.path().join("web");
        let export = prepare_web_model(&model_dir, &web_dir).unwrap();
        assert_eq!(export.card.base_model, "distilbert-base-uncased");
        assert_eq!(export.card.max_seq_len, 128);

        let manifest = export.manifest.unwrap();
        assert!(manifest.artifact(&ArtifactKind::ModelCard).is_some());
        manifest.verify(&web_dir).unwrap();
        assert_eq!(TrainingManifest::read(&web_dir).unwrap().job_id, job.job_id);
    }

    #[test]
    fn test_export_phi_is_text_generation() {
        let temp = TempDir::new().unwrap();
        let model_dir = temp.path().join("phi");
        write_tiny_phi(&model_dir);

        let export = prepare_web_model(&model_dir, &temp.path().join("web")).unwrap();
        assert_eq!(export.card.task, "Text Generation");
        assert!(!export.card.render().contains("Number of Labels"));
    }

    #[test]
    fn test_export_missing_model() {
        let temp = TempDir::new().unwrap();
        let err = prepare_web_model(&temp.path().join("absent"), &temp.path().join("web")).unwrap_err();
        assert!(matches!(err, CoreError::ModelNotFound(_)));
    }
}
