//! Content extraction followed by a cloud training run.

use crate::cloud::{CloudTrainOutcome, CloudTrainParams, Endpoints, GcpSettings, GcpTrainer, TokenProvider};
use crate::config::SitetuneConfig;
use crate::error::CoreResult;
use sitetune_training::{ContentProcessor, ProgressSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub content_items: usize,
    pub training_examples: usize,
    pub training: CloudTrainOutcome,
}

pub struct Pipeline {
    settings: GcpSettings,
    content_dir: PathBuf,
    params: CloudTrainParams,
    tokens: Arc<dyn TokenProvider>,
}

impl Pipeline {
    /// Fails before touching any content when the GCP project or bucket is missing.
    pub fn from_config(config: &SitetuneConfig, tokens: Arc<dyn TokenProvider>) -> CoreResult<Self> {
        let settings = GcpSettings::resolve(config)?;
        let params = CloudTrainParams {
            training_data_path: config.training_data_path(),
            output_dir: config.model_dir().join("finetuned_phi"),
            ..CloudTrainParams::default()
        };
        Ok(Self { settings, content_dir: config.content_dir(), params, tokens })
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.settings = self.settings.with_endpoints(endpoints);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: CloudTrainParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn params(&self) -> &CloudTrainParams {
        &self.params
    }

    pub async fn run(&self, progress: &dyn ProgressSink) -> CoreResult<PipelineOutcome> {
        info!(content_dir = %self.content_dir.display(), "Processing website content...");
        let processor = ContentProcessor::new(&self.content_dir);
        let (content_items, training_examples) = processor.run(&self.params.training_data_path)?;

        info!("Starting model training on GCP...");
        let trainer = GcpTrainer::new(self.settings.clone(), self.tokens.clone())?;
        let training = trainer.train_model(&self.params, progress).await?;

        info!("Training pipeline completed successfully!");
        Ok(PipelineOutcome { content_items, training_examples, training })
    }
}

pub async fn run_pipeline(
    config: &SitetuneConfig,
    tokens: Arc<dyn TokenProvider>,
    progress: &dyn ProgressSink,
) -> CoreResult<PipelineOutcome> {
    Pipeline::from_config(config, tokens)?.run(progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::StaticToken;
    use crate::error::CoreError;
    use crate::training::test_support::write_tiny_phi;
    use mockito::Matcher;
    use sitetune_training::{load_training_data, RecordingProgressSink, SaveStrategy, TrainingDevice, TrainingHyperParams};
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> SitetuneConfig {
        let mut config = SitetuneConfig::default();
        config.gcp.project_id = Some("demo".to_string());
        config.gcp.bucket_name = Some("site-models".to_string());
        config.paths.content_dir = Some(temp.path().join("content"));
        config.paths.training_data = Some(temp.path().join("data/processed/training_data.json"));
        config.paths.model_dir = Some(temp.path().join("models"));
        config
    }

    #[tokio::test]
    async fn test_missing_gcp_settings_fail_first() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.gcp.bucket_name = None;

        let sink = RecordingProgressSink::default();
        let err = run_pipeline(&config, Arc::new(StaticToken("t".to_string())), &sink).await.unwrap_err();
        assert!(matches!(err, CoreError::MissingGcpSettings));
        assert!(!temp.path().join("data").exists());
    }

    #[test]
    fn test_default_output_under_model_dir() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::from_config(&config(&temp), Arc::new(StaticToken("t".to_string()))).unwrap();
        assert_eq!(pipeline.params().output_dir, temp.path().join("models/finetuned_phi"));
        assert_eq!(pipeline.params().model_id, "microsoft/phi-2");
        assert_eq!(pipeline.params().hyperparams.learning_rate, 2e-5);
    }

    #[tokio::test]
    async fn test_pipeline_extracts_trains_and_uploads() {
        let temp = TempDir::new().unwrap();
        let posts = temp.path().join("content/posts");
        std::fs::create_dir_all(&posts).unwrap();
        std::fs::write(
            posts.join("rust.md"),
            "---\ntitle: rust\ntags: [food]\ncategories: service\n---\nthe rust content was great\n",
        )
        .unwrap();

        let mut server = mockito::Server::new_async().await;
        let location = format!("{}/upload/session/1", server.url());
        let uploads = server
            .mock("POST", "/upload/storage/v1/b/site-models/o")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("location", &location)
            .expect_at_least(2)
            .create();
        let chunks = server.mock("PUT", "/upload/session/1").with_status(200).with_body("{}").expect_at_least(2).create();

        let config = config(&temp);
        let base = temp.path().join("base");
        write_tiny_phi(&base);
        let pipeline = Pipeline::from_config(&config, Arc::new(StaticToken("t".to_string()))).unwrap();
        let params = CloudTrainParams {
            model_id: base.to_string_lossy().into_owned(),
            hyperparams: TrainingHyperParams {
                train_batch_size: 2,
                max_steps: Some(1),
                max_seq_len: 16,
                save: SaveStrategy::No,
                ..TrainingHyperParams::default()
            },
            device: TrainingDevice::Cpu,
            ..pipeline.params().clone()
        };
        let pipeline = pipeline.with_params(params).with_endpoints(Endpoints::local(&server.url()));

        let sink = RecordingProgressSink::default();
        let outcome = pipeline.run(&sink).await.unwrap();
        assert_eq!(outcome.content_items, 1);
        assert_eq!(outcome.training_examples, 3);
        assert_eq!(outcome.training.manifest.metrics.steps, Some(1));
        assert_eq!(load_training_data(&config.training_data_path()).unwrap().len(), 3);
        assert!(temp.path().join("models/finetuned_phi/model.safetensors").exists());
        uploads.assert();
        chunks.assert();
    }
}
