//! Train a causal LM on site content and publish data and model to Cloud Storage.

use super::auth::TokenProvider;
use super::storage::{upload_dir, GcsClient, ObjectStore};
use super::GcpSettings;
use crate::error::CoreResult;
use crate::training::CausalLmTrainer;
use sitetune_training::{
    load_training_data, ModelSpec, ProgressSink, Trainer, TrainingDevice, TrainingHyperParams, TrainingJobSpec,
    TrainingManifest, DEFAULT_TRAINING_DATA_PATH,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Arguments of a cloud training run. Defaults reproduce the content fine-tune.
#[derive(Debug, Clone)]
pub struct CloudTrainParams {
    pub model_id: String,
    pub training_data_path: PathBuf,
    pub output_dir: PathBuf,
    pub hyperparams: TrainingHyperParams,
    pub device: TrainingDevice,
}

impl Default for CloudTrainParams {
    fn default() -> Self {
        Self {
            model_id: "microsoft/phi-2".to_string(),
            training_data_path: PathBuf::from(DEFAULT_TRAINING_DATA_PATH),
            output_dir: PathBuf::from("models/finetuned_phi"),
            hyperparams: TrainingHyperParams::causal_preset(),
            device: TrainingDevice::Auto,
        }
    }
}

impl CloudTrainParams {
    #[must_use]
    pub fn to_job(&self) -> TrainingJobSpec {
        let mut job = TrainingJobSpec::content_causal_lm(self.training_data_path.clone(), self.output_dir.clone());
        job.base_model = ModelSpec::candle(&self.model_id);
        job.hyperparams = self.hyperparams.clone();
        job.resources.device = self.device;
        job
    }
}

#[derive(Debug, Clone)]
pub struct CloudTrainOutcome {
    pub data_uri: String,
    pub model_uris: Vec<String>,
    pub manifest: TrainingManifest,
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub struct GcpTrainer {
    settings: GcpSettings,
    store: Arc<dyn ObjectStore>,
    trainer: CausalLmTrainer,
}

impl GcpTrainer {
    pub fn new(settings: GcpSettings, tokens: Arc<dyn TokenProvider>) -> CoreResult<Self> {
        let store = Arc::new(GcsClient::new(&settings, tokens)?);
        Ok(Self::with_store(settings, store))
    }

    #[must_use]
    pub fn with_store(settings: GcpSettings, store: Arc<dyn ObjectStore>) -> Self {
        Self { settings, store, trainer: CausalLmTrainer::new() }
    }

    #[must_use]
    pub fn trainer(&self) -> &CausalLmTrainer {
        &self.trainer
    }

    pub async fn upload_training_data(&self, local_path: &Path) -> CoreResult<String> {
        let object = format!("training_data/{}/training_data.json", timestamp());
        self.store.upload_file(local_path, &object).await
    }

    /// Render every record of the training data as a prompt.
    pub fn prepare_dataset(&self, data_path: &Path) -> CoreResult<Vec<String>> {
        Ok(load_training_data(data_path)?.iter().map(|r| r.to_prompt()).collect())
    }

    pub async fn train_model(
        &self,
        params: &CloudTrainParams,
        progress: &dyn ProgressSink,
    ) -> CoreResult<CloudTrainOutcome> {
        match self.try_train(params, progress).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("An error occurred during training: {e}");
                Err(e)
            }
        }
    }

    async fn try_train(&self, params: &CloudTrainParams, progress: &dyn ProgressSink) -> CoreResult<CloudTrainOutcome> {
        info!(project = %self.settings.project_id, bucket = %self.settings.bucket_name, "Uploading training data to GCS...");
        let data_uri = self.upload_training_data(&params.training_data_path).await?;
        info!(uri = %data_uri, "uploaded training data");

        info!("Preparing dataset...");
        let prompts = self.prepare_dataset(&params.training_data_path)?;
        info!(examples = prompts.len(), model = %params.model_id, "Loading model");

        info!("Starting training...");
        let job = params.to_job();
        let manifest = self.trainer.run(&job, progress).await?;
        info!(path = %params.output_dir.display(), "Saved model");

        info!("Uploading model to GCS...");
        let prefix = format!("models/{}", timestamp());
        let model_uris = upload_dir(self.store.as_ref(), &params.output_dir, &prefix).await?;

        info!("Training completed successfully!");
        Ok(CloudTrainOutcome { data_uri, model_uris, manifest })
    }
}
