use crate::dataset::{DatasetSource, InstructionRecord};
use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Backend-agnostic model reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Engine identifier (e.g., "candle")
    pub engine: String,
    /// Hub model id or local model directory
    pub model_id: String,
}

impl ModelSpec {
    #[must_use]
    pub fn candle(model_id: impl Into<String>) -> Self {
        Self { engine: "candle".to_string(), model_id: model_id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrainingObjective {
    SequenceClassification { num_labels: usize },
    CausalLm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingDevice {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingResources {
    pub device: TrainingDevice,
}

impl Default for TrainingResources {
    fn default() -> Self {
        Self { device: TrainingDevice::Auto }
    }
}

/// When intermediate checkpoints are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "every", rename_all = "snake_case")]
pub enum SaveStrategy {
    No,
    Steps(u64),
    Epoch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHyperParams {
    pub seed: u64,
    pub epochs: u32,
    pub learning_rate: f64,
    pub train_batch_size: usize,
    pub eval_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    /// Overrides `epochs` when set.
    pub max_steps: Option<u64>,
    pub warmup_steps: u64,
    pub weight_decay: f64,
    pub max_grad_norm: Option<f64>,
    pub max_seq_len: usize,
    pub logging_steps: u64,
    pub save: SaveStrategy,
    pub save_total_limit: Option<usize>,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self {
            seed: 42,
            epochs: 3,
            learning_rate: 5e-5,
            train_batch_size: 8,
            eval_batch_size: 8,
            gradient_accumulation_steps: 1,
            max_steps: None,
            warmup_steps: 0,
            weight_decay: 0.0,
            max_grad_norm: Some(1.0),
            max_seq_len: 512,
            logging_steps: 500,
            save: SaveStrategy::Steps(500),
            save_total_limit: None,
        }
    }
}

impl TrainingHyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.train_batch_size == 0 || self.eval_batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch sizes must be >= 1".to_string()));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(TrainingError::InvalidSpec("gradient_accumulation_steps must be >= 1".to_string()));
        }
        if self.max_steps == Some(0) {
            return Err(TrainingError::InvalidSpec("max_steps must be >= 1 when set".to_string()));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(TrainingError::InvalidSpec("weight_decay must be >= 0".to_string()));
        }
        if self.max_grad_norm.is_some_and(|n| !n.is_finite() || n <= 0.0) {
            return Err(TrainingError::InvalidSpec("max_grad_norm must be > 0 when set".to_string()));
        }
        if self.max_seq_len < 2 {
            return Err(TrainingError::InvalidSpec("max_seq_len must be >= 2".to_string()));
        }
        if self.logging_steps == 0 {
            return Err(TrainingError::InvalidSpec("logging_steps must be >= 1".to_string()));
        }
        if self.save == SaveStrategy::Steps(0) {
            return Err(TrainingError::InvalidSpec("save steps must be >= 1".to_string()));
        }
        if self.save_total_limit == Some(0) {
            return Err(TrainingError::InvalidSpec("save_total_limit must be >= 1 when set".to_string()));
        }
        Ok(())
    }

    /// DistilBERT review-rating fine-tune.
    #[must_use]
    pub fn classifier_preset() -> Self {
        Self {
            epochs: 3,
            learning_rate: 5e-5,
            train_batch_size: 16,
            eval_batch_size: 16,
            warmup_steps: 500,
            weight_decay: 0.01,
            max_seq_len: 128,
            logging_steps: 100,
            save: SaveStrategy::Steps(500),
            save_total_limit: Some(2),
            ..Self::default()
        }
    }

    /// Phi causal-LM fine-tune on extracted site content.
    #[must_use]
    pub fn causal_preset() -> Self {
        Self {
            epochs: 3,
            learning_rate: 2e-5,
            train_batch_size: 4,
            eval_batch_size: 4,
            gradient_accumulation_steps: 4,
            max_steps: Some(1000),
            warmup_steps: 100,
            weight_decay: 0.01,
            max_seq_len: 512,
            logging_steps: 10,
            save: SaveStrategy::Steps(100),
            ..Self::default()
        }
    }

    /// Tiny instruction fine-tune used to check a machine end to end.
    #[must_use]
    pub fn smoke_preset() -> Self {
        Self {
            epochs: 3,
            learning_rate: 5e-5,
            train_batch_size: 1,
            eval_batch_size: 1,
            gradient_accumulation_steps: 2,
            max_seq_len: 256,
            logging_steps: 1,
            save: SaveStrategy::Epoch,
            save_total_limit: Some(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub base_model: ModelSpec,
    pub objective: TrainingObjective,
    pub dataset: DatasetSource,
    pub hyperparams: TrainingHyperParams,
    pub resources: TrainingResources,
    pub output_dir: PathBuf,
}

impl TrainingJobSpec {
    #[must_use]
    pub fn new(
        base_model: ModelSpec,
        objective: TrainingObjective,
        dataset: DatasetSource,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            job_id: TrainingJobId::new(),
            created_at: Utc::now(),
            base_model,
            objective,
            dataset,
            hyperparams: TrainingHyperParams::default(),
            resources: TrainingResources::default(),
            output_dir,
        }
    }

    /// DistilBERT fine-tuned on 5-star Yelp reviews, CPU only.
    #[must_use]
    pub fn review_classifier() -> Self {
        let mut job = Self::new(
            ModelSpec::candle("distilbert-base-uncased"),
            TrainingObjective::SequenceClassification { num_labels: 5 },
            DatasetSource::HubLabeled {
                repo_id: "Yelp/yelp_review_full".to_string(),
                train_files: vec!["yelp_review_full/train-00000-of-00001.parquet".to_string()],
                eval_files: vec!["yelp_review_full/test-00000-of-00001.parquet".to_string()],
                text_field: "text".to_string(),
                label_field: "label".to_string(),
                max_records: None,
            },
            PathBuf::from("models/finetuned_distilbert"),
        );
        job.hyperparams = TrainingHyperParams::classifier_preset();
        job.resources.device = TrainingDevice::Cpu;
        job
    }

    /// Phi-2 fine-tuned on instruction records extracted from site content.
    #[must_use]
    pub fn content_causal_lm(training_data: PathBuf, output_dir: PathBuf) -> Self {
        let mut job = Self::new(
            ModelSpec::candle("microsoft/phi-2"),
            TrainingObjective::CausalLm,
            DatasetSource::InstructionJson { path: training_data },
            output_dir,
        );
        job.hyperparams = TrainingHyperParams::causal_preset();
        job
    }

    /// Phi-2 fine-tuned on three built-in examples.
    #[must_use]
    pub fn smoke() -> Self {
        let records = vec![
            InstructionRecord::new("What is AI?", "AI stands for Artificial Intelligence."),
            InstructionRecord::new("Define machine learning.", "Machine learning is a subset of AI that learns from data."),
            InstructionRecord::new("Explain LLMs.", "LLMs are large language models trained to generate and understand text."),
        ];
        let mut job = Self::new(
            ModelSpec::candle("microsoft/phi-2"),
            TrainingObjective::CausalLm,
            DatasetSource::InstructionInline { records },
            PathBuf::from("finetuned_phi2"),
        );
        job.hyperparams = TrainingHyperParams::smoke_preset();
        job
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.base_model.engine.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("base_model.engine is required".to_string()));
        }
        if self.base_model.model_id.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("base_model.model_id is required".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(TrainingError::InvalidSpec("output_dir is required".to_string()));
        }
        match (&self.objective, self.dataset.is_labeled()) {
            (TrainingObjective::SequenceClassification { num_labels }, true) => {
                if *num_labels < 2 {
                    return Err(TrainingError::InvalidSpec("num_labels must be >= 2".to_string()));
                }
            }
            (TrainingObjective::CausalLm, false) => {}
            (TrainingObjective::SequenceClassification { .. }, false) => {
                return Err(TrainingError::InvalidSpec(
                    "sequence classification needs a labeled dataset".to_string(),
                ));
            }
            (TrainingObjective::CausalLm, true) => {
                return Err(TrainingError::InvalidSpec("causal LM training needs an instruction dataset".to_string()));
            }
        }
        self.hyperparams.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_validate_requires_base_model_fields() {
        let spec = TrainingJobSpec::new(
            ModelSpec { engine: "".to_string(), model_id: "".to_string() },
            TrainingObjective::CausalLm,
            DatasetSource::InstructionJson { path: PathBuf::from("x.json") },
            PathBuf::from("out"),
        );
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_presets_validate() {
        assert!(TrainingJobSpec::review_classifier().validate().is_ok());
        assert!(TrainingJobSpec::smoke().validate().is_ok());
        assert!(TrainingJobSpec::content_causal_lm("d.json".into(), "out".into()).validate().is_ok());
    }

    #[test]
    fn test_objective_must_match_dataset() {
        let mut job = TrainingJobSpec::smoke();
        job.objective = TrainingObjective::SequenceClassification { num_labels: 5 };
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("labeled dataset"));
    }

    #[test]
    fn test_hyperparams_reject_zero_accumulation() {
        let hp = TrainingHyperParams { gradient_accumulation_steps: 0, ..TrainingHyperParams::default() };
        assert!(hp.validate().is_err());
    }

    #[test]
    fn test_classifier_preset_values() {
        let job = TrainingJobSpec::review_classifier();
        assert_eq!(job.hyperparams.train_batch_size, 16);
        assert_eq!(job.hyperparams.max_seq_len, 128);
        assert_eq!(job.hyperparams.save_total_limit, Some(2));
        assert_eq!(job.resources.device, TrainingDevice::Cpu);
    }
}
