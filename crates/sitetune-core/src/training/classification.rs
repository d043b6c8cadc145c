//! Sequence classification fine-tuning (DistilBERT).

use super::batch::{resolve_pad_token, stack, EncodedSequence, SequenceEncoder};
use super::engine::{EvalBatch, FineTuneTask, TrainingEngine};
use super::{save_tokenizer, select_device, write_config, write_manifest, JobTracker};
use crate::error::CoreResult;
use crate::models::{load_pretrained, DistilBertConfig, DistilBertForSequenceClassification, ModelFiles};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use sitetune_training::dataset::validate_labeled;
use sitetune_training::{
    build_labeled_dataset, LabeledExample, ProgressEvent, ProgressSink, Trainer, TrainerStatus, TrainingError,
    TrainingJobId, TrainingJobSpec, TrainingLayout, TrainingManifest, TrainingMetrics, TrainingObjective,
    TrainingResult,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

struct ClassificationTask<'a> {
    model: &'a DistilBertForSequenceClassification,
    device: Device,
    train: Vec<(EncodedSequence, u32)>,
    eval: Vec<(EncodedSequence, u32)>,
}

impl ClassificationTask<'_> {
    fn batch(&self, split: &[(EncodedSequence, u32)], indices: &[usize]) -> CoreResult<(Tensor, Tensor, Tensor)> {
        let rows: Vec<&(EncodedSequence, u32)> = indices.iter().map(|&i| &split[i]).collect();
        let sequences: Vec<&EncodedSequence> = rows.iter().map(|(s, _)| s).collect();
        let (ids, mask) = stack(&sequences, &self.device)?;
        let labels: Vec<u32> = rows.iter().map(|(_, l)| *l).collect();
        let labels = Tensor::from_vec(labels, rows.len(), &self.device)?;
        Ok((ids, mask, labels))
    }
}

impl FineTuneTask for ClassificationTask<'_> {
    fn train_len(&self) -> usize {
        self.train.len()
    }

    fn eval_len(&self) -> usize {
        self.eval.len()
    }

    fn train_loss(&self, indices: &[usize]) -> CoreResult<Tensor> {
        let (ids, mask, labels) = self.batch(&self.train, indices)?;
        let logits = self.model.forward(&ids, &mask, true)?;
        Ok(candle_nn::loss::cross_entropy(&logits, &labels)?)
    }

    fn eval_batch(&self, indices: &[usize]) -> CoreResult<EvalBatch> {
        let (ids, mask, labels) = self.batch(&self.eval, indices)?;
        let logits = self.model.forward(&ids, &mask, false)?.detach();
        let loss = candle_nn::loss::cross_entropy(&logits, &labels)?.to_dtype(DType::F32)?.to_scalar::<f32>()?;

        let predictions = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
        let labels = labels.to_vec1::<u32>()?;
        let correct = predictions.iter().zip(&labels).filter(|(p, l)| p == l).count();
        Ok(EvalBatch { loss_sum: f64::from(loss) * indices.len() as f64, count: indices.len(), correct: Some(correct) })
    }
}

fn encode_split(encoder: &SequenceEncoder, examples: &[LabeledExample]) -> CoreResult<Vec<(EncodedSequence, u32)>> {
    let texts: Vec<String> = examples.iter().map(|e| e.text.clone()).collect();
    let encoded = encoder.encode(&texts)?;
    Ok(encoded.into_iter().zip(examples.iter().map(|e| e.label)).collect())
}

/// Fine-tune a DistilBERT checkpoint for sequence classification and save it to `job.output_dir`.
pub fn fine_tune_classifier(
    job: &TrainingJobSpec,
    cancel: Arc<AtomicBool>,
    events: UnboundedSender<ProgressEvent>,
) -> CoreResult<TrainingManifest> {
    let TrainingObjective::SequenceClassification { num_labels } = job.objective else {
        return Err(TrainingError::InvalidSpec("expected a sequence classification job".to_string()).into());
    };
    let hp = &job.hyperparams;
    let device = select_device(job.resources.device)?;
    let layout = TrainingLayout::new(&job.output_dir);
    layout.ensure_dirs()?;

    let (splits, dataset_id) = build_labeled_dataset(&job.dataset)?;
    validate_labeled(&splits.train, num_labels)?;
    validate_labeled(&splits.eval, num_labels)?;

    let files = ModelFiles::resolve(&job.base_model.model_id)?;
    let mut config: DistilBertConfig = files.read_config()?;
    let tokenizer = files.load_tokenizer()?;
    let (pad_id, pad_token) = resolve_pad_token(&tokenizer, &["[PAD]"], Some(config.pad_token_id))?;
    let max_len = hp.max_seq_len.min(config.max_position_embeddings);
    let encoder = SequenceEncoder::new(tokenizer.clone(), max_len, pad_id, pad_token)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = DistilBertForSequenceClassification::new(&config, num_labels, vb)?;
    load_pretrained(&varmap, &files.weights, &device)?;

    let mut engine = TrainingEngine::new(job.job_id.clone(), hp.clone(), layout.clone(), varmap.clone(), cancel, events);
    engine.message(format!(
        "tokenizing {} training and {} evaluation examples",
        splits.train.len(),
        splits.eval.len()
    ));
    let task = ClassificationTask {
        model: &model,
        device,
        train: encode_split(&encoder, &splits.train)?,
        eval: encode_split(&encoder, &splits.eval)?,
    };

    let outcome = engine.train(&task)?;
    let eval = engine.evaluate(&task)?;

    info!(path = %layout.root().display(), "saving fine-tuned classifier");
    varmap.save(layout.weights_path())?;
    config.set_num_labels(num_labels);
    write_config(&layout, &config)?;
    save_tokenizer(&layout, &tokenizer)?;
    engine.write_trainer_state(&layout.trainer_state_path())?;

    let metrics = TrainingMetrics {
        train_loss: Some(outcome.train_loss),
        eval_loss: eval.map(|e| e.loss),
        eval_accuracy: eval.and_then(|e| e.accuracy),
        steps: Some(outcome.steps),
        epochs_completed: Some(outcome.epochs_completed),
    };
    write_manifest(job, &layout, dataset_id, metrics)
}

/// Local candle trainer for `SequenceClassification` jobs.
#[derive(Clone, Default)]
pub struct SequenceClassificationTrainer {
    tracker: JobTracker,
}

impl SequenceClassificationTrainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Trainer for SequenceClassificationTrainer {
    fn id(&self) -> &'static str {
        "candle-sequence-classification"
    }

    fn supports(&self, objective: &TrainingObjective) -> bool {
        matches!(objective, TrainingObjective::SequenceClassification { .. })
    }

    async fn run(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingManifest> {
        self.prepare(job).await?;
        self.tracker.run(job, progress, |job, cancel, events| fine_tune_classifier(&job, cancel, events)).await
    }

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus> {
        Ok(self.tracker.status(job_id))
    }

    async fn cancel(&self, job_id: &TrainingJobId) -> TrainingResult<()> {
        self.tracker.cancel(job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::test_support::write_tiny_distilbert;
    use sitetune_training::{
        ArtifactKind, DatasetSource, ModelSpec, RecordingProgressSink, SaveStrategy, TrainingDevice,
        TrainingHyperParams,
    };
    use tempfile::TempDir;

    fn write_jsonl(path: &std::path::Path, rows: &[(&str, u32)]) {
        let body: Vec<String> =
            rows.iter().map(|(t, l)| serde_json::json!({"text": t, "label": l}).to_string()).collect();
        std::fs::write(path, body.join("\n")).unwrap();
    }

    fn job(temp: &TempDir) -> TrainingJobSpec {
        let base = temp.path().join("base");
        write_tiny_distilbert(&base);

        let train = temp.path().join("train.jsonl");
        let eval = temp.path().join("eval.jsonl");
        write_jsonl(
            &train,
            &[("great food", 1), ("bad service", 0), ("the food was great", 1), ("the service was bad", 0)],
        );
        write_jsonl(&eval, &[("great service", 1), ("bad food", 0)]);

        let mut job = TrainingJobSpec::new(
            ModelSpec::candle(base.to_string_lossy()),
            TrainingObjective::SequenceClassification { num_labels: 2 },
            DatasetSource::LabeledJsonl { train, eval: Some(eval) },
            temp.path().join("out"),
        );
        job.hyperparams = TrainingHyperParams {
            epochs: 2,
            learning_rate: 1e-3,
            train_batch_size: 2,
            eval_batch_size: 2,
            max_seq_len: 8,
            logging_steps: 1,
            save: SaveStrategy::Steps(2),
            save_total_limit: Some(1),
            ..TrainingHyperParams::default()
        };
        job.resources.device = TrainingDevice::Cpu;
        job
    }

    #[tokio::test]
    async fn test_trainer_writes_model_and_manifest() {
        let temp = TempDir::new().unwrap();
        let job = job(&temp);
        let trainer = SequenceClassificationTrainer::new();
        let sink = RecordingProgressSink::default();

        let manifest = trainer.run(&job, &sink).await.unwrap();

        assert_eq!(manifest.metrics.steps, Some(4));
        assert_eq!(manifest.metrics.epochs_completed, Some(2));
        assert!(manifest.metrics.eval_accuracy.is_some());
        assert!(manifest.artifact(&ArtifactKind::Weights).is_some());
        manifest.verify(&job.output_dir).unwrap();

        let layout = TrainingLayout::new(&job.output_dir);
        let checkpoints: Vec<u64> = layout.checkpoints().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(checkpoints, vec![4]);

        let config: DistilBertConfig =
            serde_json::from_slice(&std::fs::read(layout.config_path()).unwrap()).unwrap();
        assert_eq!(config.num_labels(), Some(2));

        let events = sink.events();
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Evaluation { .. })));
        assert_eq!(trainer.status(&job.job_id).await.unwrap(), TrainerStatus::Finished);
    }

    #[tokio::test]
    async fn test_trained_model_reloads_with_head() {
        let temp = TempDir::new().unwrap();
        let job = job(&temp);
        SequenceClassificationTrainer::new().run(&job, &RecordingProgressSink::default()).await.unwrap();

        let files = ModelFiles::from_dir(&job.output_dir).unwrap();
        let config: DistilBertConfig = files.read_config().unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        DistilBertForSequenceClassification::new(&config, 2, vb).unwrap();
        let report = load_pretrained(&varmap, &files.weights, &Device::Cpu).unwrap();
        assert!(report.missing.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_instruction_dataset() {
        let temp = TempDir::new().unwrap();
        let mut job = TrainingJobSpec::smoke();
        job.output_dir = temp.path().join("out");
        let err = SequenceClassificationTrainer::new().prepare(&job).await.unwrap_err();
        assert!(matches!(err, TrainingError::InvalidSpec(_) | TrainingError::Trainer(_)));
    }
}
