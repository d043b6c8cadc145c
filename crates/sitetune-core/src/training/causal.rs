//! Causal language-model fine-tuning (Phi) on instruction/response records.

use super::batch::{resolve_pad_token, stack, EncodedSequence, SequenceEncoder};
use super::engine::{FineTuneTask, TrainingEngine};
use super::{save_tokenizer, select_device, write_config, write_manifest, JobTracker};
use crate::error::CoreResult;
use crate::models::{load_pretrained, ModelFiles, PhiConfig, PhiForCausalLM};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use sitetune_training::dataset::validate_records;
use sitetune_training::{
    build_instruction_dataset, ProgressEvent, ProgressSink, Trainer, TrainerStatus, TrainingError, TrainingJobId,
    TrainingJobSpec, TrainingLayout, TrainingManifest, TrainingMetrics, TrainingObjective, TrainingResult,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

const EOS_TOKEN: &str = "<|endoftext|>";

/// Mean next-token cross-entropy over positions where `mask` is 1.
///
/// `logits` is `(batch, seq, vocab)`; `targets` and `mask` are `(batch, seq)`.
pub fn masked_lm_loss(logits: &Tensor, targets: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let (batch, seq_len, vocab) = logits.dims3()?;
    let logits = logits.contiguous()?.reshape((batch * seq_len, vocab))?;
    let targets = targets.contiguous()?.flatten_all()?;
    let mask = mask.contiguous()?.flatten_all()?.to_dtype(DType::F32)?;

    let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
    let picked = log_probs.gather(&targets.unsqueeze(1)?, 1)?.squeeze(1)?;
    let count = mask.sum_all()?.to_scalar::<f32>()?.max(1.0);
    (picked * mask)?.sum_all()?.neg()? / f64::from(count)
}

struct CausalLmTask<'a> {
    model: &'a PhiForCausalLM,
    device: Device,
    train: Vec<EncodedSequence>,
}

impl FineTuneTask for CausalLmTask<'_> {
    fn train_len(&self) -> usize {
        self.train.len()
    }

    fn train_loss(&self, indices: &[usize]) -> CoreResult<Tensor> {
        let sequences: Vec<&EncodedSequence> = indices.iter().map(|&i| &self.train[i]).collect();
        let (ids, mask) = stack(&sequences, &self.device)?;
        let seq_len = ids.dim(1)?;

        let logits = self.model.forward(&ids, &mask, true)?;
        let logits = logits.narrow(1, 0, seq_len - 1)?;
        let targets = ids.narrow(1, 1, seq_len - 1)?;
        let target_mask = mask.narrow(1, 1, seq_len - 1)?;
        Ok(masked_lm_loss(&logits, &targets, &target_mask)?)
    }
}

/// Fine-tune a Phi checkpoint on instruction records and save it to `job.output_dir`.
pub fn fine_tune_causal_lm(
    job: &TrainingJobSpec,
    cancel: Arc<AtomicBool>,
    events: UnboundedSender<ProgressEvent>,
) -> CoreResult<TrainingManifest> {
    if job.objective != TrainingObjective::CausalLm {
        return Err(TrainingError::InvalidSpec("expected a causal LM job".to_string()).into());
    }
    let hp = &job.hyperparams;
    let device = select_device(job.resources.device)?;
    let layout = TrainingLayout::new(&job.output_dir);
    layout.ensure_dirs()?;

    let (records, dataset_id) = build_instruction_dataset(&job.dataset)?;
    validate_records(&records)?;
    let prompts: Vec<String> = records.iter().map(|r| r.to_prompt()).collect();

    let files = ModelFiles::resolve(&job.base_model.model_id)?;
    let config: PhiConfig = files.read_config()?;
    let tokenizer = files.load_tokenizer()?;
    // Padding reuses the end-of-text token; padded positions are masked out of the loss.
    let (pad_id, pad_token) = resolve_pad_token(&tokenizer, &[EOS_TOKEN], config.eos_token_id)?;
    let encoder = SequenceEncoder::new(tokenizer.clone(), hp.max_seq_len, pad_id, pad_token)?;
    let train = encoder.encode(&prompts)?;
    let too_short = train.iter().filter(|s| s.real_len() < 2).count();
    if too_short > 0 {
        warn!(count = too_short, "examples shorter than two tokens contribute no loss");
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = PhiForCausalLM::new(&config, vb)?;
    load_pretrained(&varmap, &files.weights, &device)?;

    let mut engine = TrainingEngine::new(job.job_id.clone(), hp.clone(), layout.clone(), varmap.clone(), cancel, events);
    engine.message(format!("training on {} instruction examples", train.len()));
    let task = CausalLmTask { model: &model, device, train };
    let outcome = engine.train(&task)?;

    info!(path = %layout.root().display(), "saving fine-tuned language model");
    varmap.save(layout.weights_path())?;
    write_config(&layout, &config)?;
    save_tokenizer(&layout, &tokenizer)?;
    engine.write_trainer_state(&layout.trainer_state_path())?;

    let metrics = TrainingMetrics {
        train_loss: Some(outcome.train_loss),
        steps: Some(outcome.steps),
        epochs_completed: Some(outcome.epochs_completed),
        ..TrainingMetrics::default()
    };
    write_manifest(job, &layout, dataset_id, metrics)
}

/// Local candle trainer for `CausalLm` jobs, including the smoke preset.
#[derive(Clone, Default)]
pub struct CausalLmTrainer {
    tracker: JobTracker,
}

impl CausalLmTrainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Trainer for CausalLmTrainer {
    fn id(&self) -> &'static str {
        "candle-causal-lm"
    }

    fn supports(&self, objective: &TrainingObjective) -> bool {
        *objective == TrainingObjective::CausalLm
    }

    async fn run(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingManifest> {
        self.prepare(job).await?;
        self.tracker.run(job, progress, |job, cancel, events| fine_tune_causal_lm(&job, cancel, events)).await
    }

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus> {
        Ok(self.tracker.status(job_id))
    }

    async fn cancel(&self, job_id: &TrainingJobId) -> TrainingResult<()> {
        self.tracker.cancel(job_id);
        Ok(())
    }
}
