//! The optimization loop shared by every fine-tuning backend.

use super::schedule::LinearSchedule;
use crate::error::{CoreError, CoreResult};
use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};
use sitetune_training::layout::{TRAINER_STATE_FILE, WEIGHTS_FILE};
use sitetune_training::{ProgressEvent, SaveStrategy, TrainingError, TrainingHyperParams, TrainingJobId, TrainingLayout};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// A model plus its encoded data, seen by the engine only through losses.
pub(crate) trait FineTuneTask {
    fn train_len(&self) -> usize;

    fn eval_len(&self) -> usize {
        0
    }

    /// Mean loss over the training examples at `indices`, in training mode.
    fn train_loss(&self, indices: &[usize]) -> CoreResult<Tensor>;

    fn eval_batch(&self, _indices: &[usize]) -> CoreResult<EvalBatch> {
        Ok(EvalBatch::default())
    }
}

/// Evaluation totals for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct EvalBatch {
    pub loss_sum: f64,
    pub count: usize,
    pub correct: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TrainOutcome {
    pub train_loss: f64,
    pub steps: u64,
    pub epochs_completed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct EvalOutcome {
    pub loss: f64,
    pub accuracy: Option<f64>,
}

pub(crate) struct TrainingEngine {
    job_id: TrainingJobId,
    hp: TrainingHyperParams,
    layout: TrainingLayout,
    varmap: VarMap,
    cancel: Arc<AtomicBool>,
    events: UnboundedSender<ProgressEvent>,
    global_step: u64,
    total_steps: u64,
    log_history: Vec<Value>,
}

impl TrainingEngine {
    pub fn new(
        job_id: TrainingJobId,
        hp: TrainingHyperParams,
        layout: TrainingLayout,
        varmap: VarMap,
        cancel: Arc<AtomicBool>,
        events: UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self { job_id, hp, layout, varmap, cancel, events, global_step: 0, total_steps: 0, log_history: Vec::new() }
    }

    fn emit(&self, event: ProgressEvent) {
        // The receiver only goes away when the caller stopped listening.
        let _ = self.events.send(event);
    }

    pub fn message(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Message { job_id: self.job_id.clone(), message: message.into() });
    }

    fn check_cancelled(&self) -> CoreResult<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(TrainingError::Cancelled(self.job_id.to_string()).into());
        }
        Ok(())
    }

    /// Optimizer updates in one pass over `examples` training examples.
    pub fn steps_per_epoch(&self, examples: usize) -> u64 {
        let micro_batches = examples.div_ceil(self.hp.train_batch_size);
        micro_batches.div_ceil(self.hp.gradient_accumulation_steps) as u64
    }

    pub fn total_steps(&self, examples: usize) -> u64 {
        self.hp.max_steps.unwrap_or_else(|| self.steps_per_epoch(examples) * u64::from(self.hp.epochs))
    }

    pub fn train(&mut self, task: &dyn FineTuneTask) -> CoreResult<TrainOutcome> {
        let examples = task.train_len();
        if examples == 0 {
            return Err(TrainingError::Dataset("training split is empty".to_string()).into());
        }

        let total = self.total_steps(examples);
        self.total_steps = total;
        let schedule = LinearSchedule::new(self.hp.learning_rate, self.hp.warmup_steps, total);
        let vars = self.varmap.all_vars();
        let mut optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: schedule.lr_at(0),
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8,
                weight_decay: self.hp.weight_decay,
            },
        )?;

        info!(
            examples,
            total_steps = total,
            batch_size = self.hp.train_batch_size,
            accumulation = self.hp.gradient_accumulation_steps,
            "starting training"
        );

        let accum = self.hp.gradient_accumulation_steps;
        let mut rng = StdRng::seed_from_u64(self.hp.seed);
        let mut order: Vec<usize> = (0..examples).collect();
        let mut loss_total = 0.0;
        let mut window_loss = 0.0;
        let mut window_steps = 0u64;
        let mut epochs_completed = 0u32;

        'epochs: while self.global_step < total {
            order.shuffle(&mut rng);
            let micro_batches: Vec<&[usize]> = order.chunks(self.hp.train_batch_size).collect();

            let mut accumulated: Option<GradStore> = None;
            let mut step_loss = 0.0;
            let mut micro = 0usize;
            for (i, indices) in micro_batches.iter().enumerate() {
                let loss = task.train_loss(indices)?;
                step_loss += f64::from(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?);
                let grads = (loss / accum as f64)?.backward()?;
                accumulated = Some(accumulate(accumulated, grads, &vars)?);
                micro += 1;
                if micro < accum && i + 1 < micro_batches.len() {
                    continue;
                }

                let Some(mut grads) = accumulated.take() else {
                    continue;
                };
                if let Some(max_norm) = self.hp.max_grad_norm {
                    clip_grad_norm(&mut grads, &vars, max_norm)?;
                }
                let lr = schedule.lr_at(self.global_step);
                optimizer.set_learning_rate(lr);
                optimizer.step(&grads)?;
                self.global_step += 1;

                let mean_loss = step_loss / micro as f64;
                step_loss = 0.0;
                micro = 0;
                loss_total += mean_loss;
                window_loss += mean_loss;
                window_steps += 1;

                if self.global_step % self.hp.logging_steps == 0 || self.global_step == total {
                    let loss = window_loss / window_steps as f64;
                    window_loss = 0.0;
                    window_steps = 0;
                    self.log_history.push(json!({
                        "step": self.global_step,
                        "epoch": epochs_completed + 1,
                        "loss": loss,
                        "learning_rate": lr,
                    }));
                    self.emit(ProgressEvent::Step {
                        job_id: self.job_id.clone(),
                        step: self.global_step,
                        total: Some(total),
                        loss,
                        learning_rate: lr,
                    });
                }

                if let SaveStrategy::Steps(every) = self.hp.save {
                    if self.global_step % every == 0 {
                        self.checkpoint()?;
                    }
                }

                self.check_cancelled()?;
                if self.global_step >= total {
                    if i + 1 == micro_batches.len() {
                        epochs_completed += 1;
                    }
                    break 'epochs;
                }
            }

            epochs_completed += 1;
            debug!(epoch = epochs_completed, step = self.global_step, "epoch finished");
            if self.hp.save == SaveStrategy::Epoch {
                self.checkpoint()?;
            }
        }

        if self.hp.save == SaveStrategy::Epoch && self.layout.checkpoints()?.iter().all(|(s, _)| *s != self.global_step) {
            self.checkpoint()?;
        }

        let train_loss = loss_total / self.global_step.max(1) as f64;
        info!(train_loss, steps = self.global_step, "training finished");
        Ok(TrainOutcome { train_loss, steps: self.global_step, epochs_completed })
    }

    pub fn evaluate(&mut self, task: &dyn FineTuneTask) -> CoreResult<Option<EvalOutcome>> {
        let examples = task.eval_len();
        if examples == 0 {
            return Ok(None);
        }

        let indices: Vec<usize> = (0..examples).collect();
        let mut totals = EvalBatch::default();
        for chunk in indices.chunks(self.hp.eval_batch_size) {
            let batch = task.eval_batch(chunk)?;
            totals.loss_sum += batch.loss_sum;
            totals.count += batch.count;
            if let Some(correct) = batch.correct {
                totals.correct = Some(totals.correct.unwrap_or(0) + correct);
            }
        }

        let count = totals.count.max(1) as f64;
        let outcome = EvalOutcome {
            loss: totals.loss_sum / count,
            accuracy: totals.correct.map(|c| c as f64 / count),
        };
        self.log_history.push(json!({
            "step": self.global_step,
            "eval_loss": outcome.loss,
            "eval_accuracy": outcome.accuracy,
        }));
        self.emit(ProgressEvent::Evaluation { job_id: self.job_id.clone(), loss: outcome.loss, accuracy: outcome.accuracy });
        Ok(Some(outcome))
    }

    pub fn trainer_state(&self) -> Value {
        json!({
            "global_step": self.global_step,
            "max_steps": self.total_steps,
            "num_train_epochs": self.hp.epochs,
            "logging_steps": self.hp.logging_steps,
            "train_batch_size": self.hp.train_batch_size,
            "log_history": self.log_history,
        })
    }

    pub fn write_trainer_state(&self, path: &Path) -> CoreResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(&self.trainer_state())?)?;
        Ok(())
    }

    /// Save `checkpoint-{step}` and drop the oldest ones beyond the limit.
    fn checkpoint(&self) -> CoreResult<()> {
        let dir = self.layout.checkpoint_dir(self.global_step);
        std::fs::create_dir_all(&dir)?;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        self.write_trainer_state(&dir.join(TRAINER_STATE_FILE))?;
        self.emit(ProgressEvent::Checkpoint {
            job_id: self.job_id.clone(),
            step: self.global_step,
            path: dir.display().to_string(),
        });

        if let Some(limit) = self.hp.save_total_limit {
            self.layout.rotate_checkpoints(limit)?;
        }
        Ok(())
    }
}

/// Sum `grads` into `acc` for every trainable variable.
pub(crate) fn accumulate(acc: Option<GradStore>, grads: GradStore, vars: &[Var]) -> CoreResult<GradStore> {
    let Some(mut acc) = acc else {
        return Ok(grads);
    };
    for var in vars {
        let Some(grad) = grads.get(var.as_tensor()) else {
            continue;
        };
        let merged = match acc.remove(var.as_tensor()) {
            Some(prev) => (prev + grad)?,
            None => grad.clone(),
        };
        acc.insert(var.as_tensor(), merged);
    }
    Ok(acc)
}

/// Scale gradients so their global L2 norm is at most `max_norm`. Returns the norm before clipping.
pub(crate) fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> CoreResult<f64> {
    let mut squared = 0.0;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            squared += f64::from(grad.sqr()?.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?);
        }
    }
    let norm = squared.sqrt();
    if !norm.is_finite() {
        return Err(CoreError::Model(format!("gradient norm is {norm}")));
    }

    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), (grad * scale)?);
            }
        }
    }
    Ok(norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::{Init, VarBuilder};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Fits a single weight to the targets with squared error.
    struct FitTask {
        weight: Tensor,
        targets: Vec<f32>,
    }

    impl FitTask {
        fn new(varmap: &VarMap, targets: Vec<f32>) -> Self {
            let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
            let weight = vb.get_with_hints(1, "w", Init::Const(0.0)).unwrap();
            Self { weight, targets }
        }

        fn weight(&self) -> f32 {
            self.weight.to_vec1::<f32>().unwrap()[0]
        }
    }

    impl FineTuneTask for FitTask {
        fn train_len(&self) -> usize {
            self.targets.len()
        }

        fn eval_len(&self) -> usize {
            self.targets.len()
        }

        fn train_loss(&self, indices: &[usize]) -> CoreResult<Tensor> {
            let targets: Vec<f32> = indices.iter().map(|&i| self.targets[i]).collect();
            let targets = Tensor::from_vec(targets, indices.len(), &Device::Cpu)?;
            Ok(self.weight.broadcast_sub(&targets)?.sqr()?.mean_all()?)
        }

        fn eval_batch(&self, indices: &[usize]) -> CoreResult<EvalBatch> {
            let loss = self.train_loss(indices)?.to_scalar::<f32>()?;
            Ok(EvalBatch { loss_sum: f64::from(loss) * indices.len() as f64, count: indices.len(), correct: Some(0) })
        }
    }

    fn hyperparams() -> TrainingHyperParams {
        TrainingHyperParams {
            epochs: 20,
            learning_rate: 0.1,
            train_batch_size: 2,
            eval_batch_size: 3,
            gradient_accumulation_steps: 2,
            weight_decay: 0.0,
            max_grad_norm: None,
            logging_steps: 5,
            save: SaveStrategy::Steps(10),
            save_total_limit: Some(2),
            ..TrainingHyperParams::default()
        }
    }

    fn engine(hp: TrainingHyperParams, root: &Path, varmap: &VarMap) -> (TrainingEngine, mpsc::UnboundedReceiver<ProgressEvent>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let engine = TrainingEngine::new(
            TrainingJobId("job".to_string()),
            hp,
            TrainingLayout::new(root),
            varmap.clone(),
            cancel.clone(),
            tx,
        );
        (engine, rx, cancel)
    }

    #[test]
    fn test_step_counts() {
        let temp = TempDir::new().unwrap();
        let varmap = VarMap::new();
        let (engine, _rx, _) = engine(hyperparams(), temp.path(), &varmap);
        // 5 examples -> 3 micro-batches -> 2 updates per epoch.
        assert_eq!(engine.steps_per_epoch(5), 2);
        assert_eq!(engine.total_steps(5), 40);

        let (capped, _rx, _) = engine_with_max_steps(temp.path(), &varmap);
        assert_eq!(capped.total_steps(5), 7);
    }

    fn engine_with_max_steps(root: &Path, varmap: &VarMap) -> (TrainingEngine, mpsc::UnboundedReceiver<ProgressEvent>, Arc<AtomicBool>) {
        engine(TrainingHyperParams { max_steps: Some(7), ..hyperparams() }, root, varmap)
    }

    #[test]
    fn test_train_converges_and_rotates_checkpoints() {
        let temp = TempDir::new().unwrap();
        let varmap = VarMap::new();
        let task = FitTask::new(&varmap, vec![3.0, 3.0, 3.0, 3.0]);
        let (mut engine, mut rx, _) = engine(hyperparams(), temp.path(), &varmap);

        let outcome = engine.train(&task).unwrap();
        assert_eq!(outcome.steps, 20);
        assert_eq!(outcome.epochs_completed, 20);
        assert!(task.weight() > 0.5 && task.weight() < 3.0, "weight = {}", task.weight());

        let steps: Vec<u64> = engine.layout.checkpoints().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![10, 20]);
        assert!(engine.layout.checkpoint_dir(20).join(WEIGHTS_FILE).exists());

        let eval = engine.evaluate(&task).unwrap().unwrap();
        assert_eq!(eval.accuracy, Some(0.0));

        let mut logged_steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Step { step, .. } = event {
                logged_steps.push(step);
            }
        }
        assert_eq!(logged_steps, vec![5, 10, 15, 20]);

        let state = engine.trainer_state();
        assert_eq!(state["global_step"], 20);
        assert_eq!(state["log_history"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_max_steps_stops_early() {
        let temp = TempDir::new().unwrap();
        let varmap = VarMap::new();
        let task = FitTask::new(&varmap, vec![1.0; 5]);
        let (mut engine, _rx, _) = engine_with_max_steps(temp.path(), &varmap);
        let outcome = engine.train(&task).unwrap();
        assert_eq!(outcome.steps, 7);
        assert_eq!(outcome.epochs_completed, 3);
    }

    #[test]
    fn test_cancel_stops_after_next_step() {
        let temp = TempDir::new().unwrap();
        let varmap = VarMap::new();
        let task = FitTask::new(&varmap, vec![1.0; 4]);
        let (mut engine, _rx, cancel) = engine(hyperparams(), temp.path(), &varmap);
        cancel.store(true, Ordering::SeqCst);

        let err = engine.train(&task).unwrap_err();
        assert!(matches!(err, CoreError::Training(TrainingError::Cancelled(_))));
        assert_eq!(engine.global_step, 1);
    }

    #[test]
    fn test_clip_grad_norm_scales_to_max() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(2, "w", Init::Const(0.0)).unwrap();
        let target = Tensor::new(&[3f32, 4.], &Device::Cpu).unwrap();
        // d/dw sum((w - t)^2) / 2 at w = 0 is -t, norm 5.
        let loss = (w.broadcast_sub(&target).unwrap().sqr().unwrap().sum_all().unwrap() * 0.5).unwrap();
        let mut grads = loss.backward().unwrap();
        let vars = varmap.all_vars();

        let norm = clip_grad_norm(&mut grads, &vars, 1.0).unwrap();
        assert!((norm - 5.0).abs() < 1e-4);
        let clipped = grads.get(vars[0].as_tensor()).unwrap().to_vec1::<f32>().unwrap();
        let clipped_norm = clipped.iter().map(|g| g * g).sum::<f32>().sqrt();
        assert!((clipped_norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_accumulate_sums_gradients() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(1, "w", Init::Const(1.0)).unwrap();
        let vars = varmap.all_vars();

        let first = (w.clone() * 2.0).unwrap().sum_all().unwrap().backward().unwrap();
        let second = (w.clone() * 3.0).unwrap().sum_all().unwrap().backward().unwrap();
        let merged = accumulate(Some(first), second, &vars).unwrap();
        assert_eq!(merged.get(vars[0].as_tensor()).unwrap().to_vec1::<f32>().unwrap(), vec![5.0]);
    }
}
