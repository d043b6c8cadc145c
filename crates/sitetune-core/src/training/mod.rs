//! Candle fine-tuning backends.

pub mod batch;
pub mod causal;
pub mod classification;
pub(crate) mod engine;
pub mod schedule;

pub use causal::{fine_tune_causal_lm, CausalLmTrainer};
pub use classification::{fine_tune_classifier, SequenceClassificationTrainer};
pub use schedule::LinearSchedule;

use crate::error::{CoreError, CoreResult};
use candle_core::Device;
use sitetune_training::layout::{MODEL_CARD_FILE, TRAINER_STATE_FILE, TOKENIZER_FILE, WEIGHTS_FILE, CONFIG_FILE};
use sitetune_training::{
    make_artifact, ArtifactKind, DatasetId, ProgressEvent, ProgressSink, TrainerStatus, TrainingDevice, TrainingError,
    TrainingJobId, TrainingJobSpec, TrainingLayout, TrainingManifest, TrainingMetrics, TrainingResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};

/// Pick the compute device for a job.
pub fn select_device(device: TrainingDevice) -> CoreResult<Device> {
    let selected = match device {
        TrainingDevice::Cpu => Device::Cpu,
        TrainingDevice::Cuda => Device::new_cuda(0)?,
        TrainingDevice::Metal => Device::new_metal(0)?,
        TrainingDevice::Auto => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0)?
            } else if candle_core::utils::metal_is_available() {
                Device::new_metal(0)?
            } else {
                Device::Cpu
            }
        }
    };
    info!(device = ?selected, "selected training device");
    Ok(selected)
}

struct JobState {
    status: TrainerStatus,
    cancel: Arc<AtomicBool>,
}

/// Status and cancellation flags of the jobs a trainer has seen.
#[derive(Clone, Default)]
pub(crate) struct JobTracker {
    jobs: Arc<Mutex<HashMap<TrainingJobId, JobState>>>,
}

impl JobTracker {
    /// Register `job_id` as preparing. A cancellation recorded before the start wins.
    fn start(&self, job_id: &TrainingJobId) -> TrainingResult<Arc<AtomicBool>> {
        let Ok(mut jobs) = self.jobs.lock() else {
            return Ok(Arc::new(AtomicBool::new(false)));
        };
        let job = jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobState { status: TrainerStatus::Preparing, cancel: Arc::new(AtomicBool::new(false)) });
        if job.cancel.load(Ordering::SeqCst) {
            job.status = TrainerStatus::Cancelled;
            return Err(TrainingError::Cancelled(job_id.to_string()));
        }
        job.status = TrainerStatus::Preparing;
        Ok(job.cancel.clone())
    }

    fn set_status(&self, job_id: &TrainingJobId, status: TrainerStatus) {
        if let Ok(mut jobs) = self.jobs.lock() {
            if let Some(job) = jobs.get_mut(job_id) {
                job.status = status;
            }
        }
    }

    pub(crate) fn status(&self, job_id: &TrainingJobId) -> TrainerStatus {
        self.jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.get(job_id).map(|j| j.status.clone()))
            .unwrap_or(TrainerStatus::Idle)
    }

    pub(crate) fn cancel(&self, job_id: &TrainingJobId) {
        if let Ok(mut jobs) = self.jobs.lock() {
            match jobs.get_mut(job_id) {
                Some(job) => job.cancel.store(true, Ordering::SeqCst),
                None => {
                    jobs.insert(
                        job_id.clone(),
                        JobState { status: TrainerStatus::Cancelled, cancel: Arc::new(AtomicBool::new(true)) },
                    );
                }
            }
        }
    }

    /// Run `work` on a blocking thread, forwarding its progress events to `progress`.
    pub(crate) async fn run<F>(
        &self,
        job: &TrainingJobSpec,
        progress: &dyn ProgressSink,
        work: F,
    ) -> TrainingResult<TrainingManifest>
    where
        F: FnOnce(TrainingJobSpec, Arc<AtomicBool>, UnboundedSender<ProgressEvent>) -> CoreResult<TrainingManifest>
            + Send
            + 'static,
    {
        let job_id = job.job_id.clone();
        let cancel = match self.start(&job_id) {
            Ok(cancel) => cancel,
            Err(e) => {
                warn!(job_id = %job_id, "training cancelled before it started");
                return Err(e);
            }
        };
        progress.on_event(ProgressEvent::Started { job_id: job_id.clone() });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let owned = job.clone();
        let handle = tokio::task::spawn_blocking(move || work(owned, cancel, tx));
        self.set_status(&job_id, TrainerStatus::Running);

        while let Some(event) = rx.recv().await {
            progress.on_event(event);
        }

        let result = match handle.await {
            Ok(result) => result.map_err(TrainingError::from),
            Err(e) => Err(TrainingError::Trainer(format!("training task failed: {e}"))),
        };

        match &result {
            Ok(_) => {
                self.set_status(&job_id, TrainerStatus::Finished);
                progress.on_event(ProgressEvent::Finished { job_id });
            }
            Err(TrainingError::Cancelled(_)) => {
                warn!(job_id = %job_id, "training cancelled");
                self.set_status(&job_id, TrainerStatus::Cancelled);
            }
            Err(e) => self.set_status(&job_id, TrainerStatus::Failed(e.to_string())),
        }
        result
    }
}

/// Hash the saved model files and write `training_manifest.json`.
pub(crate) fn write_manifest(
    job: &TrainingJobSpec,
    layout: &TrainingLayout,
    dataset_id: DatasetId,
    metrics: TrainingMetrics,
) -> CoreResult<TrainingManifest> {
    let root = layout.root();
    let mut artifacts = vec![
        make_artifact(ArtifactKind::Weights, root, WEIGHTS_FILE)?,
        make_artifact(ArtifactKind::Config, root, CONFIG_FILE)?,
        make_artifact(ArtifactKind::Tokenizer, root, TOKENIZER_FILE)?,
    ];
    if root.join(TRAINER_STATE_FILE).exists() {
        artifacts.push(make_artifact(ArtifactKind::TrainerState, root, TRAINER_STATE_FILE)?);
    }
    if root.join(MODEL_CARD_FILE).exists() {
        artifacts.push(make_artifact(ArtifactKind::ModelCard, root, MODEL_CARD_FILE)?);
    }

    let manifest = TrainingManifest {
        job_id: job.job_id.clone(),
        created_at: chrono::Utc::now(),
        objective: job.objective.clone(),
        base_model: job.base_model.clone(),
        dataset_id,
        hyperparams: job.hyperparams.clone(),
        metrics,
        artifacts,
    };
    manifest.write(root)?;
    info!(path = %layout.manifest_path().display(), "wrote training manifest");
    Ok(manifest)
}

/// Write any serializable config as pretty JSON.
pub(crate) fn write_config<T: serde::Serialize>(layout: &TrainingLayout, config: &T) -> CoreResult<()> {
    std::fs::write(layout.config_path(), serde_json::to_string_pretty(config)?)?;
    Ok(())
}

pub(crate) fn save_tokenizer(layout: &TrainingLayout, tokenizer: &tokenizers::Tokenizer) -> CoreResult<()> {
    tokenizer.save(layout.tokenizer_path(), true).map_err(CoreError::tokenizer)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_device_selection() {
        assert!(select_device(TrainingDevice::Cpu).unwrap().is_cpu());
    }

    #[test]
    fn test_tracker_cancel_and_status() {
        let tracker = JobTracker::default();
        let id = TrainingJobId("a".to_string());
        assert_eq!(tracker.status(&id), TrainerStatus::Idle);

        let flag = tracker.start(&id).unwrap();
        assert_eq!(tracker.status(&id), TrainerStatus::Preparing);
        tracker.cancel(&id);
        assert!(flag.load(Ordering::SeqCst));

        let unknown = TrainingJobId("b".to_string());
        tracker.cancel(&unknown);
        assert_eq!(tracker.status(&unknown), TrainerStatus::Cancelled);
    }

    #[test]
    fn test_start_after_cancel_is_refused() {
        let tracker = JobTracker::default();
        let id = TrainingJobId("early".to_string());
        tracker.cancel(&id);

        assert!(matches!(tracker.start(&id), Err(TrainingError::Cancelled(ref job)) if job == "early"));
        assert_eq!(tracker.status(&id), TrainerStatus::Cancelled);
    }

    #[test]
    fn test_restart_keeps_the_same_flag() {
        let tracker = JobTracker::default();
        let id = TrainingJobId("again".to_string());
        let first = tracker.start(&id).unwrap();
        let second = tracker.start(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
