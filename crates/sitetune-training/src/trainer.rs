//! Backend seam for running a `TrainingJobSpec` to a manifest.

use crate::artifacts::TrainingManifest;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{TrainingJobId, TrainingJobSpec, TrainingObjective};
use crate::layout::TrainingLayout;
use crate::progress::ProgressSink;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Idle,
    Preparing,
    Running,
    Finished,
    Failed(String),
    Cancelled,
}

#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Whether this backend can fit a model for `objective`.
    fn supports(&self, objective: &TrainingObjective) -> bool;

    /// Validate the job and create its output layout.
    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()> {
        job.validate()?;
        if !self.supports(&job.objective) {
            return Err(TrainingError::Trainer(format!(
                "{} does not support {:?} jobs",
                self.id(),
                job.objective
            )));
        }
        TrainingLayout::new(&job.output_dir).ensure_dirs()
    }

    async fn run(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingManifest>;

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus>;

    /// Request cancellation; observed between optimizer steps.
    async fn cancel(&self, job_id: &TrainingJobId) -> TrainingResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetSource, InstructionRecord};
    use crate::job::ModelSpec;
    use tempfile::TempDir;

    struct CausalOnly;

    #[async_trait]
    impl Trainer for CausalOnly {
        fn id(&self) -> &'static str {
            "causal-only"
        }

        fn supports(&self, objective: &TrainingObjective) -> bool {
            *objective == TrainingObjective::CausalLm
        }

        async fn run(&self, _job: &TrainingJobSpec, _progress: &dyn ProgressSink) -> TrainingResult<TrainingManifest> {
            Err(TrainingError::Trainer("not used".to_string()))
        }

        async fn status(&self, _job_id: &TrainingJobId) -> TrainingResult<TrainerStatus> {
            Ok(TrainerStatus::Idle)
        }

        async fn cancel(&self, _job_id: &TrainingJobId) -> TrainingResult<()> {
            Ok(())
        }
    }

    fn job(temp: &TempDir, objective: TrainingObjective) -> TrainingJobSpec {
        let dataset = match objective {
            TrainingObjective::CausalLm => DatasetSource::InstructionInline {
                records: vec![InstructionRecord::new("Write content about a", "b")],
            },
            TrainingObjective::SequenceClassification { .. } => {
                DatasetSource::LabeledJsonl { train: temp.path().join("train.jsonl"), eval: None }
            }
        };
        TrainingJobSpec::new(ModelSpec::candle("base"), objective, dataset, temp.path().join("out"))
    }

    #[tokio::test]
    async fn test_prepare_creates_layout_for_supported_objective() {
        let temp = TempDir::new().unwrap();
        let job = job(&temp, TrainingObjective::CausalLm);
        CausalOnly.prepare(&job).await.unwrap();
        assert!(job.output_dir.exists());
    }

    #[tokio::test]
    async fn test_prepare_rejects_other_objective() {
        let temp = TempDir::new().unwrap();
        let job = job(&temp, TrainingObjective::SequenceClassification { num_labels: 2 });
        let err = CausalOnly.prepare(&job).await.unwrap_err();
        assert!(err.to_string().contains("causal-only does not support"));
        assert!(!job.output_dir.exists());
    }
}
