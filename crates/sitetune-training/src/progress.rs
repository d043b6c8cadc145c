use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    Message { job_id: TrainingJobId, message: String },
    Step { job_id: TrainingJobId, step: u64, total: Option<u64>, loss: f64, learning_rate: f64 },
    Checkpoint { job_id: TrainingJobId, step: u64, path: String },
    Evaluation { job_id: TrainingJobId, loss: f64, accuracy: Option<f64> },
    Finished { job_id: TrainingJobId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress events to `tracing`.
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => info!("[train:{job_id}] started"),
            ProgressEvent::Message { job_id, message } => info!("[train:{job_id}] {message}"),
            ProgressEvent::Step { job_id, step, total, loss, learning_rate } => {
                if let Some(total) = total {
                    info!("[train:{job_id}] step {step}/{total} loss={loss:.4} lr={learning_rate:.3e}");
                } else {
                    info!("[train:{job_id}] step {step} loss={loss:.4} lr={learning_rate:.3e}");
                }
            }
            ProgressEvent::Checkpoint { job_id, step, path } => {
                info!("[train:{job_id}] checkpoint at step {step}: {path}");
            }
            ProgressEvent::Evaluation { job_id, loss, accuracy } => match accuracy {
                Some(acc) => info!("[train:{job_id}] eval loss={loss:.4} accuracy={acc:.4}"),
                None => info!("[train:{job_id}] eval loss={loss:.4}"),
            },
            ProgressEvent::Finished { job_id } => info!("[train:{job_id}] finished"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
