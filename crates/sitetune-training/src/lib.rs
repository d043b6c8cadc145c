//! Sitetune Training
//!
//! Backend-agnostic pieces of the fine-tuning workflow:
//! - Extracting instruction/response records from website content
//! - Loading documents and labeled datasets
//! - Defining training jobs (`TrainingJobSpec`) and their presets
//! - Writing training artifacts + manifests
//! - Implementing training backends (`Trainer`)

pub mod artifacts;
pub mod builders;
pub mod content;
pub mod dataset;
pub mod documents;
pub mod error;
pub mod hub;
pub mod job;
pub mod layout;
pub mod progress;
pub mod registry;
pub mod text;
pub mod trainer;

pub use artifacts::{make_artifact, sha256_file, ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use builders::{build_instruction_dataset, build_labeled_dataset};
pub use content::{load_training_data, save_training_data, ContentItem, ContentProcessor, DEFAULT_TRAINING_DATA_PATH};
pub use dataset::{DatasetId, DatasetSource, InstructionRecord, LabeledExample, LabeledSplits};
pub use documents::{Document, DocumentLoader};
pub use error::{TrainingError, TrainingResult};
pub use job::{
    ModelSpec, SaveStrategy, TrainingDevice, TrainingHyperParams, TrainingJobId, TrainingJobSpec, TrainingObjective,
    TrainingResources,
};
pub use layout::TrainingLayout;
pub use progress::{LogProgressSink, ProgressEvent, ProgressSink, RecordingProgressSink};
pub use registry::{discover_trained_models, TrainedModelEntry};
pub use text::{load_tokenizer, TextProcessor};
pub use trainer::{Trainer, TrainerStatus};
