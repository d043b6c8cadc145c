//! Sitetune Core - candle backends and cloud integration.
//!
//! This crate provides:
//! - DistilBERT and Phi models written against `candle`
//! - Fine-tuning trainers implementing `sitetune_training::Trainer`
//! - Loading trained models and exporting them for static hosting
//! - Cloud Storage / Vertex AI clients and the end-to-end pipeline
//!
//! # Example
//!
//! ```rust,no_run
//! use sitetune_core::training::CausalLmTrainer;
//! use sitetune_training::{LogProgressSink, Trainer, TrainingJobSpec};
//!
//! #[tokio::main]
//! async fn main() -> sitetune_training::TrainingResult<()> {
//!     let manifest = CausalLmTrainer::new().run(&TrainingJobSpec::smoke(), &LogProgressSink).await?;
//!     println!("{:?}", manifest.metrics);
//!     Ok(())
//! }
//! ```

pub mod cloud;
pub mod config;
pub mod error;
pub mod export;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod training;

pub use cloud::{
    verify_setup, CloudTrainParams, GcloudTokenProvider, GcpSettings, GcpTrainer, GcsClient, ObjectStore,
    TokenProvider, VertexClient,
};
pub use config::SitetuneConfig;
pub use error::{CoreError, CoreResult};
pub use export::{prepare_web_model, ModelCard, WebExport};
pub use loader::{LoadedModel, ModelKind, ModelLoader};
pub use pipeline::{run_pipeline, Pipeline, PipelineOutcome};
pub use training::{CausalLmTrainer, SequenceClassificationTrainer};
