//! Command implementations for the Sitetune CLI.

pub mod cloud;
pub mod content;
pub mod docs;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod text;
pub mod train;
pub mod types;

use anyhow::{bail, Result};
use sitetune_training::TrainingDevice;

/// Parse a `--device` flag, falling back to `default`.
pub fn parse_device(value: Option<&str>, default: TrainingDevice) -> Result<TrainingDevice> {
    Ok(match value.map(str::to_ascii_lowercase).as_deref() {
        None => default,
        Some("auto") => TrainingDevice::Auto,
        Some("cpu") => TrainingDevice::Cpu,
        Some("cuda") => TrainingDevice::Cuda,
        Some("metal") => TrainingDevice::Metal,
        Some(other) => bail!("Unknown device: {}. Supported: auto, cpu, cuda, metal", other),
    })
}
