//! Pipeline command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use sitetune_core::cloud::GcloudTokenProvider;
use sitetune_core::{run_pipeline, SitetuneConfig};
use sitetune_training::LogProgressSink;
use std::sync::Arc;

pub async fn execute(config: &SitetuneConfig) -> Result<()> {
    let outcome = run_pipeline(config, Arc::new(GcloudTokenProvider::from_env()), &LogProgressSink)
        .await
        .context("Training pipeline failed")?;

    println!();
    println!("{}", "Training pipeline complete".bold().green());
    println!(
        "  Processed {} content items into {} training examples",
        outcome.content_items, outcome.training_examples
    );
    println!("  Training data: {}", outcome.training.data_uri.cyan());
    println!("  Uploaded {} model files", outcome.training.model_uris.len());
    println!();
    Ok(())
}
