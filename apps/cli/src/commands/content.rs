//! Content command implementation.

use super::types::ContentCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use sitetune_core::SitetuneConfig;
use sitetune_training::ContentProcessor;

pub fn execute(command: ContentCommand, config: &SitetuneConfig) -> Result<()> {
    match command {
        ContentCommand::Build { content_dir, output, json } => {
            let content_dir = content_dir.unwrap_or_else(|| config.content_dir());
            let output = output.unwrap_or_else(|| config.training_data_path());

            let processor = ContentProcessor::new(&content_dir);
            let (items, records) = processor
                .run(&output)
                .with_context(|| format!("Failed to build training data from {}", content_dir.display()))?;

            if json {
                let out = json!({ "content_items": items, "training_examples": records, "output": output });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }

            println!();
            println!("{}", "Training data ready".bold().green());
            println!("  Processed {} content items into {} training examples", items, records);
            println!("  Wrote: {}", output.display().to_string().dimmed());
            println!();
            Ok(())
        }
    }
}
