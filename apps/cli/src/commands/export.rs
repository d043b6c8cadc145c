//! Export command implementation.

use super::types::ExportCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use sitetune_core::{prepare_web_model, SitetuneConfig};

pub fn execute(command: ExportCommand, config: &SitetuneConfig) -> Result<()> {
    match command {
        ExportCommand::Web { model_dir, web_dir } => {
            let model_dir = model_dir.unwrap_or_else(|| config.model_dir().join("finetuned_distilbert"));
            let web_dir = web_dir.unwrap_or_else(|| config.web_model_dir());

            let export = prepare_web_model(&model_dir, &web_dir)
                .with_context(|| format!("Failed to export {}", model_dir.display()))?;

            println!();
            println!("{}", "Web model ready".bold().green());
            println!("  {}", export.card.title);
            println!("  Task: {}", export.card.task);
            if let Some(labels) = export.card.num_labels {
                println!("  Labels: {}", labels);
            }
            println!("  Files: {}", export.web_dir.display().to_string().cyan());
            if export.manifest.is_none() {
                println!("  {}", "No training manifest found; the model card uses defaults.".yellow());
            }
            println!();
            Ok(())
        }
    }
}
