//! Models command implementation.

use super::types::ModelsCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use sitetune_core::{ModelLoader, SitetuneConfig};

pub fn execute(command: ModelsCommand, config: &SitetuneConfig) -> Result<()> {
    let mut loader = ModelLoader::new(config.model_dir());
    match command {
        ModelsCommand::List { json } => {
            let models = loader.discover().context("Failed to discover trained models")?;
            if json {
                let names: Vec<_> = models.iter().map(|m| &m.name).collect();
                println!("{}", serde_json::to_string_pretty(&names)?);
                return Ok(());
            }

            println!();
            println!("{}", format!("Models in {} ({})", loader.model_dir().display(), models.len()).bold().cyan());
            if models.is_empty() {
                println!("  {}", "No trained models found.".dimmed());
            }
            for m in &models {
                println!("  {} {}", m.name.cyan(), format!("({})", m.manifest.base_model.model_id).dimmed());
            }
            println!();
            Ok(())
        }
        ModelsCommand::Load { name, model_type } => {
            let model = loader
                .load_model(&name, &model_type)
                .with_context(|| format!("Failed to load model {}", name))?;
            let vocab = loader.get_tokenizer(&name).map(|t| t.get_vocab_size(true));

            println!();
            println!("{}", "Model loaded".bold().green());
            println!("  Name: {}", name.cyan());
            println!("  Kind: {}", model.kind);
            println!("  Path: {}", model.model_dir.display().to_string().dimmed());
            if let Some(labels) = model.num_labels() {
                println!("  Labels: {}", labels);
            }
            if let Some(vocab) = vocab {
                println!("  Tokenizer vocabulary: {}", vocab);
            }
            println!();
            Ok(())
        }
    }
}
