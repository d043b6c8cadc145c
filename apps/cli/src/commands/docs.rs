//! Docs command implementation.

use super::types::DocsCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use sitetune_training::DocumentLoader;

pub fn execute(command: DocsCommand) -> Result<()> {
    match command {
        DocsCommand::Load { paths, output } => {
            let loader = DocumentLoader::default();
            let documents = loader.load_documents(&paths);

            if let Some(output) = output {
                let values = documents.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?;
                loader
                    .save_embeddings(&values, &output)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
            }

            println!();
            println!("{}", format!("Documents ({}/{})", documents.len(), paths.len()).bold().cyan());
            println!();
            for doc in &documents {
                let kind = if doc.kind.is_empty() { "-" } else { doc.kind.as_str() };
                println!(
                    "  {:<48} {:<6} {}",
                    doc.path.display().to_string(),
                    kind.cyan(),
                    format!("{} chars", doc.content.chars().count()).dimmed()
                );
            }
            println!();
            Ok(())
        }
    }
}
