//! Text command implementation.

use super::types::TextCommand;
use anyhow::{Context, Result};
use sitetune_training::TextProcessor;

pub fn execute(command: TextCommand) -> Result<()> {
    match command {
        TextCommand::Preprocess { text } => {
            println!("{}", TextProcessor::new().preprocess_text(&text));
            Ok(())
        }
        TextCommand::Tokenize { text, tokenizer } => {
            let processor = match tokenizer {
                Some(name) => {
                    TextProcessor::load(&name).with_context(|| format!("Failed to load tokenizer {}", name))?
                }
                None => TextProcessor::new(),
            };
            let tokens = processor.tokenize(&text).context("Failed to tokenize text")?;
            println!("{}", tokens.join(" "));
            Ok(())
        }
    }
}
