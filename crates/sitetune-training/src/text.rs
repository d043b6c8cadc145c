//! Text preprocessing and tokenization.

use crate::error::{TrainingError, TrainingResult};
use crate::hub;
use std::path::Path;
use tokenizers::Tokenizer;

/// Load a tokenizer from a local `tokenizer.json`, a model directory that
/// contains one, or a Hub model id.
pub fn load_tokenizer(name_or_path: &str) -> TrainingResult<Tokenizer> {
    let path = Path::new(name_or_path);
    let file = if path.is_file() {
        path.to_path_buf()
    } else if path.join("tokenizer.json").is_file() {
        path.join("tokenizer.json")
    } else {
        hub::fetch_model_file(name_or_path, "tokenizer.json")?
    };

    Tokenizer::from_file(&file)
        .map_err(|e| TrainingError::Tokenizer(format!("failed to load {}: {e}", file.display())))
}

#[derive(Default)]
pub struct TextProcessor {
    tokenizer: Option<Tokenizer>,
}

impl TextProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tokenizer(tokenizer: Tokenizer) -> Self {
        Self { tokenizer: Some(tokenizer) }
    }

    pub fn load(name_or_path: &str) -> TrainingResult<Self> {
        Ok(Self::with_tokenizer(load_tokenizer(name_or_path)?))
    }

    #[must_use]
    pub fn tokenizer(&self) -> Option<&Tokenizer> {
        self.tokenizer.as_ref()
    }

    #[must_use]
    pub fn preprocess_text(&self, text: &str) -> String {
        text.trim().to_lowercase()
    }

    /// Split text into the attached tokenizer's token strings.
    pub fn tokenize(&self, text: &str) -> TrainingResult<Vec<String>> {
        let tokenizer = self
            .tokenizer
            .as_ref()
            .ok_or_else(|| TrainingError::Tokenizer("no tokenizer configured".to_string()))?;
        let encoding = tokenizer
            .encode(text, false)
            .map_err(|e| TrainingError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_tokens().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    /// A whitespace word-level tokenizer over a tiny vocabulary.
    fn word_tokenizer(words: &[&str]) -> Tokenizer {
        let mut vocab = serde_json::Map::new();
        vocab.insert("[UNK]".to_string(), 0.into());
        for (i, w) in words.iter().enumerate() {
            vocab.insert((*w).to_string(), (i + 1).into());
        }
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
        });
        Tokenizer::from_str(&json.to_string()).unwrap()
    }

    #[test]
    fn test_preprocess_trims_and_lowercases() {
        assert_eq!(TextProcessor::new().preprocess_text("  Hello World \n"), "hello world");
    }

    #[test]
    fn test_tokenize_without_tokenizer_errors() {
        let err = TextProcessor::new().tokenize("hi").unwrap_err();
        assert!(matches!(err, TrainingError::Tokenizer(_)));
    }

    #[test]
    fn test_tokenize_with_tokenizer() {
        let processor = TextProcessor::with_tokenizer(word_tokenizer(&["hello", "world"]));
        let tokens = processor.tokenize("hello world again").unwrap();
        assert_eq!(tokens, vec!["hello", "world", "[UNK]"]);
    }

    #[test]
    fn test_load_tokenizer_from_model_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        word_tokenizer(&["a"]).save(temp.path().join("tokenizer.json"), false).unwrap();

        let processor = TextProcessor::load(temp.path().to_str().unwrap()).unwrap();
        assert_eq!(processor.tokenize("a b").unwrap(), vec!["a", "[UNK]"]);
    }
}
