//! Plain document loading and JSON persistence.

use crate::error::TrainingResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub content: String,
    /// File extension without the leading dot.
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    data_dir: PathBuf,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new("data")
    }
}

impl DocumentLoader {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Load each path as UTF-8 text. Unreadable files are logged and skipped.
    pub fn load_documents<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<Document> {
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            match std::fs::read_to_string(path) {
                Ok(content) => documents.push(Document {
                    path: path.to_path_buf(),
                    content,
                    kind: path
                        .extension()
                        .map(|e| e.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                }),
                Err(e) => error!("Error loading {}: {}", path.display(), e),
            }
        }
        documents
    }

    /// Write embedding records as pretty JSON.
    pub fn save_embeddings(&self, embeddings: &[serde_json::Value], output_path: &Path) -> TrainingResult<()> {
        std::fs::write(output_path, serde_json::to_string_pretty(embeddings)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_documents_skips_missing() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.md");
        let b = temp.path().join("README");
        std::fs::write(&a, "# A").unwrap();
        std::fs::write(&b, "plain").unwrap();

        let loader = DocumentLoader::default();
        let docs = loader.load_documents(&[a.clone(), temp.path().join("missing.txt"), b]);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].kind, "md");
        assert_eq!(docs[0].content, "# A");
        assert_eq!(docs[1].kind, "");
        assert_eq!(loader.data_dir(), Path::new("data"));
    }

    #[test]
    fn test_save_embeddings_round_trips_json() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("embeddings.json");
        let embeddings = vec![serde_json::json!({"path": "a.md", "vector": [0.5, 1.0]})];

        DocumentLoader::default().save_embeddings(&embeddings, &out).unwrap();
        let loaded: Vec<serde_json::Value> = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(loaded, embeddings);
    }
}
