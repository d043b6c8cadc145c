use crate::artifacts::MANIFEST_FILE;
use crate::error::TrainingResult;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const MODEL_CARD_FILE: &str = "README.md";

const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// Filesystem layout of a trained model directory.
///
/// ```text
/// <root>/model.safetensors
/// <root>/config.json
/// <root>/tokenizer.json
/// <root>/trainer_state.json
/// <root>/training_manifest.json
/// <root>/checkpoint-<step>/model.safetensors
/// ```
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    root: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn weights_path(&self) -> PathBuf {
        self.root.join(WEIGHTS_FILE)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    #[must_use]
    pub fn tokenizer_path(&self) -> PathBuf {
        self.root.join(TOKENIZER_FILE)
    }

    #[must_use]
    pub fn trainer_state_path(&self) -> PathBuf {
        self.root.join(TRAINER_STATE_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn checkpoint_dir(&self, step: u64) -> PathBuf {
        self.root.join(format!("{CHECKPOINT_PREFIX}{step}"))
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Existing checkpoint directories, oldest step first.
    pub fn checkpoints(&self) -> TrainingResult<Vec<(u64, PathBuf)>> {
        let mut out = Vec::new();
        let dir = match std::fs::read_dir(&self.root) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        for entry in dir {
            let entry = entry?;
            let name = entry.file_name();
            let Some(step) = name
                .to_str()
                .and_then(|n| n.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            if entry.path().is_dir() {
                out.push((step, entry.path()));
            }
        }

        out.sort_by_key(|(step, _)| *step);
        Ok(out)
    }

    /// Delete the oldest checkpoints so that at most `limit` remain.
    pub fn rotate_checkpoints(&self, limit: usize) -> TrainingResult<Vec<PathBuf>> {
        let checkpoints = self.checkpoints()?;
        let excess = checkpoints.len().saturating_sub(limit);
        let mut removed = Vec::with_capacity(excess);
        for (step, path) in checkpoints.into_iter().take(excess) {
            debug!(step, path = %path.display(), "removing old checkpoint");
            std::fs::remove_dir_all(&path)?;
            removed.push(path);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::new(temp.path().join("models/finetuned_phi"));

        assert!(layout.weights_path().ends_with("finetuned_phi/model.safetensors"));
        assert!(layout.checkpoint_dir(100).ends_with("checkpoint-100"));
        assert!(layout.manifest_path().ends_with(MANIFEST_FILE));
    }

    #[test]
    fn test_rotate_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::new(temp.path());
        for step in [500, 1500, 1000] {
            std::fs::create_dir_all(layout.checkpoint_dir(step)).unwrap();
        }
        std::fs::create_dir_all(temp.path().join("checkpoint-final")).unwrap();

        let removed = layout.rotate_checkpoints(2).unwrap();
        assert_eq!(removed, vec![layout.checkpoint_dir(500)]);

        let left: Vec<u64> = layout.checkpoints().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(left, vec![1000, 1500]);
    }
}
