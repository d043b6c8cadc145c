//! Configuration file support.
//!
//! Configuration precedence:
//! 1. CLI arguments (handled by the binary)
//! 2. Environment variables
//! 3. Local config file (./.sitetunerc)
//! 4. Global config file (~/.sitetune/config.toml)
//! 5. Defaults

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_LOCATION: &str = "us-central1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpConfig {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub content_dir: Option<PathBuf>,
    #[serde(default)]
    pub training_data: Option<PathBuf>,
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    #[serde(default)]
    pub web_model_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitetuneConfig {
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl SitetuneConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))
    }

    #[must_use]
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".sitetune")
            .join("config.toml")
    }

    #[must_use]
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".sitetunerc")
    }

    /// Global file, then local file, then environment.
    pub fn discover_and_load() -> CoreResult<Self> {
        let mut config = Self::default();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            if path.exists() {
                config.merge(Self::load_from_file(&path)?);
            }
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Values set in `other` win.
    pub fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.gcp.project_id, other.gcp.project_id);
        take(&mut self.gcp.bucket_name, other.gcp.bucket_name);
        take(&mut self.gcp.location, other.gcp.location);
        take(&mut self.paths.content_dir, other.paths.content_dir);
        take(&mut self.paths.training_data, other.paths.training_data);
        take(&mut self.paths.model_dir, other.paths.model_dir);
        take(&mut self.paths.web_model_dir, other.paths.web_model_dir);
        take(&mut self.log_level, other.log_level);
    }

    /// Override with non-empty environment variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        self.merge(Self {
            gcp: GcpConfig {
                project_id: get("GCP_PROJECT_ID"),
                bucket_name: get("GCP_BUCKET_NAME"),
                location: get("GCP_LOCATION"),
            },
            paths: PathsConfig { model_dir: get("MODEL_DIR").map(PathBuf::from), ..PathsConfig::default() },
            log_level: get("RUST_LOG"),
        });
    }

    #[must_use]
    pub fn content_dir(&self) -> PathBuf {
        self.paths.content_dir.clone().unwrap_or_else(|| PathBuf::from("content"))
    }

    #[must_use]
    pub fn training_data_path(&self) -> PathBuf {
        self.paths
            .training_data
            .clone()
            .unwrap_or_else(|| PathBuf::from(sitetune_training::DEFAULT_TRAINING_DATA_PATH))
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.paths.model_dir.clone().unwrap_or_else(|| PathBuf::from("models"))
    }

    #[must_use]
    pub fn web_model_dir(&self) -> PathBuf {
        self.paths
            .web_model_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::export::DEFAULT_WEB_MODEL_DIR))
    }

    #[must_use]
    pub fn location(&self) -> String {
        self.gcp.location.clone().unwrap_or_else(|| DEFAULT_LOCATION.to_string())
    }
}
