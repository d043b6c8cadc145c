//! CLI configuration loading and merging.

use anyhow::{Context, Result};
use sitetune_core::SitetuneConfig;
use std::path::{Path, PathBuf};

/// Load and merge configuration.
///
/// Configuration precedence:
/// 1. CLI arguments
/// 2. Environment variables
/// 3. `--config` file, or ./.sitetunerc over ~/.sitetune/config.toml
/// 4. Defaults
pub fn load_config(explicit: Option<&Path>, model_dir: Option<PathBuf>) -> Result<SitetuneConfig> {
    let mut config = match explicit {
        Some(path) => {
            let mut config = SitetuneConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => SitetuneConfig::discover_and_load().context("Failed to load configuration")?,
    };

    if model_dir.is_some() {
        config.paths.model_dir = model_dir;
    }
    Ok(config)
}
