//! Website content extraction.
//!
//! Walks the `posts` and `pages` sections of a Hugo-style content tree, reads
//! the front matter of every markdown file and turns each item into
//! instruction/response records for fine-tuning.

use crate::dataset::InstructionRecord;
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Default location of the extracted training data.
pub const DEFAULT_TRAINING_DATA_PATH: &str = "data/processed/training_data.json";

/// A processed markdown file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub path: PathBuf,
    pub title: String,
    pub description: String,
    pub content: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub date: String,
}

#[derive(Debug, Clone)]
pub struct ContentProcessor {
    content_dir: PathBuf,
    posts_dir: PathBuf,
    pages_dir: PathBuf,
}

impl Default for ContentProcessor {
    fn default() -> Self {
        Self::new("content")
    }
}

impl ContentProcessor {
    #[must_use]
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        let content_dir = content_dir.into();
        Self {
            posts_dir: content_dir.join("posts"),
            pages_dir: content_dir.join("pages"),
            content_dir,
        }
    }

    #[must_use]
    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Parse one markdown file into a `ContentItem`.
    pub fn process_markdown(&self, path: &Path) -> TrainingResult<ContentItem> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TrainingError::content(path, e.to_string()))?;
        let (metadata, body) =
            parse_front_matter(&raw).map_err(|message| TrainingError::content(path, message))?;

        Ok(ContentItem {
            path: path.to_path_buf(),
            title: metadata.get("title").map(display_scalar).unwrap_or_default(),
            description: metadata.get("description").map(display_scalar).unwrap_or_default(),
            content: body,
            tags: metadata.get("tags").map(string_list).unwrap_or_default(),
            categories: metadata.get("categories").map(string_list).unwrap_or_default(),
            date: metadata.get("date").map(display_scalar).unwrap_or_default(),
        })
    }

    /// Collect every markdown file under `posts/` and then `pages/`.
    ///
    /// Files that fail to parse are logged and skipped.
    pub fn collect_content(&self) -> Vec<ContentItem> {
        let mut items = Vec::new();
        for section in [&self.posts_dir, &self.pages_dir] {
            self.collect_section(section, &mut items);
        }
        items
    }

    fn collect_section(&self, dir: &Path, items: &mut Vec<ContentItem>) {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "content section not found, skipping");
            return;
        }

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("failed to walk {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !entry.file_name().to_string_lossy().ends_with(".md") {
                continue;
            }

            match self.process_markdown(entry.path()) {
                Ok(item) => items.push(item),
                Err(e) => error!("Error processing {}: {}", entry.path().display(), e),
            }
        }
    }

    /// Expand content items into instruction/response records: one for the
    /// title, one per category, one per tag.
    #[must_use]
    pub fn format_for_training(&self, items: &[ContentItem]) -> Vec<InstructionRecord> {
        let mut records = Vec::new();

        for item in items {
            let response = format!("Title: {}\n\n{}", item.title, item.content);
            let subjects = std::iter::once(&item.title)
                .chain(item.categories.iter())
                .chain(item.tags.iter());
            for subject in subjects {
                records.push(InstructionRecord::new(format!("Write content about {subject}"), response.clone()));
            }
        }

        records
    }

    /// Collect, format, and save in one go. Returns `(items, records)` counts.
    pub fn run(&self, output_path: &Path) -> TrainingResult<(usize, usize)> {
        let items = self.collect_content();
        let records = self.format_for_training(&items);
        save_training_data(&records, output_path)?;

        info!("Processed {} content items into {} training examples", items.len(), records.len());
        Ok((items.len(), records.len()))
    }
}

/// Write records as a pretty-printed JSON array.
pub fn save_training_data(records: &[InstructionRecord], path: &Path) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(records)?)?;
    Ok(())
}

/// Read a JSON array of records written by `save_training_data`.
pub fn load_training_data(path: &Path) -> TrainingResult<Vec<InstructionRecord>> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        TrainingError::Dataset(format!("failed to parse training data {}: {e}", path.display()))
    })
}

/// Split `---` YAML or `+++` TOML front matter from a markdown body.
///
/// A document without front matter yields empty metadata and the whole text as body.
pub fn parse_front_matter(raw: &str) -> Result<(Map<String, Value>, String), String> {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw).replace("\r\n", "\n");

    let Some((delimiter, format)) = ["---", "+++"]
        .into_iter()
        .zip([FrontMatterFormat::Yaml, FrontMatterFormat::Toml])
        .find(|(d, _)| text.lines().next().is_some_and(|first| first.trim_end() == *d))
    else {
        return Ok((Map::new(), text.trim().to_string()));
    };

    let after_open = text.split_once('\n').map_or("", |(_, rest)| rest);
    let mut offset = 0;
    let mut close = None;
    for line in after_open.split_inclusive('\n') {
        if line.trim_end() == delimiter {
            close = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (header_end, body_start) = close.ok_or_else(|| format!("no closing '{delimiter}' delimiter found"))?;

    let header = &after_open[..header_end];
    let body = after_open[body_start..].trim().to_string();
    let metadata = format.parse(header)?;
    Ok((metadata, body))
}

#[derive(Debug, Clone, Copy)]
enum FrontMatterFormat {
    Yaml,
    Toml,
}

impl FrontMatterFormat {
    fn parse(self, header: &str) -> Result<Map<String, Value>, String> {
        if header.trim().is_empty() {
            return Ok(Map::new());
        }
        let value = match self {
            Self::Yaml => {
                let yaml: serde_yaml::Value =
                    serde_yaml::from_str(header).map_err(|e| format!("invalid YAML front matter: {e}"))?;
                serde_json::to_value(yaml).map_err(|e| format!("unsupported YAML front matter: {e}"))?
            }
            Self::Toml => {
                let table: toml::Table =
                    toml::from_str(header).map_err(|e| format!("invalid TOML front matter: {e}"))?;
                toml_to_json(toml::Value::Table(table))
            }
        };
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(format!("front matter must be a mapping, got {other}")),
        }
    }
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect())
        }
    }
}

fn display_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).map(display_scalar).collect(),
        scalar => vec![display_scalar(scalar)],
    }
}
