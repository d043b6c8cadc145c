//! Loading fine-tuned models back from the model directory.

use crate::error::{CoreError, CoreResult};
use crate::models::{
    load_pretrained, DistilBertConfig, DistilBertForSequenceClassification, ModelFiles, PhiConfig, PhiForCausalLM,
};
use crate::training::write_config;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use sitetune_training::{discover_trained_models, TrainedModelEntry, TrainingLayout};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::info;

/// Default number of labels for a classifier config without `id2label`.
const DEFAULT_NUM_LABELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    CausalLm,
    SequenceClassification,
}

impl FromStr for ModelKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phi" | "causal-lm" => Ok(Self::CausalLm),
            "distilbert" | "sequence-classification" => Ok(Self::SequenceClassification),
            _ => Err(CoreError::UnsupportedModelType(s.to_string())),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CausalLm => write!(f, "causal-lm"),
            Self::SequenceClassification => write!(f, "sequence-classification"),
        }
    }
}

pub enum ModelNetwork {
    CausalLm { model: PhiForCausalLM, config: PhiConfig },
    SequenceClassification { model: DistilBertForSequenceClassification, config: DistilBertConfig },
}

/// A model and its weights, ready for inference or re-export.
pub struct LoadedModel {
    pub kind: ModelKind,
    pub network: ModelNetwork,
    pub model_dir: PathBuf,
    varmap: VarMap,
}

impl LoadedModel {
    pub fn load(model_dir: &Path, kind: ModelKind, device: &Device) -> CoreResult<Self> {
        if !model_dir.exists() {
            return Err(CoreError::ModelNotFound(model_dir.to_path_buf()));
        }
        let files = ModelFiles::from_dir(model_dir)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let network = match kind {
            ModelKind::CausalLm => {
                let config: PhiConfig = files.read_config()?;
                let model = PhiForCausalLM::new(&config, vb)?;
                ModelNetwork::CausalLm { model, config }
            }
            ModelKind::SequenceClassification => {
                let config: DistilBertConfig = files.read_config()?;
                let num_labels = config.num_labels().unwrap_or(DEFAULT_NUM_LABELS);
                let model = DistilBertForSequenceClassification::new(&config, num_labels, vb)?;
                ModelNetwork::SequenceClassification { model, config }
            }
        };
        load_pretrained(&varmap, &files.weights, device)?;
        Ok(Self { kind, network, model_dir: model_dir.to_path_buf(), varmap })
    }

    #[must_use]
    pub fn num_labels(&self) -> Option<usize> {
        match &self.network {
            ModelNetwork::SequenceClassification { model, .. } => Some(model.num_labels()),
            ModelNetwork::CausalLm { .. } => None,
        }
    }

    /// Write weights and config into `layout`.
    pub fn save(&self, layout: &TrainingLayout) -> CoreResult<()> {
        layout.ensure_dirs()?;
        self.varmap.save(layout.weights_path())?;
        match &self.network {
            ModelNetwork::CausalLm { config, .. } => write_config(layout, config),
            ModelNetwork::SequenceClassification { config, .. } => write_config(layout, config),
        }
    }
}

/// Loads models by name from `model_dir/<name>` and caches them.
pub struct ModelLoader {
    model_dir: PathBuf,
    device: Device,
    models: HashMap<String, Arc<LoadedModel>>,
    tokenizers: HashMap<String, Arc<Tokenizer>>,
}

impl ModelLoader {
    #[must_use]
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self { model_dir: model_dir.into(), device: Device::Cpu, models: HashMap::new(), tokenizers: HashMap::new() }
    }

    /// Uses `$MODEL_DIR`, falling back to `models`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(std::env::var("MODEL_DIR").unwrap_or_else(|_| "models".to_string()))
    }

    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn load_model(&mut self, name: &str, model_type: &str) -> CoreResult<Arc<LoadedModel>> {
        if let Some(model) = self.models.get(name) {
            return Ok(model.clone());
        }

        let kind = ModelKind::from_str(model_type)?;
        let path = self.model_dir.join(name);
        if !path.exists() {
            return Err(CoreError::ModelNotFound(path));
        }

        info!(name, kind = %kind, path = %path.display(), "loading model");
        let model = Arc::new(LoadedModel::load(&path, kind, &self.device)?);
        let tokenizer = ModelFiles::from_dir(&path)?.load_tokenizer()?;

        self.models.insert(name.to_string(), model.clone());
        self.tokenizers.insert(name.to_string(), Arc::new(tokenizer));
        Ok(model)
    }

    #[must_use]
    pub fn get_model(&self, name: &str) -> Option<Arc<LoadedModel>> {
        self.models.get(name).cloned()
    }

    #[must_use]
    pub fn get_tokenizer(&self, name: &str) -> Option<Arc<Tokenizer>> {
        self.tokenizers.get(name).cloned()
    }

    /// Trained models under the model directory that carry a manifest.
    pub fn discover(&self) -> CoreResult<Vec<TrainedModelEntry>> {
        Ok(discover_trained_models(&self.model_dir)?)
    }
}
