use crate::error::{CoreError, CoreResult};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::Deserialize;
use sitetune_training::hub::fetch_model_file;
use sitetune_training::layout::{CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Files that make up a pretrained model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct WeightsIndex {
    weight_map: BTreeMap<String, String>,
}

impl WeightsIndex {
    fn shards(&self) -> BTreeSet<&str> {
        self.weight_map.values().map(String::as_str).collect()
    }
}

impl ModelFiles {
    /// Resolve a local model directory, or fetch the files from the Hub.
    pub fn resolve(model_id: &str) -> CoreResult<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Self::from_dir(local);
        }
        Self::from_hub(model_id)
    }

    pub fn from_dir(dir: &Path) -> CoreResult<Self> {
        let config = dir.join(CONFIG_FILE);
        if !config.exists() {
            return Err(CoreError::ModelNotFound(dir.to_path_buf()));
        }

        let single = dir.join(WEIGHTS_FILE);
        let weights = if single.exists() {
            vec![single]
        } else {
            let index_path = dir.join(WEIGHTS_INDEX_FILE);
            if !index_path.exists() {
                return Err(CoreError::Model(format!("no safetensors weights in {}", dir.display())));
            }
            let index: WeightsIndex = serde_json::from_slice(&std::fs::read(&index_path)?)?;
            index.shards().into_iter().map(|shard| dir.join(shard)).collect()
        };

        Ok(Self { config, tokenizer: dir.join(TOKENIZER_FILE), weights })
    }

    fn from_hub(model_id: &str) -> CoreResult<Self> {
        info!(model_id, "fetching model files from the Hugging Face Hub");
        let config = fetch_model_file(model_id, CONFIG_FILE)?;
        let tokenizer = fetch_model_file(model_id, TOKENIZER_FILE)?;

        let weights = match fetch_model_file(model_id, WEIGHTS_FILE) {
            Ok(path) => vec![path],
            Err(single_err) => {
                debug!(model_id, error = %single_err, "no single weights file, trying sharded index");
                let index_path = fetch_model_file(model_id, WEIGHTS_INDEX_FILE)?;
                let index: WeightsIndex = serde_json::from_slice(&std::fs::read(index_path)?)?;
                index
                    .shards()
                    .into_iter()
                    .map(|shard| fetch_model_file(model_id, shard).map_err(CoreError::from))
                    .collect::<CoreResult<Vec<_>>>()?
            }
        };

        Ok(Self { config, tokenizer, weights })
    }

    pub fn read_config<T: serde::de::DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(serde_json::from_slice(&std::fs::read(&self.config)?)?)
    }

    pub fn load_tokenizer(&self) -> CoreResult<tokenizers::Tokenizer> {
        tokenizers::Tokenizer::from_file(&self.tokenizer).map_err(CoreError::tokenizer)
    }
}

/// Outcome of copying checkpoint tensors into a `VarMap`.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    /// Variables with no counterpart in the checkpoint; they keep their initialization.
    pub missing: Vec<String>,
    pub unused: usize,
}

/// Checkpoint names to try for a variable, most specific first.
fn candidate_names(name: &str) -> Vec<String> {
    let mut out = vec![name.to_string()];
    if let Some(stripped) = name.strip_prefix("distilbert.") {
        out.push(stripped.to_string());
    }
    let legacy: Vec<String> = out
        .iter()
        .filter(|n| n.contains("LayerNorm") || n.contains("layer_norm"))
        .filter_map(|n| {
            n.strip_suffix(".weight")
                .map(|base| format!("{base}.gamma"))
                .or_else(|| n.strip_suffix(".bias").map(|base| format!("{base}.beta")))
        })
        .collect();
    out.extend(legacy);
    out
}

/// Copy pretrained tensors into every variable of `varmap` that has a match.
pub fn load_pretrained(varmap: &VarMap, weights: &[PathBuf], device: &Device) -> CoreResult<LoadReport> {
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    for path in weights {
        debug!(path = %path.display(), "reading safetensors");
        tensors.extend(candle_core::safetensors::load(path, device)?);
    }

    let vars = varmap
        .data()
        .lock()
        .map_err(|_| CoreError::Model("variable map lock poisoned".to_string()))?;

    let mut report = LoadReport::default();
    let mut used = BTreeSet::new();
    for (name, var) in vars.iter() {
        let found = candidate_names(name).into_iter().find_map(|key| tensors.get(&key).map(|t| (key, t)));
        let Some((key, tensor)) = found else {
            report.missing.push(name.clone());
            continue;
        };
        if tensor.dims() != var.dims() {
            return Err(CoreError::Model(format!(
                "shape mismatch for {name}: checkpoint {:?}, model {:?}",
                tensor.dims(),
                var.dims()
            )));
        }
        var.set(&tensor.to_dtype(var.dtype())?)?;
        used.insert(key);
        report.loaded += 1;
    }

    report.missing.sort();
    report.unused = tensors.len().saturating_sub(used.len());
    if !report.missing.is_empty() {
        warn!(
            "Some weights were not found in the checkpoint and are newly initialized: {:?}",
            report.missing
        );
    }
    info!(loaded = report.loaded, unused = report.unused, "pretrained weights loaded");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};
    use tempfile::TempDir;

    #[test]
    fn test_candidate_names_cover_legacy_layer_norm() {
        let names = candidate_names("distilbert.embeddings.LayerNorm.weight");
        assert_eq!(names[0], "distilbert.embeddings.LayerNorm.weight");
        assert!(names.contains(&"embeddings.LayerNorm.weight".to_string()));
        assert!(names.contains(&"embeddings.LayerNorm.gamma".to_string()));
    }

    #[test]
    fn test_load_pretrained_copies_and_reports_missing() {
        let temp = TempDir::new().unwrap();
        let device = Device::Cpu;

        let mut saved = HashMap::new();
        saved.insert("embeddings.LayerNorm.gamma".to_string(), Tensor::new(&[2f32, 2.], &device).unwrap());
        saved.insert("unused.weight".to_string(), Tensor::new(&[1f32], &device).unwrap());
        let path = temp.path().join("model.safetensors");
        candle_core::safetensors::save(&saved, &path).unwrap();

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let w = vb.get_with_hints(2, "distilbert.embeddings.LayerNorm.weight", Init::Const(1.0)).unwrap();
        vb.get_with_hints(2, "classifier.bias", Init::Const(0.0)).unwrap();

        let report = load_pretrained(&varmap, &[path], &device).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.missing, vec!["classifier.bias".to_string()]);
        assert_eq!(report.unused, 1);
        assert_eq!(w.to_vec1::<f32>().unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_load_pretrained_rejects_shape_mismatch() {
        let temp = TempDir::new().unwrap();
        let device = Device::Cpu;
        let mut saved = HashMap::new();
        saved.insert("w".to_string(), Tensor::zeros(3, DType::F32, &device).unwrap());
        let path = temp.path().join("model.safetensors");
        candle_core::safetensors::save(&saved, &path).unwrap();

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        vb.get_with_hints(2, "w", Init::Const(0.0)).unwrap();

        assert!(load_pretrained(&varmap, &[path], &device).is_err());
    }

    #[test]
    fn test_from_dir_reads_sharded_index() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(
            temp.path().join(WEIGHTS_INDEX_FILE),
            r#"{"metadata": {}, "weight_map": {"a": "model-00002-of-00002.safetensors", "b": "model-00001-of-00002.safetensors", "c": "model-00001-of-00002.safetensors"}}"#,
        )
        .unwrap();

        let files = ModelFiles::from_dir(temp.path()).unwrap();
        assert_eq!(
            files.weights,
            vec![
                temp.path().join("model-00001-of-00002.safetensors"),
                temp.path().join("model-00002-of-00002.safetensors"),
            ]
        );
    }

    #[test]
    fn test_from_dir_without_config_is_not_found() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(ModelFiles::from_dir(temp.path()), Err(CoreError::ModelNotFound(_))));
    }
}
