use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// One instruction/response pair, the unit the content extractor emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub instruction: String,
    pub response: String,
}

impl InstructionRecord {
    #[must_use]
    pub fn new(instruction: impl Into<String>, response: impl Into<String>) -> Self {
        Self { instruction: instruction.into(), response: response.into() }
    }

    /// Render the record with the causal-LM prompt template.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        format!("### Instruction:\n{}\n\n### Response:\n{}", self.instruction, self.response)
    }
}

/// A text with an integer class label (sequence classification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: u32,
}

/// Train/eval split of a labeled dataset.
#[derive(Debug, Clone, Default)]
pub struct LabeledSplits {
    pub train: Vec<LabeledExample>,
    pub eval: Vec<LabeledExample>,
}

/// Where a training job reads its data from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetSource {
    /// A JSON array of `InstructionRecord` (output of the content extractor).
    InstructionJson { path: PathBuf },
    /// Records carried inline with the job.
    InstructionInline { records: Vec<InstructionRecord> },
    /// Parquet or JSONL files inside a Hugging Face Hub dataset repository.
    HubLabeled {
        repo_id: String,
        train_files: Vec<String>,
        #[serde(default)]
        eval_files: Vec<String>,
        #[serde(default = "default_text_field")]
        text_field: String,
        #[serde(default = "default_label_field")]
        label_field: String,
        #[serde(default)]
        max_records: Option<usize>,
    },
    /// Local JSONL files, one `{"text": .., "label": ..}` object per line.
    LabeledJsonl {
        train: PathBuf,
        #[serde(default)]
        eval: Option<PathBuf>,
    },
}

fn default_text_field() -> String {
    "text".to_string()
}

fn default_label_field() -> String {
    "label".to_string()
}

impl DatasetSource {
    #[must_use]
    pub fn is_labeled(&self) -> bool {
        matches!(self, Self::HubLabeled { .. } | Self::LabeledJsonl { .. })
    }
}

fn hash_lines<T: Serialize>(items: &[T]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for item in items {
        let bytes = serde_json::to_vec(item)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

pub fn compute_dataset_id(records: &[InstructionRecord]) -> TrainingResult<DatasetId> {
    hash_lines(records)
}

pub fn compute_labeled_dataset_id(splits: &LabeledSplits) -> TrainingResult<DatasetId> {
    let mut all = splits.train.clone();
    all.extend(splits.eval.iter().cloned());
    hash_lines(&all)
}

pub fn validate_records(records: &[InstructionRecord]) -> TrainingResult<()> {
    if records.is_empty() {
        return Err(TrainingError::Dataset("dataset must not be empty".to_string()));
    }
    for (idx, rec) in records.iter().enumerate() {
        if rec.instruction.trim().is_empty() {
            return Err(TrainingError::Dataset(format!("record[{idx}] instruction is empty")));
        }
        if rec.response.trim().is_empty() {
            return Err(TrainingError::Dataset(format!("record[{idx}] response is empty")));
        }
    }
    Ok(())
}

pub fn validate_labeled(examples: &[LabeledExample], num_labels: usize) -> TrainingResult<()> {
    if examples.is_empty() {
        return Err(TrainingError::Dataset("labeled dataset must not be empty".to_string()));
    }
    if let Some((idx, ex)) = examples.iter().enumerate().find(|(_, ex)| ex.label as usize >= num_labels) {
        return Err(TrainingError::Dataset(format!(
            "example[{idx}] label {} is out of range for {num_labels} labels",
            ex.label
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_records_rejects_empty() {
        let records: Vec<InstructionRecord> = vec![];
        assert!(validate_records(&records).is_err());
    }

    #[test]
    fn test_validate_records_rejects_blank_response() {
        let records = vec![InstructionRecord::new("Write content about rust", "  ")];
        let err = validate_records(&records).unwrap_err();
        assert!(err.to_string().contains("response is empty"));
    }

    #[test]
    fn test_compute_dataset_id_stable_for_same_content() {
        let records = vec![
            InstructionRecord::new("p1", "r1"),
            InstructionRecord::new("p2", "r2"),
        ];

        let id1 = compute_dataset_id(&records).unwrap();
        let id2 = compute_dataset_id(&records).unwrap();
        assert_eq!(id1, id2);

        let other = compute_dataset_id(&records[..1]).unwrap();
        assert_ne!(id1, other);
    }

    #[test]
    fn test_prompt_template() {
        let rec = InstructionRecord::new("What is AI?", "AI stands for Artificial Intelligence.");
        assert_eq!(
            rec.to_prompt(),
            "### Instruction:\nWhat is AI?\n\n### Response:\nAI stands for Artificial Intelligence."
        );
    }

    #[test]
    fn test_validate_labeled_checks_range() {
        let examples = vec![
            LabeledExample { text: "great".to_string(), label: 4 },
            LabeledExample { text: "awful".to_string(), label: 5 },
        ];
        assert!(validate_labeled(&examples[..1], 5).is_ok());
        assert!(validate_labeled(&examples, 5).is_err());
    }

    #[test]
    fn test_dataset_source_serde_tag() {
        let src = DatasetSource::LabeledJsonl { train: PathBuf::from("train.jsonl"), eval: None };
        let json = serde_json::to_value(&src).unwrap();
        assert_eq!(json["type"], "labeled_jsonl");
        assert!(src.is_labeled());
    }
}
