use crate::content::load_training_data;
use crate::dataset::{
    compute_dataset_id, compute_labeled_dataset_id, validate_records, DatasetId, DatasetSource,
    InstructionRecord, LabeledExample, LabeledSplits,
};
use crate::error::{TrainingError, TrainingResult};
use crate::hub;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Resolve an instruction dataset source into validated records.
pub fn build_instruction_dataset(source: &DatasetSource) -> TrainingResult<(Vec<InstructionRecord>, DatasetId)> {
    let records = match source {
        DatasetSource::InstructionJson { path } => load_training_data(path)?,
        DatasetSource::InstructionInline { records } => records.clone(),
        other => {
            return Err(TrainingError::Dataset(format!(
                "expected an instruction dataset, got {}",
                source_kind(other)
            )))
        }
    };

    validate_records(&records)?;
    let id = compute_dataset_id(&records)?;
    Ok((records, id))
}

/// Resolve a labeled dataset source into train/eval splits.
pub fn build_labeled_dataset(source: &DatasetSource) -> TrainingResult<(LabeledSplits, DatasetId)> {
    let splits = match source {
        DatasetSource::HubLabeled { repo_id, train_files, eval_files, text_field, label_field, max_records } => {
            let fields = LabeledFields { text: text_field, label: label_field };
            let mut splits = LabeledSplits::default();
            for file in train_files {
                let path = hub::fetch_dataset_file(repo_id, file)?;
                read_labeled_file(&path, &fields, *max_records, &mut splits.train)?;
            }
            for file in eval_files {
                let path = hub::fetch_dataset_file(repo_id, file)?;
                read_labeled_file(&path, &fields, *max_records, &mut splits.eval)?;
            }
            info!(repo = %repo_id, train = splits.train.len(), eval = splits.eval.len(), "loaded hub dataset");
            splits
        }
        DatasetSource::LabeledJsonl { train, eval } => {
            let fields = LabeledFields::default();
            let mut splits = LabeledSplits::default();
            read_labeled_file(train, &fields, None, &mut splits.train)?;
            if let Some(eval) = eval {
                read_labeled_file(eval, &fields, None, &mut splits.eval)?;
            }
            splits
        }
        other => {
            return Err(TrainingError::Dataset(format!(
                "expected a labeled dataset, got {}",
                source_kind(other)
            )))
        }
    };

    if splits.train.is_empty() {
        return Err(TrainingError::Dataset("labeled dataset has no training examples".to_string()));
    }
    let id = compute_labeled_dataset_id(&splits)?;
    Ok((splits, id))
}

fn source_kind(source: &DatasetSource) -> &'static str {
    match source {
        DatasetSource::InstructionJson { .. } => "instruction_json",
        DatasetSource::InstructionInline { .. } => "instruction_inline",
        DatasetSource::HubLabeled { .. } => "hub_labeled",
        DatasetSource::LabeledJsonl { .. } => "labeled_jsonl",
    }
}

#[derive(Debug, Clone, Copy)]
struct LabeledFields<'a> {
    text: &'a str,
    label: &'a str,
}

impl Default for LabeledFields<'static> {
    fn default() -> Self {
        Self { text: "text", label: "label" }
    }
}

fn read_labeled_file(
    path: &Path,
    fields: &LabeledFields<'_>,
    max_records: Option<usize>,
    out: &mut Vec<LabeledExample>,
) -> TrainingResult<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => read_labeled_parquet(path, fields, max_records, out),
        _ => read_labeled_jsonl(path, fields, max_records, out),
    }
}

fn limit_reached(max_records: Option<usize>, out: &[LabeledExample]) -> bool {
    max_records.is_some_and(|limit| out.len() >= limit)
}

fn read_labeled_jsonl(
    path: &Path,
    fields: &LabeledFields<'_>,
    max_records: Option<usize>,
    out: &mut Vec<LabeledExample>,
) -> TrainingResult<()> {
    let contents = std::fs::read_to_string(path)?;

    for (idx, line) in contents.lines().enumerate() {
        if limit_reached(max_records, out) {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse {} line {}: {}", path.display(), idx + 1, e))
        })?;
        let text = value.get(fields.text).and_then(Value::as_str).ok_or_else(|| {
            TrainingError::Dataset(format!("{} line {}: missing string field `{}`", path.display(), idx + 1, fields.text))
        })?;
        let label = value.get(fields.label).and_then(Value::as_u64).ok_or_else(|| {
            TrainingError::Dataset(format!("{} line {}: missing integer field `{}`", path.display(), idx + 1, fields.label))
        })?;
        let label = u32::try_from(label).map_err(|_| {
            TrainingError::Dataset(format!("{} line {}: label {} is out of range", path.display(), idx + 1, label))
        })?;
        out.push(LabeledExample { text: text.to_string(), label });
    }

    Ok(())
}

fn read_labeled_parquet(
    path: &Path,
    fields: &LabeledFields<'_>,
    max_records: Option<usize>,
    out: &mut Vec<LabeledExample>,
) -> TrainingResult<()> {
    let parquet_err = |e: parquet::errors::ParquetError| {
        TrainingError::Dataset(format!("failed to read parquet {}: {e}", path.display()))
    };

    let file = std::fs::File::open(path)?;
    let reader = SerializedFileReader::new(file).map_err(parquet_err)?;

    for row in reader.get_row_iter(None).map_err(parquet_err)? {
        if limit_reached(max_records, out) {
            break;
        }
        let row = row.map_err(parquet_err)?;
        let text = row_field(&row, fields.text)
            .and_then(|f| match f {
                Field::Str(s) => Some(s.clone()),
                Field::Bytes(b) => Some(String::from_utf8_lossy(b.data()).into_owned()),
                _ => None,
            })
            .ok_or_else(|| missing_parquet_field(path, fields.text))?;
        let label = row_field(&row, fields.label)
            .and_then(|f| match *f {
                Field::Byte(v) => u32::try_from(v).ok(),
                Field::Short(v) => u32::try_from(v).ok(),
                Field::Int(v) => u32::try_from(v).ok(),
                Field::Long(v) => u32::try_from(v).ok(),
                Field::UByte(v) => Some(u32::from(v)),
                Field::UShort(v) => Some(u32::from(v)),
                Field::UInt(v) => Some(v),
                _ => None,
            })
            .ok_or_else(|| missing_parquet_field(path, fields.label))?;
        out.push(LabeledExample { text, label });
    }

    Ok(())
}

fn row_field<'r>(row: &'r Row, name: &str) -> Option<&'r Field> {
    row.get_column_iter().find(|(column, _)| column.as_str() == name).map(|(_, field)| field)
}

fn missing_parquet_field(path: &Path, field: &str) -> TrainingError {
    TrainingError::Dataset(format!("missing or mistyped field `{field}` in parquet file {}", path.display()))
}
