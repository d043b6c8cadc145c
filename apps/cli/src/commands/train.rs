//! Training command implementation.

use super::parse_device;
use super::types::TrainCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use sitetune_core::cloud::{CloudTrainParams, GcloudTokenProvider, GcpSettings, GcpTrainer};
use sitetune_core::{CausalLmTrainer, SequenceClassificationTrainer, SitetuneConfig};
use sitetune_training::{
    discover_trained_models, DatasetSource, LogProgressSink, ModelSpec, Trainer, TrainingDevice, TrainingJobSpec,
    TrainingManifest,
};
use std::path::PathBuf;
use std::sync::Arc;

pub async fn execute(command: TrainCommand, config: &SitetuneConfig) -> Result<()> {
    match command {
        TrainCommand::Classifier { train_file, eval_file, max_records, output, device, json } => {
            let mut job = TrainingJobSpec::review_classifier();
            if let Some(train) = train_file {
                job.dataset = DatasetSource::LabeledJsonl { train, eval: eval_file };
            } else if let DatasetSource::HubLabeled { max_records: limit, .. } = &mut job.dataset {
                *limit = max_records;
            }
            job.output_dir = output.unwrap_or_else(|| config.model_dir().join("finetuned_distilbert"));
            job.resources.device = parse_device(device.as_deref(), TrainingDevice::Cpu)?;

            let manifest = run_job(SequenceClassificationTrainer::new(), &job).await?;
            print_manifest(&manifest, &job, json)
        }
        TrainCommand::Causal { data, model, output, max_steps, device, json } => {
            let data = data.unwrap_or_else(|| config.training_data_path());
            let output = output.unwrap_or_else(|| config.model_dir().join("finetuned_phi"));
            let mut job = TrainingJobSpec::content_causal_lm(data, output);
            job.base_model = ModelSpec::candle(model);
            if max_steps.is_some() {
                job.hyperparams.max_steps = max_steps;
            }
            job.resources.device = parse_device(device.as_deref(), TrainingDevice::Auto)?;

            let manifest = run_job(CausalLmTrainer::new(), &job).await?;
            print_manifest(&manifest, &job, json)
        }
        TrainCommand::Smoke { model, output, device } => {
            let mut job = TrainingJobSpec::smoke();
            if let Some(model) = model {
                job.base_model = ModelSpec::candle(model);
            }
            if let Some(output) = output {
                job.output_dir = output;
            }
            job.resources.device = parse_device(device.as_deref(), TrainingDevice::Auto)?;

            let manifest = run_job(CausalLmTrainer::new(), &job).await?;
            print_manifest(&manifest, &job, false)
        }
        TrainCommand::Cloud { data, model, output } => train_cloud(config, data, model, output).await,
        TrainCommand::List { json } => list_trained_models(config, json),
    }
}

/// Run `job`, cancelling it on Ctrl-C.
async fn run_job<T>(trainer: T, job: &TrainingJobSpec) -> Result<TrainingManifest>
where
    T: Trainer + Clone + 'static,
{
    let canceller = trainer.clone();
    let job_id = job.job_id.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling after the current step...".yellow());
            let _ = canceller.cancel(&job_id).await;
        }
    });

    let result = trainer.run(job, &LogProgressSink).await;
    watcher.abort();
    result.with_context(|| format!("Training job {} failed ({})", job.job_id, trainer.id()))
}

fn print_manifest(manifest: &TrainingManifest, job: &TrainingJobSpec, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(manifest)?);
        return Ok(());
    }

    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Job: {}", manifest.job_id.to_string().cyan());
    println!("  Base model: {}", manifest.base_model.model_id);
    println!("  Output: {}", job.output_dir.display().to_string().dimmed());
    if let Some(steps) = manifest.metrics.steps {
        println!("  Steps: {}", steps);
    }
    if let Some(loss) = manifest.metrics.train_loss {
        println!("  Train loss: {:.4}", loss);
    }
    if let Some(loss) = manifest.metrics.eval_loss {
        println!("  Eval loss: {:.4}", loss);
    }
    if let Some(acc) = manifest.metrics.eval_accuracy {
        println!("  Eval accuracy: {:.2}%", acc * 100.0);
    }
    println!();
    Ok(())
}

async fn train_cloud(config: &SitetuneConfig, data: Option<PathBuf>, model: String, output: Option<PathBuf>) -> Result<()> {
    let settings = GcpSettings::resolve(config)?;
    let bucket = settings.bucket_name.clone();
    let trainer = GcpTrainer::new(settings, Arc::new(GcloudTokenProvider::from_env()))?;
    let params = CloudTrainParams {
        model_id: model,
        training_data_path: data.unwrap_or_else(|| config.training_data_path()),
        output_dir: output.unwrap_or_else(|| config.model_dir().join("finetuned_phi")),
        ..CloudTrainParams::default()
    };

    let outcome = trainer.train_model(&params, &LogProgressSink).await.context("Cloud training failed")?;

    println!();
    println!("{}", "Cloud training complete".bold().green());
    println!("  Training data: {}", outcome.data_uri.cyan());
    println!("  Uploaded {} model files to gs://{}", outcome.model_uris.len(), bucket);
    println!("  Output: {}", params.output_dir.display().to_string().dimmed());
    println!();
    Ok(())
}

fn list_trained_models(config: &SitetuneConfig, json_output: bool) -> Result<()> {
    let model_dir = config.model_dir();
    let models = discover_trained_models(&model_dir).context("Failed to discover trained models")?;

    if json_output {
        let out: Vec<_> = models
            .into_iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "model_dir": m.model_dir,
                    "job_id": m.manifest.job_id.0,
                    "created_at": m.manifest.created_at,
                    "objective": m.manifest.objective,
                    "base_model": m.manifest.base_model,
                    "dataset_id": m.manifest.dataset_id.0,
                    "metrics": m.manifest.metrics,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Trained Models ({})", models.len()).bold().cyan());
    println!();

    if models.is_empty() {
        println!("  {}", format!("No trained models found in {}.", model_dir.display()).dimmed());
        println!();
        println!("  {}", "Tip: run `sitetune train smoke` to produce a first model.".dimmed());
        return Ok(());
    }

    println!("{:<28} {:<26} {}", "Name", "Base model", "Created");
    println!("{}", "─".repeat(80));
    for m in models {
        println!(
            "{:<28} {:<26} {}",
            m.name.cyan(),
            m.manifest.base_model.model_id,
            m.manifest.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
    println!();
    Ok(())
}
