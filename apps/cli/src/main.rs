//! Sitetune CLI - fine-tune language models on website content
//!
//! This CLI provides a `sitetune` command that extracts training data from a
//! static site's markdown, fine-tunes models with candle, and publishes the
//! results to Cloud Storage or the site itself.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, shells};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::{CloudCommand, ContentCommand, DocsCommand, ExportCommand, ModelsCommand, TextCommand, TrainCommand};
use commands::{cloud, content, docs, export, models, pipeline, text, train};

/// Sitetune CLI - fine-tune language models on website content
#[derive(Parser, Debug)]
#[command(
    name = "sitetune",
    author,
    version,
    about = "Sitetune - fine-tune language models on website content",
    long_about = "Sitetune extracts instruction data from site content, fine-tunes DistilBERT and Phi models with candle,\nand publishes the results to Google Cloud Storage or the site's static directory."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); defaults to the config's log_level, then info
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Config file (skips ~/.sitetune/config.toml and ./.sitetunerc)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Model directory (overrides MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build training data from site content
    #[command(subcommand)]
    Content(ContentCommand),

    /// Load plain documents
    #[command(subcommand)]
    Docs(DocsCommand),

    /// Text preprocessing and tokenization
    #[command(subcommand)]
    Text(TextCommand),

    /// Fine-tune models
    ///
    /// Runs the classifier, content, and smoke fine-tunes locally with candle,
    /// or the content fine-tune with Cloud Storage upload.
    #[command(subcommand)]
    Train(TrainCommand),

    /// Inspect trained models
    #[command(subcommand)]
    Models(ModelsCommand),

    /// Export trained models
    #[command(subcommand)]
    Export(ExportCommand),

    /// Google Cloud helpers
    #[command(subcommand)]
    Cloud(CloudCommand),

    /// Build training data, fine-tune, and upload in one run
    ///
    /// Requires GCP_PROJECT_ID and GCP_BUCKET_NAME.
    Pipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Handle completion generation
    if let Ok(shell) = std::env::var("SITETUNE_GENERATE_COMPLETIONS") {
        let mut cmd = Args::command();
        match shell.as_str() {
            "bash" => generate(shells::Bash, &mut cmd, "sitetune", &mut std::io::stdout()),
            "zsh" => generate(shells::Zsh, &mut cmd, "sitetune", &mut std::io::stdout()),
            "fish" => generate(shells::Fish, &mut cmd, "sitetune", &mut std::io::stdout()),
            "powershell" => generate(shells::PowerShell, &mut cmd, "sitetune", &mut std::io::stdout()),
            "elvish" => generate(shells::Elvish, &mut cmd, "sitetune", &mut std::io::stdout()),
            _ => anyhow::bail!("Unknown shell: {}. Supported: bash, zsh, fish, powershell, elvish", shell),
        }
        return Ok(());
    }

    let args = Args::parse();
    let config = config::load_config(args.config.as_deref(), args.model_dir)?;

    // Initialize tracing
    let log_level = args.log_level.or_else(|| config.log_level.clone()).unwrap_or_default();
    let level = match log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Content(cmd) => content::execute(cmd, &config)?,
        Command::Docs(cmd) => docs::execute(cmd)?,
        Command::Text(cmd) => text::execute(cmd)?,
        Command::Train(cmd) => train::execute(cmd, &config).await?,
        Command::Models(cmd) => models::execute(cmd, &config)?,
        Command::Export(cmd) => export::execute(cmd, &config)?,
        Command::Cloud(cmd) => cloud::execute(cmd, &config).await?,
        Command::Pipeline => pipeline::execute(&config).await?,
    }

    Ok(())
}
