//! Command type definitions shared between main.rs and the command modules.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum ContentCommand {
    /// Extract instruction/response records from markdown content
    Build {
        /// Content directory containing posts/ and pages/
        #[arg(long)]
        content_dir: Option<PathBuf>,

        /// Where to write the training data JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum DocsCommand {
    /// Load text documents and summarize them
    Load {
        /// Files to load
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Save the loaded documents as a JSON array
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TextCommand {
    /// Trim and lowercase text
    Preprocess {
        /// Text to process
        text: String,
    },

    /// Split text into tokenizer tokens
    Tokenize {
        /// Text to tokenize
        text: String,

        /// tokenizer.json, a model directory, or a Hub model id
        #[arg(short, long)]
        tokenizer: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TrainCommand {
    /// Fine-tune DistilBERT on review ratings
    Classifier {
        /// Local JSONL training split ({"text", "label"} per line) instead of the Hub dataset
        #[arg(long)]
        train_file: Option<PathBuf>,

        /// Local JSONL evaluation split
        #[arg(long, requires = "train_file")]
        eval_file: Option<PathBuf>,

        /// Cap the number of records read per split
        #[arg(long)]
        max_records: Option<usize>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Device (auto, cpu, cuda, metal)
        #[arg(long)]
        device: Option<String>,

        /// Output the manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fine-tune Phi on extracted site content
    Causal {
        /// Training data JSON (defaults to the configured path)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Base model id or local directory
        #[arg(long, default_value = "microsoft/phi-2")]
        model: String,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many optimizer steps
        #[arg(long)]
        max_steps: Option<u64>,

        /// Device (auto, cpu, cuda, metal)
        #[arg(long)]
        device: Option<String>,

        /// Output the manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fine-tune Phi on three built-in examples
    Smoke {
        /// Base model id or local directory
        #[arg(long)]
        model: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Device (auto, cpu, cuda, metal)
        #[arg(long)]
        device: Option<String>,
    },

    /// Upload data, fine-tune Phi, and upload the model to Cloud Storage
    Cloud {
        /// Training data JSON (defaults to the configured path)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Base model id or local directory
        #[arg(long, default_value = "microsoft/phi-2")]
        model: String,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List trained models under the model directory
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ModelsCommand {
    /// List trained models
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load a model to check it is usable
    Load {
        /// Directory name under the model directory
        name: String,

        /// Model type (phi, causal-lm, distilbert, sequence-classification)
        #[arg(short = 't', long = "type", default_value = "phi")]
        model_type: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ExportCommand {
    /// Copy a trained model into the static site with a model card
    Web {
        /// Trained model directory
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Destination directory
        #[arg(long)]
        web_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CloudCommand {
    /// Check credentials, Cloud Storage and Vertex AI access
    Verify {
        /// GCP project (overrides GCP_PROJECT_ID)
        #[arg(long)]
        project: Option<String>,

        /// Vertex AI location (overrides GCP_LOCATION)
        #[arg(long)]
        location: Option<String>,

        /// Bucket to check (overrides GCP_BUCKET_NAME)
        #[arg(long)]
        bucket: Option<String>,
    },
}
