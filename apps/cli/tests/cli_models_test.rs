//! Integration tests for the model, export, cloud, and pipeline commands.
//!
//! These cover the paths that need no network access or pretrained weights.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn sitetune(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sitetune").unwrap();
    cmd.current_dir(temp_dir.path())
        .env("HOME", temp_dir.path())
        .env("NO_COLOR", "1")
        .env_remove("GCP_PROJECT_ID")
        .env_remove("GCP_BUCKET_NAME")
        .env_remove("GCP_LOCATION")
        .env_remove("MODEL_DIR")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_models_list_empty() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .args(["models", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No trained models found"));
}

#[test]
fn test_train_list_empty_json() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .args(["--log-level", "error", "train", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_models_load_missing_model() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .args(["--model-dir", "trained", "models", "load", "finetuned_phi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Model not found at"))
        .stderr(predicate::str::contains("finetuned_phi"));
}

#[test]
fn test_models_load_unsupported_type() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .args(["models", "load", "anything", "--type", "t5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported model type: t5"));
}

#[test]
fn test_export_web_missing_model() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .args(["export", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to export"));
}

#[test]
fn test_pipeline_requires_gcp_settings() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .arg("pipeline")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GCP_PROJECT_ID and GCP_BUCKET_NAME environment variables must be set"));

    assert!(!temp_dir.path().join("data").exists());
}

#[test]
fn test_train_cloud_requires_gcp_settings() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .env("GCP_PROJECT_ID", "demo")
        .args(["train", "cloud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GCP_PROJECT_ID and GCP_BUCKET_NAME environment variables must be set"));
}

#[test]
fn test_cloud_verify_requires_project() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .args(["cloud", "verify"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GCP_PROJECT_ID must be set"));
}

#[test]
fn test_local_config_file_supplies_gcp_settings() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(".sitetunerc"), "[gcp]\nproject_id = \"demo\"\n").unwrap();

    // Project comes from the file, the bucket is still missing.
    sitetune(&temp_dir)
        .arg("pipeline")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GCP_BUCKET_NAME"));
}

#[test]
fn test_invalid_config_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("bad.toml"), "gcp = 3").unwrap();

    sitetune(&temp_dir)
        .args(["--config", "bad.toml", "models", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config file"));
}

#[test]
fn test_unknown_device_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    sitetune(&temp_dir)
        .args(["train", "smoke", "--device", "tpu"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown device: tpu"));
}
