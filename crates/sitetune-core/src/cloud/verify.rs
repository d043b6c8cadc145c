//! Step-by-step check that credentials, storage and Vertex AI are reachable.

use super::auth::{StaticToken, TokenProvider};
use super::storage::GcsClient;
use super::vertex::VertexClient;
use super::GcpSettings;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    /// Non-fatal; listing can fail on a fresh project.
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyStep {
    pub outcome: CheckOutcome,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub project_id: String,
    pub steps: Vec<VerifyStep>,
}

impl VerifyReport {
    fn new(project_id: &str) -> Self {
        Self { project_id: project_id.to_string(), steps: Vec::new() }
    }

    fn push(&mut self, outcome: CheckOutcome, message: String) {
        match outcome {
            CheckOutcome::Ok => info!("{message}"),
            CheckOutcome::Warn => warn!("{message}"),
            CheckOutcome::Fail => error!("{message}"),
        }
        self.steps.push(VerifyStep { outcome, message });
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.steps.iter().all(|s| s.outcome != CheckOutcome::Fail)
    }
}

pub async fn verify_setup(settings: &GcpSettings, tokens: &dyn TokenProvider) -> VerifyReport {
    let mut report = VerifyReport::new(&settings.project_id);

    let token = match tokens.access_token().await {
        Ok(token) => {
            report.push(CheckOutcome::Ok, "Access token acquired".to_string());
            token
        }
        Err(e) => {
            report.push(CheckOutcome::Fail, format!("Setup issue: {e}"));
            return report;
        }
    };
    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticToken(token));

    let clients = GcsClient::new(settings, tokens.clone())
        .and_then(|storage| Ok((storage, VertexClient::new(settings, tokens.clone())?)));
    let (storage, vertex) = match clients {
        Ok(clients) => {
            report.push(
                CheckOutcome::Ok,
                format!("Vertex AI initialization successful ({}, {})", settings.project_id, settings.location),
            );
            clients
        }
        Err(e) => {
            report.push(CheckOutcome::Fail, format!("Setup issue: {e}"));
            return report;
        }
    };

    if settings.bucket_name.is_empty() {
        report.push(CheckOutcome::Warn, "No bucket configured, skipping Cloud Storage check".to_string());
    } else {
        match storage.bucket_metadata().await {
            Ok(meta) => report.push(CheckOutcome::Ok, format!("Cloud Storage access confirmed for bucket {}", meta.name)),
            Err(e) => report.push(CheckOutcome::Fail, format!("Cloud Storage access failed: {e}")),
        }
    }

    match vertex.list_datasets().await {
        Ok(datasets) => {
            report.push(CheckOutcome::Ok, format!("Dataset listing successful - found {} datasets", datasets.len()));
        }
        Err(e) => report.push(
            CheckOutcome::Warn,
            format!("Dataset listing failed (this might be normal if no datasets exist): {e}"),
        ),
    }

    match vertex.list_models().await {
        Ok(models) => report.push(CheckOutcome::Ok, format!("Model listing successful - found {} models", models.len())),
        Err(e) => report.push(CheckOutcome::Warn, format!("Model listing failed: {e}")),
    }

    if report.is_ok() {
        report.push(CheckOutcome::Ok, format!("Setup verification complete for project: {}", settings.project_id));
    }
    report
}
