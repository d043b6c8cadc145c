//! Google Cloud Storage and Vertex AI over their REST APIs.

pub mod auth;
pub mod storage;
pub mod trainer;
pub mod verify;
pub mod vertex;

pub use auth::{GcloudTokenProvider, StaticToken, TokenProvider};
pub use storage::{GcsClient, ObjectStore};
pub use trainer::{CloudTrainOutcome, CloudTrainParams, GcpTrainer};
pub use verify::{verify_setup, CheckOutcome, VerifyReport, VerifyStep};
pub use vertex::VertexClient;

use crate::config::{SitetuneConfig, DEFAULT_LOCATION};
use crate::error::{CoreError, CoreResult};
use reqwest::Response;
use tracing::error;

pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Base URLs of the services; tests point these at a local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub storage: String,
    pub vertex: String,
}

impl Endpoints {
    #[must_use]
    pub fn for_location(location: &str) -> Self {
        Self {
            storage: DEFAULT_STORAGE_ENDPOINT.to_string(),
            vertex: format!("https://{location}-aiplatform.googleapis.com"),
        }
    }

    /// Send every request to `base`.
    #[must_use]
    pub fn local(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self { storage: base.clone(), vertex: base }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpSettings {
    pub project_id: String,
    pub bucket_name: String,
    pub location: String,
    pub endpoints: Endpoints,
}

impl GcpSettings {
    #[must_use]
    pub fn new(project_id: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            bucket_name: bucket_name.into(),
            location: DEFAULT_LOCATION.to_string(),
            endpoints: Endpoints::for_location(DEFAULT_LOCATION),
        }
    }

    /// Project and bucket are required; location defaults to `us-central1`.
    pub fn resolve(config: &SitetuneConfig) -> CoreResult<Self> {
        let present = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        let (Some(project_id), Some(bucket_name)) = (present(&config.gcp.project_id), present(&config.gcp.bucket_name))
        else {
            return Err(CoreError::MissingGcpSettings);
        };
        let location = config.location();
        Ok(Self { project_id, bucket_name, endpoints: Endpoints::for_location(&location), location })
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

/// Turn a non-success response into `CoreError::CloudApi`.
pub(crate) async fn check_response(response: Response, what: &str) -> CoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let error_text = response
        .text()
        .await
        .ok()
        .filter(|text| !text.trim().is_empty())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string());
    error!(status = %status, error = %error_text, url = %url, "{what} failed");
    Err(CoreError::CloudApi { status: status.as_u16(), message: error_text })
}
