//! Read-only Vertex AI listing, used to verify project access.

use super::auth::TokenProvider;
use super::{check_response, GcpSettings};
use crate::error::{CoreError, CoreResult};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VertexResource {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub create_time: Option<String>,
}

pub struct VertexClient {
    client: Client,
    endpoint: String,
    parent: String,
    tokens: Arc<dyn TokenProvider>,
}

impl VertexClient {
    pub fn new(settings: &GcpSettings, tokens: Arc<dyn TokenProvider>) -> CoreResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            endpoint: settings.endpoints.vertex.clone(),
            parent: format!("projects/{}/locations/{}", settings.project_id, settings.location),
            tokens,
        })
    }

    pub async fn list_models(&self) -> CoreResult<Vec<VertexResource>> {
        self.list("models").await
    }

    pub async fn list_datasets(&self) -> CoreResult<Vec<VertexResource>> {
        self.list("datasets").await
    }

    /// Follow `nextPageToken` until the collection is exhausted.
    async fn list(&self, collection: &str) -> CoreResult<Vec<VertexResource>> {
        let url = format!("{}/v1/{}/{}", self.endpoint, self.parent, collection);
        let token = self.tokens.access_token().await?;
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).bearer_auth(&token);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }
            let response = request.send().await.map_err(|e| {
                error!(error = %e, url = %url, "failed to reach Vertex AI");
                CoreError::Http(e)
            })?;
            let body: Value = check_response(response, "Vertex AI listing").await?.json().await?;

            if let Some(page) = body.get(collection) {
                let page: Vec<VertexResource> = serde_json::from_value(page.clone())?;
                items.extend(page);
            }
            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        debug!(collection, count = items.len(), "listed Vertex AI resources");
        Ok(items)
    }
}
