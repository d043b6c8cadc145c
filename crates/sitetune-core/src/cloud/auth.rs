//! OAuth bearer tokens for the Google APIs.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

/// How long a token from the Cloud SDK is reused. SDK tokens live for an hour.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> CoreResult<String>;
}

/// A fixed token, e.g. one minted outside the process.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> CoreResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Reads `GCP_ACCESS_TOKEN`, otherwise asks the Cloud SDK for a token and
/// reuses it until `token_lifetime` has passed.
#[derive(Debug, Clone)]
pub struct GcloudTokenProvider {
    program: String,
    application_default: bool,
    env_token: Option<String>,
    token_lifetime: Duration,
    cache: Arc<Mutex<Option<CachedToken>>>,
}

impl GcloudTokenProvider {
    fn build(program: String, application_default: bool, env_token: Option<String>) -> Self {
        Self {
            program,
            application_default,
            env_token,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::build(
            "gcloud".to_string(),
            std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").is_some(),
            std::env::var("GCP_ACCESS_TOKEN").ok().filter(|t| !t.trim().is_empty()),
        )
    }

    /// Run `program` instead of `gcloud` and ignore the environment.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self::build(program.into(), false, None)
    }

    #[must_use]
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    fn args(&self) -> Vec<&'static str> {
        if self.application_default {
            vec!["auth", "application-default", "print-access-token"]
        } else {
            vec!["auth", "print-access-token"]
        }
    }
}

#[async_trait]
impl TokenProvider for GcloudTokenProvider {
    async fn access_token(&self) -> CoreResult<String> {
        if let Some(token) = &self.env_token {
            return Ok(token.trim().to_string());
        }

        // Held across the fetch so concurrent callers share one SDK call.
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|c| c.expires_at > Instant::now()) {
            return Ok(cached.token.clone());
        }

        let token = self.fetch_token().await?;
        *cache = Some(CachedToken { token: token.clone(), expires_at: Instant::now() + self.token_lifetime });
        Ok(token)
    }
}

impl GcloudTokenProvider {
    async fn fetch_token(&self) -> CoreResult<String> {
        let args = self.args();
        debug!(program = %self.program, ?args, "requesting access token");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| CoreError::Auth(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Auth(format!("{} exited with {}: {}", self.program, output.status, stderr.trim())));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(CoreError::Auth(format!("{} returned an empty access token", self.program)));
        }
        Ok(token)
    }
}
