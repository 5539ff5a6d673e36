use super::config::RemoteConfig;
use super::types::{ErrorBody, RemoteStatus};
use async_trait::async_trait;
use serde_json::Value;
use skirmish::{InteractionApi, Result, SyncError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// HTTP client for the interaction mutation endpoint
pub struct HttpInteractionClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
    last_success: Arc<AtomicU64>, // Unix timestamp in seconds
}

impl HttpInteractionClient {
    pub fn new(config: &RemoteConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.api_url.clone(),
            token: config.api_token.clone(),
            timeout,
            http_client,
            last_success: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn last_success_timestamp(&self) -> u64 {
        self.last_success.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> RemoteStatus {
        RemoteStatus {
            api_url: self.base_url.clone(),
            authenticated: self.token.is_some(),
            last_success: self.last_success_timestamp(),
        }
    }

    /// `{base}/api/interactions/{id}`, with the id percent-encoded as a path segment
    pub fn interaction_url(&self, interaction_id: &str) -> Result<reqwest::Url> {
        if interaction_id.is_empty() {
            return Err(SyncError::Validation("interaction id is required".into()));
        }
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SyncError::Config(format!("invalid API url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("API url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "interactions", interaction_id]);
        Ok(url)
    }

    fn transport_error(&self, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout {
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if e.is_connect() {
            SyncError::Network(format!("connection to {} failed: {}", self.base_url, e))
        } else {
            SyncError::Network(format!("request to {} failed: {}", self.base_url, e))
        }
    }

    fn record_success(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_success.store(now, Ordering::Relaxed);
    }
}

#[async_trait]
impl InteractionApi for HttpInteractionClient {
    async fn update_interaction(&self, interaction_id: &str, patch: &Value) -> Result<()> {
        let url = self.interaction_url(interaction_id)?;

        let mut request = self.http_client.patch(url).json(patch);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = ErrorBody::message_from(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            tracing::warn!(
                "[REMOTE {}] update rejected with {}: {}",
                interaction_id,
                status,
                message
            );
            return Err(SyncError::from_status(status, message));
        }

        self.record_success();
        tracing::debug!("[REMOTE {}] update accepted ({})", interaction_id, status);
        Ok(())
    }
}
