//! Request/response fallback transport
//!
//! Used whenever the realtime channel is not `Connected` or the session has
//! switched to fallback mode. Failures are terminal for the call; retrying is
//! the caller's decision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::AuthTokenProvider;
use crate::error::{Error, Result};

/// Delivers one message outside the realtime channel
#[async_trait]
pub trait FallbackTransport: Send + Sync {
    async fn send(&self, channel_id: &str, payload: Value) -> Result<Value>;
}

// ─────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────

/// POSTs messages to `{base_url}/channels/{channel}/messages`
pub struct HttpFallback {
    base_url: String,
    client: Client,
    auth: Arc<AuthTokenProvider>,
}

impl HttpFallback {
    pub fn new(base_url: impl Into<String>, auth: Arc<AuthTokenProvider>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %base_url, "HTTP fallback transport created");

        Ok(Self {
            base_url,
            client,
            auth,
        })
    }

    fn message_url(&self, channel_id: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| Error::fallback_unavailable(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::fallback_unavailable("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(["channels", channel_id, "messages"]);
        Ok(url)
    }
}

#[async_trait]
impl FallbackTransport for HttpFallback {
    async fn send(&self, channel_id: &str, payload: Value) -> Result<Value> {
        let url = self.message_url(channel_id)?;
        let credential = self
            .auth
            .get_valid_credential()
            .await
            .map_err(|e| Error::fallback_unavailable(e.to_string()))?;

        debug!(channel_id = %channel_id, "Sending message over HTTP fallback");

        let response = self
            .client
            .post(url)
            .bearer_auth(credential.token())
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::fallback_unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, channel_id = %channel_id, "Fallback request rejected: {}", body);
            return Err(Error::fallback_unavailable(format!("server returned {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::fallback_unavailable(format!("failed to read response: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::fallback_unavailable(format!("invalid response body: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Disabled
// ─────────────────────────────────────────────────────────────────

/// Fallback that always refuses
pub struct DisabledFallback;

#[async_trait]
impl FallbackTransport for DisabledFallback {
    async fn send(&self, _channel_id: &str, _payload: Value) -> Result<Value> {
        Err(Error::fallback_unavailable("fallback transport is disabled"))
    }
}
