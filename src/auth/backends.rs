use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{AuthBackend, Credential};

// ─────────────────────────────────────────────────────────────────
// Static token
// ─────────────────────────────────────────────────────────────────

/// Fixed credential from configuration; cannot refresh
pub struct StaticAuth {
    credential: Option<Credential>,
}

impl StaticAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            credential: token.filter(|t| !t.is_empty()).map(Credential::new),
        }
    }
}

#[async_trait]
impl AuthBackend for StaticAuth {
    fn current_credential(&self) -> Option<Credential> {
        self.credential.clone()
    }

    async fn refresh(&self) -> Result<Option<Credential>> {
        Ok(None)
    }

    async fn verify(&self) -> Result<Option<Credential>> {
        Ok(self.credential.clone())
    }
}

// ─────────────────────────────────────────────────────────────────
// HTTP token service
// ─────────────────────────────────────────────────────────────────

/// Token service response for both refresh and verify
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Token service reached over HTTP.
///
/// `refresh_url` receives a POST, `verify_url` a GET; both carry the current
/// credential as a bearer token and answer with `{"token", "expires_at"}`.
pub struct HttpAuthBackend {
    client: Client,
    refresh_url: Option<String>,
    verify_url: Option<String>,
    current: RwLock<Option<Credential>>,
}

impl HttpAuthBackend {
    pub fn new(
        refresh_url: Option<String>,
        verify_url: Option<String>,
        initial_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            refresh_url,
            verify_url,
            current: RwLock::new(initial_token.filter(|t| !t.is_empty()).map(Credential::new)),
        })
    }

    async fn fetch(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Option<Credential>> {
        let request = match self.current.read().clone() {
            Some(c) => request.bearer_auth(c.token()),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::auth_unavailable(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = %status, what, "Token service rejected credential");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, what, "Token service error: {}", body);
            return Err(Error::auth_unavailable(format!("{} returned {}", what, status)));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::auth_unavailable(format!("{} response unreadable: {}", what, e)))?;

        let credential = match parsed.expires_at {
            Some(at) => Credential::expiring(parsed.token, at),
            None => Credential::new(parsed.token),
        };
        *self.current.write() = Some(credential.clone());
        Ok(Some(credential))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    fn current_credential(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    async fn refresh(&self) -> Result<Option<Credential>> {
        match self.refresh_url {
            Some(ref url) => self.fetch(self.client.post(url), "refresh").await,
            None => Ok(None),
        }
    }

    async fn verify(&self) -> Result<Option<Credential>> {
        match self.verify_url {
            Some(ref url) => self.fetch(self.client.get(url), "verify").await,
            None => Ok(self.current.read().clone()),
        }
    }
}
