use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Credentials expiring within this window are treated as expired
const EXPIRY_SKEW_SECS: i64 = 30;

/// A bearer token with an optional expiry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Credential without a known expiry
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Credential that expires at a fixed instant
    pub fn expiring(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credential is unusable now
    pub fn is_expired(&self) -> bool {
        if self.token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(at) => at <= Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }
}

// Tokens must never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
