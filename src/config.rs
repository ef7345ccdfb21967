//! Configuration system for chatlink
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (CHATLINK_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::connection::ConnectionConfig;
use crate::correlator::CorrelatorConfig;
use crate::endpoint::EndpointConfig;
use crate::error::{Error, Result};
use crate::heartbeat::HeartbeatConfig;
use crate::reconnect::RetryConfig;

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Where the chat backend lives
    pub endpoint: EndpointSettings,

    /// Credential sources
    pub auth: AuthSettings,

    /// Reconnection policy
    pub reconnect: ReconnectSettings,

    /// Liveness probing
    pub heartbeat: HeartbeatSettings,

    /// Correlated message settings
    pub messages: MessageSettings,

    /// Request/response fallback transport
    pub fallback: FallbackSettings,

    /// Durable client-side state
    pub storage: StorageSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Origin the client is served from; its scheme decides ws vs wss
    pub origin: String,

    /// Realtime host override (host[:port]); defaults to the origin host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Path prefix for realtime routes
    pub path_prefix: String,
}

/// Credential settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Static access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Token refresh endpoint (POST)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_url: Option<String>,

    /// Full verification endpoint (GET)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_url: Option<String>,
}

/// Reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Failures tolerated before switching to fallback
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,

    /// Extra random share added on top of the exponential delay (0.0-1.0)
    pub jitter_factor: f64,

    /// Channel open timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Probe interval in milliseconds
    pub interval_ms: u64,

    /// Unanswered probes tolerated before the connection is declared dead
    pub max_pending_probes: u32,
}

/// Correlated message settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    /// Per-message response timeout in milliseconds
    pub response_timeout_ms: u64,
}

/// Fallback transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Enable the HTTP fallback
    pub enabled: bool,

    /// HTTP API base URL; defaults to `{origin}/api`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Storage path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding persisted client state
    pub state_dir: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            origin: "https://chat.example.com".to_string(),
            host: None,
            path_prefix: "/ws".to_string(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_factor: 0.5,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_pending_probes: 3,
        }
    }
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: 30_000,
        }
    }
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            timeout_secs: 30,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_dir: "~/.chatlink".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl LinkConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = Self::from_toml(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            PathBuf::from("chatlink.toml"),
            dirs::config_dir()
                .map(|p| p.join("chatlink").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".chatlink").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Endpoint settings
        if let Ok(val) = std::env::var("CHATLINK_ORIGIN") {
            self.endpoint.origin = val;
        }
        if let Ok(val) = std::env::var("CHATLINK_HOST") {
            self.endpoint.host = Some(val);
        }

        // Auth settings
        if let Ok(val) = std::env::var("CHATLINK_TOKEN") {
            self.auth.token = Some(val);
        }
        if let Ok(val) = std::env::var("CHATLINK_REFRESH_URL") {
            self.auth.refresh_url = Some(val);
        }
        if let Ok(val) = std::env::var("CHATLINK_VERIFY_URL") {
            self.auth.verify_url = Some(val);
        }

        // Reconnect settings
        if let Ok(val) = std::env::var("CHATLINK_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.reconnect.max_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("CHATLINK_BASE_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.reconnect.base_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CHATLINK_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.reconnect.connect_timeout_ms = n;
            }
        }

        // Heartbeat settings
        if let Ok(val) = std::env::var("CHATLINK_HEARTBEAT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.heartbeat.interval_ms = n;
            }
        }

        // Message settings
        if let Ok(val) = std::env::var("CHATLINK_RESPONSE_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.messages.response_timeout_ms = n;
            }
        }

        // Fallback settings
        if let Ok(val) = std::env::var("CHATLINK_FALLBACK_ENABLED") {
            self.fallback.enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("CHATLINK_FALLBACK_URL") {
            self.fallback.base_url = Some(val);
        }

        // Storage settings
        if let Ok(val) = std::env::var("CHATLINK_STATE_DIR") {
            self.storage.state_dir = val;
        }

        // Logging settings
        if let Ok(val) = std::env::var("CHATLINK_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CHATLINK_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("CHATLINK_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.storage.state_dir = expand_path(&self.storage.state_dir);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let origin = Url::parse(&self.endpoint.origin).map_err(|e| {
            Error::config_field_invalid("endpoint.origin", format!("not a URL: {}", e))
        })?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(Error::config_field_invalid(
                "endpoint.origin",
                "origin must start with http:// or https://",
            ));
        }
        if origin.host_str().is_none() && self.endpoint.host.is_none() {
            return Err(Error::config_field_invalid(
                "endpoint.origin",
                "origin has no host and no endpoint.host override is set",
            ));
        }
        if !self.endpoint.path_prefix.is_empty() && !self.endpoint.path_prefix.starts_with('/') {
            return Err(Error::config_field_invalid(
                "endpoint.path_prefix",
                "path prefix must start with '/'",
            ));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(Error::config_field_invalid(
                "reconnect.max_attempts",
                "max_attempts must be at least 1",
            ));
        }
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(Error::config_field_invalid(
                "reconnect.base_delay_ms",
                "base_delay_ms must be positive and not above max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(Error::config_field_invalid(
                "reconnect.jitter_factor",
                "jitter_factor must be between 0.0 and 1.0",
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "heartbeat.interval_ms",
                "heartbeat interval must be positive",
            ));
        }
        if self.messages.response_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "messages.response_timeout_ms",
                "response timeout must be positive",
            ));
        }

        if let Some(ref base) = self.fallback.base_url {
            Url::parse(base).map_err(|e| {
                Error::config_field_invalid("fallback.base_url", format!("not a URL: {}", e))
            })?;
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Endpoint resolver configuration
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            origin: self.endpoint.origin.clone(),
            host: self.endpoint.host.clone(),
            path_prefix: self.endpoint.path_prefix.clone(),
        }
    }

    /// Connection manager configuration
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.reconnect.connect_timeout_ms),
            retry: RetryConfig {
                max_attempts: self.reconnect.max_attempts,
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                jitter_factor: self.reconnect.jitter_factor,
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_millis(self.heartbeat.interval_ms),
                max_pending_probes: self.heartbeat.max_pending_probes,
            },
            correlator: CorrelatorConfig {
                response_timeout: Duration::from_millis(self.messages.response_timeout_ms),
            },
        }
    }

    /// Base URL for the HTTP fallback transport
    pub fn fallback_base_url(&self) -> String {
        self.fallback.base_url.clone().unwrap_or_else(|| {
            format!("{}/api", self.endpoint.origin.trim_end_matches('/'))
        })
    }

    /// Directory holding persisted client state
    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.state_dir)
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chatlink")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# chatlink configuration

[endpoint]
# Origin the client is served from (https => wss, http => ws)
origin = "https://chat.example.com"

# Realtime host override, e.g. "rt.example.com:8443"
# host = "rt.example.com"

# Path prefix for realtime routes
path_prefix = "/ws"

[auth]
# Static access token (or set CHATLINK_TOKEN)
# token = "..."

# Token refresh endpoint (POST, returns {"token": "...", "expires_at": "..."})
# refresh_url = "https://chat.example.com/api/auth/refresh"

# Full verification endpoint (GET)
# verify_url = "https://chat.example.com/api/auth/verify"

[reconnect]
# Failures tolerated before switching to the HTTP fallback
max_attempts = 4

# Exponential backoff base and cap in milliseconds
base_delay_ms = 1000
max_delay_ms = 60000

# Random share added on top of each delay (0.0-1.0)
jitter_factor = 0.5

# Channel open timeout in milliseconds
connect_timeout_ms = 10000

[heartbeat]
# Probe interval in milliseconds
interval_ms = 30000

# Unanswered probes tolerated
max_pending_probes = 3

[messages]
# Per-message response timeout in milliseconds
response_timeout_ms = 30000

[fallback]
# Deliver messages over HTTP when the realtime channel is down
enabled = true

# HTTP API base URL (defaults to "{origin}/api")
# base_url = "https://chat.example.com/api"

# Request timeout in seconds
timeout_secs = 30

[storage]
# Directory for persisted client state (selected scope)
state_dir = "~/.chatlink"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.chatlink/logs/chatlink.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
