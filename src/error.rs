//! Error types for chatlink
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Classification used by the reconnection policy
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for chatlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,
    InvalidEndpoint = 110,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionClosed = 302,
    LivenessTimeout = 303,
    Degraded = 304,

    // Protocol and auth errors (4xx)
    ProtocolMalformed = 401,
    AuthUnavailable = 402,
    AuthRejected = 403,
    PolicyViolation = 408,

    // Messaging errors (5xx)
    MessageTimeout = 500,
    RemoteError = 501,
    FallbackUnavailable = 502,

    // Internal errors (9xx)
    InternalError = 900,
    Destroyed = 901,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Connection errors
            400..=499 => 40, // Protocol errors
            500..=599 => 50, // Messaging errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for chatlink
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Endpoint address could not be built or failed validation
    #[error("Invalid endpoint {address}: {reason}")]
    InvalidEndpoint { address: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Physical connection attempt failed
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Channel open did not complete in time
    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Channel closed by the remote end or the transport
    #[error("Connection closed (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Heartbeat detected a silent connection
    #[error("Liveness probe failed: {pending_probes} unanswered, silent for {silent_ms}ms")]
    LivenessTimeout { pending_probes: u32, silent_ms: u64 },

    /// Reconnection attempts exhausted; fallback transport engaged
    #[error("Realtime connection unavailable after {attempts} attempts, switched to fallback")]
    Degraded { attempts: u32 },

    // ─────────────────────────────────────────────────────────────
    // Protocol and Auth Errors
    // ─────────────────────────────────────────────────────────────

    /// Malformed wire message
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// No credential could be obtained
    #[error("Authentication unavailable: {message}")]
    AuthUnavailable { message: String },

    /// Server rejected the credential
    #[error("Authentication rejected: {message}")]
    AuthRejected { message: String },

    /// Server closed the channel for a policy violation
    #[error("Connection refused by server policy: {reason}")]
    PolicyViolation { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Messaging Errors
    // ─────────────────────────────────────────────────────────────

    /// No response for a correlated message
    #[error("Message {message_id} timed out after {timeout_ms}ms")]
    Timeout { message_id: String, timeout_ms: u64 },

    /// Remote end answered with an error
    #[error("Remote error for message {message_id}: {message}")]
    RemoteError { message_id: String, message: String },

    /// Request/response fallback failed
    #[error("Fallback transport unavailable: {message}")]
    FallbackUnavailable { message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Client was destroyed
    #[error("Connection manager has been destroyed")]
    Destroyed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::InvalidEndpoint { .. } => ErrorCode::InvalidEndpoint,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::ProtocolMalformed,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionClosed { .. } => ErrorCode::ConnectionClosed,
            Error::LivenessTimeout { .. } => ErrorCode::LivenessTimeout,
            Error::Degraded { .. } => ErrorCode::Degraded,

            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::AuthUnavailable { .. } => ErrorCode::AuthUnavailable,
            Error::AuthRejected { .. } => ErrorCode::AuthRejected,
            Error::PolicyViolation { .. } => ErrorCode::PolicyViolation,

            Error::Timeout { .. } => ErrorCode::MessageTimeout,
            Error::RemoteError { .. } => ErrorCode::RemoteError,
            Error::FallbackUnavailable { .. } => ErrorCode::FallbackUnavailable,

            Error::Destroyed => ErrorCode::Destroyed,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if a connection-level error may be recovered by reconnecting
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ConnectionClosed { .. }
                | Error::LivenessTimeout { .. }
                | Error::AuthRejected { .. }
                | Error::Io(_)
        )
    }

    /// Check if the error must never be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::InvalidEndpoint { .. }
                | Error::AuthUnavailable { .. }
                | Error::PolicyViolation { .. }
                | Error::Destroyed
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'chatlink config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'chatlink config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::InvalidEndpoint { .. } => Some(
                "Check 'endpoint.origin' and 'endpoint.host'. Credentials must not appear in the host."
            ),

            Error::ConnectionFailed { .. } => Some(
                "Check your network connection and verify the chat server address."
            ),
            Error::ConnectionTimeout { .. } => Some(
                "The chat server may be down or unreachable. Check your firewall settings."
            ),
            Error::LivenessTimeout { .. } => Some(
                "The connection went silent. The client will reconnect automatically."
            ),
            Error::Degraded { .. } => Some(
                "Messages are being delivered over HTTP. Reconnect later to restore realtime delivery."
            ),

            Error::AuthUnavailable { .. } | Error::AuthRejected { .. } => Some(
                "Your session may have expired. Sign in again or update 'auth.token'."
            ),
            Error::PolicyViolation { .. } => Some(
                "The server refused realtime access for this session. Messages will use the fallback transport."
            ),

            Error::FallbackUnavailable { .. } => Some(
                "The HTTP fallback could not deliver the message. Check 'fallback.base_url'."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid endpoint error
    pub fn invalid_endpoint(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidEndpoint {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a connection closed error
    pub fn connection_closed(code: u16, reason: impl Into<String>) -> Self {
        Error::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Create an auth unavailable error
    pub fn auth_unavailable(message: impl Into<String>) -> Self {
        Error::AuthUnavailable {
            message: message.into(),
        }
    }

    /// Create a fallback unavailable error
    pub fn fallback_unavailable(message: impl Into<String>) -> Self {
        Error::FallbackUnavailable {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
