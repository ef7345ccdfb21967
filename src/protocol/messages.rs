//! Protocol message definitions
//!
//! Inbound frames are decoded into a closed set of variants with an
//! explicit `Other` arm; unknown shapes are never an error.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Key carrying the correlation id on the wire
pub const MESSAGE_ID_KEY: &str = "messageId";

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────

/// Control messages recognised by the client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    TokenRefreshRequired,
    TokenRefreshSuccess {
        #[serde(default)]
        new_version: Option<Value>,
    },
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Heartbeat acknowledgment
    Pong { timestamp: Option<i64> },

    /// Server wants a fresh credential on this channel
    TokenRefreshRequired,

    /// Server accepted the refreshed credential
    TokenRefreshSuccess { new_version: Option<Value> },

    /// Frame carrying a correlation id
    Reply { message_id: String, payload: Value },

    /// Anything else, forwarded verbatim
    Other(Value),
}

impl InboundMessage {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| Error::ProtocolMalformed {
            message: format!("invalid JSON frame: {}", e),
        })?;
        Ok(Self::from_value(value))
    }

    /// Decode an already-parsed JSON value
    pub fn from_value(value: Value) -> Self {
        if value.get("type").map_or(false, Value::is_string) {
            if let Ok(control) = ControlMessage::deserialize(&value) {
                return match control {
                    ControlMessage::Pong { timestamp } => InboundMessage::Pong { timestamp },
                    ControlMessage::TokenRefreshRequired => InboundMessage::TokenRefreshRequired,
                    ControlMessage::TokenRefreshSuccess { new_version } => {
                        InboundMessage::TokenRefreshSuccess { new_version }
                    }
                };
            }
        }

        match value.get(MESSAGE_ID_KEY).and_then(Value::as_str) {
            Some(id) => InboundMessage::Reply {
                message_id: id.to_string(),
                payload: value,
            },
            None => InboundMessage::Other(value),
        }
    }

    /// Get the message type name
    pub fn type_name(&self) -> &'static str {
        match self {
            InboundMessage::Pong { .. } => "pong",
            InboundMessage::TokenRefreshRequired => "token_refresh_required",
            InboundMessage::TokenRefreshSuccess { .. } => "token_refresh_success",
            InboundMessage::Reply { .. } => "reply",
            InboundMessage::Other(_) => "other",
        }
    }
}

/// Whether a correlated reply is tagged as an error
pub fn is_error_reply(payload: &Value) -> bool {
    payload.get("type").and_then(Value::as_str) == Some("error")
}

/// Human-readable text of an error reply
pub fn error_text(payload: &Value) -> String {
    payload
        .get("message")
        .or_else(|| payload.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("remote error")
        .to_string()
}

// ─────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────

/// Application payload augmented with correlation metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub message_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl OutboundEnvelope {
    /// Wrap a payload. Non-object payloads are nested under `payload`.
    pub fn new(message_id: impl Into<String>, payload: Value) -> Self {
        let mut body = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        body.remove(MESSAGE_ID_KEY);
        body.remove("timestamp");

        Self {
            message_id: message_id.into(),
            timestamp: now_millis(),
            body,
        }
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client-originated control frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Liveness probe
    Ping { timestamp: i64 },

    /// Fresh credential pushed over an open channel
    TokenRefresh { token: String },
}

impl ControlFrame {
    /// Build a liveness probe stamped with the current time
    pub fn ping() -> Self {
        ControlFrame::Ping {
            timestamp: now_millis(),
        }
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"pong","timestamp":12}"#).unwrap(),
            InboundMessage::Pong { timestamp: Some(12) }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"token_refresh_required"}"#).unwrap(),
            InboundMessage::TokenRefreshRequired
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"token_refresh_success","new_version":3}"#).unwrap(),
            InboundMessage::TokenRefreshSuccess { new_version: Some(json!(3)) }
        );
    }

    #[test]
    fn test_parse_reply() {
        let msg = InboundMessage::parse(r#"{"messageId":"m-1","type":"ack","text":"hi"}"#).unwrap();
        match msg {
            InboundMessage::Reply { message_id, payload } => {
                assert_eq!(message_id, "m-1");
                assert_eq!(payload["text"], "hi");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_shapes_are_forwarded() {
        let msg = InboundMessage::parse(r#"{"type":"chat_message","body":"yo"}"#).unwrap();
        assert_eq!(msg.type_name(), "other");

        let msg = InboundMessage::parse("[1,2,3]").unwrap();
        assert_eq!(msg, InboundMessage::Other(json!([1, 2, 3])));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = InboundMessage::parse("not json").unwrap_err();
        assert!(matches!(err, Error::ProtocolMalformed { .. }));
    }

    #[test]
    fn test_error_reply_detection() {
        let payload = json!({"messageId": "m", "type": "error", "message": "denied"});
        assert!(is_error_reply(&payload));
        assert_eq!(error_text(&payload), "denied");
        assert!(!is_error_reply(&json!({"type": "ack"})));
    }

    #[test]
    fn test_envelope_augments_payload() {
        let envelope = OutboundEnvelope::new("m-7", json!({"type": "chat", "text": "hello"}));
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["messageId"], "m-7");
        assert_eq!(value["type"], "chat");
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn test_envelope_overrides_caller_message_id() {
        let envelope = OutboundEnvelope::new("m-8", json!({"messageId": "spoofed"}));
        let json = envelope.to_json().unwrap();
        assert!(json.contains("m-8"));
        assert!(!json.contains("spoofed"));
    }

    #[test]
    fn test_envelope_wraps_scalars() {
        let envelope = OutboundEnvelope::new("m-9", json!("plain"));
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["payload"], "plain");
    }

    #[test]
    fn test_ping_frame() {
        let value: Value = serde_json::from_str(&ControlFrame::ping().to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "ping");
        assert!(value["timestamp"].is_i64());
    }
}
