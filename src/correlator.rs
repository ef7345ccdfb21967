//! Request/response correlation over the realtime channel
//!
//! Every correlated send carries a fresh `messageId`. Replies carrying the
//! same id complete the caller; timeouts and channel teardown reject it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::Outbound;
use crate::error::{Error, Result};
use crate::protocol::{error_text, is_error_reply, OutboundEnvelope, CLOSE_ABNORMAL};

/// Correlator configuration
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// How long a sent message waits for its reply
    pub response_timeout: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
        }
    }
}

/// An outstanding correlated message
pub struct PendingMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    reply: oneshot::Sender<Result<Value>>,
    timeout: JoinHandle<()>,
}

impl PendingMessage {
    fn settle(self, outcome: Result<Value>) {
        self.timeout.abort();
        let _ = self.reply.send(outcome);
    }
}

/// A registered message waiting to be written
pub struct Outstanding {
    pub id: String,
    frame: String,
    reply: oneshot::Receiver<Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingMessage>>>;

/// Tracks in-flight request/response pairs
pub struct MessageCorrelator {
    config: CorrelatorConfig,
    pending: PendingMap,
}

impl MessageCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send a payload and wait for the matching reply
    pub async fn send(&self, payload: Value, writer: &mpsc::Sender<Outbound>) -> Result<Value> {
        let outstanding = self.register(payload)?;
        self.deliver(outstanding, writer).await
    }

    /// Enter a payload into the pending map without writing it.
    ///
    /// Callers that hold the link lock register here so a concurrent
    /// `reject_all` either sees the entry or runs before the writer was
    /// handed out.
    pub fn register(&self, payload: Value) -> Result<Outstanding> {
        let id = Uuid::new_v4().to_string();
        let frame = OutboundEnvelope::new(id.clone(), payload).to_json()?;
        let (tx, rx) = oneshot::channel();

        let mut map = self.pending.lock();
        let timeout = self.spawn_timeout(id.clone());
        map.insert(
            id.clone(),
            PendingMessage {
                id: id.clone(),
                created_at: Utc::now(),
                reply: tx,
                timeout,
            },
        );

        Ok(Outstanding { id, frame, reply: rx })
    }

    /// Write a registered message and wait for its reply
    pub async fn deliver(&self, outstanding: Outstanding, writer: &mpsc::Sender<Outbound>) -> Result<Value> {
        let Outstanding { id, frame, reply } = outstanding;

        if writer.send(Outbound::Text(frame)).await.is_err() {
            if let Some(entry) = self.pending.lock().remove(&id) {
                entry.timeout.abort();
            }
            return Err(Error::connection_closed(CLOSE_ABNORMAL, "channel writer closed"));
        }
        debug!(message_id = %id, "Correlated message sent");

        reply
            .await
            .unwrap_or_else(|_| Err(Error::connection_closed(CLOSE_ABNORMAL, "reply dropped")))
    }

    fn spawn_timeout(&self, id: String) -> JoinHandle<()> {
        let pending = self.pending.clone();
        let timeout = self.config.response_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = pending.lock().remove(&id);
            if let Some(entry) = entry {
                warn!(message_id = %id, "Message timed out waiting for reply");
                let _ = entry.reply.send(Err(Error::Timeout {
                    message_id: id,
                    timeout_ms: timeout.as_millis() as u64,
                }));
            }
        })
    }

    /// Complete a pending message. Returns `false` if the id is not pending.
    pub fn resolve(&self, message_id: &str, payload: Value) -> bool {
        let Some(entry) = self.pending.lock().remove(message_id) else {
            return false;
        };

        let outcome = if is_error_reply(&payload) {
            Err(Error::RemoteError {
                message_id: message_id.to_string(),
                message: error_text(&payload),
            })
        } else {
            Ok(payload)
        };
        entry.settle(outcome);
        true
    }

    /// Reject every pending message; used whenever the channel goes away
    pub fn reject_all(&self, code: u16, reason: &str) -> usize {
        let drained: Vec<PendingMessage> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for entry in drained {
            entry.settle(Err(Error::connection_closed(code, reason)));
        }
        if count > 0 {
            debug!(count, reason, "Rejected pending messages");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.lock().contains_key(message_id)
    }
}

impl Drop for MessageCorrelator {
    fn drop(&mut self) {
        self.reject_all(CLOSE_ABNORMAL, "correlator dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn correlator(timeout: Duration) -> Arc<MessageCorrelator> {
        Arc::new(MessageCorrelator::new(CorrelatorConfig {
            response_timeout: timeout,
        }))
    }

    async fn sent_id(rx: &mut mpsc::Receiver<Outbound>) -> (String, Value) {
        match rx.recv().await {
            Some(Outbound::Text(text)) => {
                let v: Value = serde_json::from_str(&text).unwrap();
                (v["messageId"].as_str().unwrap().to_string(), v)
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_round_trip_resolves_with_payload() {
        let c = correlator(Duration::from_secs(30));
        let (writer, mut rx) = mpsc::channel(8);

        let task = {
            let c = c.clone();
            tokio::spawn(async move { c.send(json!({"type": "chat", "text": "hi"}), &writer).await })
        };

        let (id, frame) = sent_id(&mut rx).await;
        assert_eq!(frame["text"], "hi");
        assert!(frame["timestamp"].is_i64());
        assert!(c.is_pending(&id));

        let reply = json!({"messageId": id, "type": "chat_ack", "ok": true});
        assert!(c.resolve(&id, reply.clone()));

        assert_eq!(task.await.unwrap().unwrap(), reply);
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_rejects() {
        let c = correlator(Duration::from_secs(30));
        let (writer, mut rx) = mpsc::channel(8);

        let task = {
            let c = c.clone();
            tokio::spawn(async move { c.send(json!({"q": 1}), &writer).await })
        };

        let (id, _) = sent_id(&mut rx).await;
        c.resolve(&id, json!({"messageId": id, "type": "error", "message": "nope"}));

        match task.await.unwrap() {
            Err(Error::RemoteError { message, .. }) => assert_eq!(message, "nope"),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let c = correlator(Duration::from_secs(30));
        let (writer, mut rx) = mpsc::channel(8);

        let task = {
            let c = c.clone();
            tokio::spawn(async move { c.send(json!({"q": 1}), &writer).await })
        };
        let (id, _) = sent_id(&mut rx).await;

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, Err(Error::Timeout { ref message_id, .. }) if *message_id == id));
        assert!(!c.is_pending(&id));
        assert!(!c.resolve(&id, json!({})));
    }

    #[tokio::test]
    async fn test_reject_all_empties_map() {
        let c = correlator(Duration::from_secs(30));
        let (writer, mut rx) = mpsc::channel(8);

        let mut tasks = Vec::new();
        for i in 0..3 {
            let c = c.clone();
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move { c.send(json!({ "n": i }), &writer).await }));
        }
        for _ in 0..3 {
            sent_id(&mut rx).await;
        }

        assert_eq!(c.reject_all(1006, "gone"), 3);
        assert_eq!(c.pending_count(), 0);
        for t in tasks {
            assert!(matches!(t.await.unwrap(), Err(Error::ConnectionClosed { code: 1006, .. })));
        }
    }

    #[tokio::test]
    async fn test_registered_entry_rejected_before_write() {
        let c = correlator(Duration::from_secs(30));
        let (writer, mut rx) = mpsc::channel(8);

        let outstanding = c.register(json!({"q": 1})).unwrap();
        let id = outstanding.id.clone();
        assert!(c.is_pending(&id));

        // Teardown lands between registration and the write
        assert_eq!(c.reject_all(1006, "gone"), 1);

        let outcome = c.deliver(outstanding, &writer).await;
        assert!(matches!(outcome, Err(Error::ConnectionClosed { code: 1006, .. })));
        assert!(matches!(rx.recv().await, Some(Outbound::Text(_))));
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_writer_fails_fast() {
        let c = correlator(Duration::from_secs(30));
        let (writer, rx) = mpsc::channel(1);
        drop(rx);

        let err = c.send(json!({"q": 1}), &writer).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed { .. }));
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let c = correlator(Duration::from_secs(30));
        let (writer, mut rx) = mpsc::channel(16);

        for i in 0..10 {
            let c = c.clone();
            let writer = writer.clone();
            tokio::spawn(async move { c.send(json!({ "n": i }), &writer).await });
        }

        let mut ids = std::collections::HashSet::new();
        for _ in 0..10 {
            ids.insert(sent_id(&mut rx).await.0);
        }
        assert_eq!(ids.len(), 10);
        c.reject_all(1000, "done");
    }

    #[test]
    fn test_unknown_id_not_resolved() {
        let c = MessageCorrelator::new(CorrelatorConfig::default());
        assert!(!c.resolve("missing", json!({})));
    }
}
