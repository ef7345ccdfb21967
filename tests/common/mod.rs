//! Common test utilities and fixtures
//!
//! A scripted connector standing in for the socket, plus recording
//! collaborators for handler callbacks and fallback traffic.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use chatlink::connection::{
    ChannelHandle, ChannelPeer, ConnectionConfig, ConnectionHandler, ConnectionManager, ConnectionState,
    Connector, Inbound, Outbound,
};
use chatlink::correlator::CorrelatorConfig;
use chatlink::heartbeat::HeartbeatConfig;
use chatlink::reconnect::RetryConfig;
use chatlink::{AuthTokenProvider, Error, ErrorCode, FallbackTransport, Result, StaticAuth};

pub const TOKEN: &str = "tok-1";

// ─────────────────────────────────────────────────────────────────
// Scripted connector
// ─────────────────────────────────────────────────────────────────

/// What the next `open` call does
pub enum Outcome {
    Accept,
    Fail(Error),
}

impl Outcome {
    pub fn refused() -> Self {
        Outcome::Fail(Error::connection_failed("ws://test", "connection refused"))
    }
}

/// Connector that follows a script and hands accepted channels to the test
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    urls: Mutex<Vec<Url>>,
    peers: mpsc::UnboundedSender<ChannelPeer>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Outcome>) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            urls: Mutex::new(Vec::new()),
            peers: tx,
        });
        (connector, rx)
    }

    /// Append outcomes for later attempts
    pub fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn attempts(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().iter().map(|u| u.to_string()).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, url: &Url) -> Result<ChannelHandle> {
        self.urls.lock().push(url.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(Outcome::Accept) => {
                let (handle, peer) = ChannelHandle::pair(64);
                let _ = self.peers.send(peer);
                Ok(handle)
            }
            Some(Outcome::Fail(e)) => Err(e),
            None => Err(Error::connection_failed(url.as_str(), "script exhausted")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Recording collaborators
// ─────────────────────────────────────────────────────────────────

/// Handler that records every callback
#[derive(Default)]
pub struct RecordingHandler {
    transitions: Mutex<Vec<(ConnectionState, ConnectionState)>>,
    errors: Mutex<Vec<ErrorCode>>,
    messages: Mutex<Vec<Value>>,
    connects: Mutex<usize>,
    disconnects: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn transitions(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.transitions.lock().clone()
    }

    /// Target states in order
    pub fn states(&self) -> Vec<ConnectionState> {
        self.transitions.lock().iter().map(|(_, to)| *to).collect()
    }

    pub fn errors(&self) -> Vec<ErrorCode> {
        self.errors.lock().clone()
    }

    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().clone()
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().clone()
    }
}

impl ConnectionHandler for RecordingHandler {
    fn on_message(&self, message: Value) {
        self.messages.lock().push(message);
    }

    fn on_error(&self, error: &Error) {
        self.errors.lock().push(error.code());
    }

    fn on_connect(&self) {
        *self.connects.lock() += 1;
    }

    fn on_disconnect(&self, reason: &str) {
        self.disconnects.lock().push(reason.to_string());
    }

    fn on_state_change(&self, from: ConnectionState, to: ConnectionState) {
        self.transitions.lock().push((from, to));
    }
}

/// Fallback that records calls and answers with a fixed body
#[derive(Default)]
pub struct RecordingFallback {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingFallback {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FallbackTransport for RecordingFallback {
    async fn send(&self, channel_id: &str, payload: Value) -> Result<Value> {
        self.calls.lock().push((channel_id.to_string(), payload));
        Ok(json!({ "delivered": true, "via": "fallback" }))
    }
}

// ─────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────

pub fn static_auth(token: Option<&str>) -> Arc<AuthTokenProvider> {
    Arc::new(AuthTokenProvider::new(Arc::new(StaticAuth::new(
        token.map(str::to_string),
    ))))
}

/// Fast, jitter-free timings; heartbeat far enough out to stay quiet
pub fn test_config(max_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.0,
        },
        heartbeat: HeartbeatConfig {
            interval: Duration::from_secs(3600),
            max_pending_probes: 3,
        },
        correlator: CorrelatorConfig {
            response_timeout: Duration::from_secs(5),
        },
    }
}

/// Everything a connection-manager scenario needs
pub struct Harness {
    pub manager: Arc<ConnectionManager>,
    pub connector: Arc<ScriptedConnector>,
    pub peers: mpsc::UnboundedReceiver<ChannelPeer>,
    pub handler: Arc<RecordingHandler>,
    pub fallback: Arc<RecordingFallback>,
}

impl Harness {
    pub fn new(config: ConnectionConfig, script: Vec<Outcome>) -> Self {
        Self::with_auth(config, script, static_auth(Some(TOKEN)))
    }

    pub fn with_auth(config: ConnectionConfig, script: Vec<Outcome>, auth: Arc<AuthTokenProvider>) -> Self {
        let (connector, peers) = ScriptedConnector::new(script);
        let handler = Arc::new(RecordingHandler::default());
        let fallback = Arc::new(RecordingFallback::default());

        let manager = ConnectionManager::builder()
            .config(config)
            .auth(auth)
            .connector(connector.clone())
            .fallback(fallback.clone())
            .handler(handler.clone())
            .build()
            .expect("manager should build");

        Self {
            manager: Arc::new(manager),
            connector,
            peers,
            handler,
            fallback,
        }
    }

    /// Next accepted channel
    pub async fn peer(&mut self) -> ChannelPeer {
        tokio::time::timeout(Duration::from_secs(30), self.peers.recv())
            .await
            .expect("no channel was opened")
            .expect("connector dropped")
    }

    /// Poll until the manager reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState) {
        for _ in 0..500 {
            if self.manager.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("manager never reached {}, stuck in {}", state, self.manager.state());
    }
}

/// Read the next application frame, skipping heartbeat probes
pub async fn next_text(peer: &mut ChannelPeer) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(30), peer.outbound.recv())
            .await
            .expect("no frame written")
            .expect("writer closed");
        if let Outbound::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).expect("frame is JSON");
            if value["type"] != "ping" {
                return value;
            }
        }
    }
}

/// Push a JSON frame from the server side
pub async fn server_send(peer: &ChannelPeer, value: Value) {
    peer.inbound
        .send(Inbound::Text(value.to_string()))
        .await
        .expect("client stopped reading");
}

/// Close the channel from the server side
pub async fn server_close(peer: &ChannelPeer, code: u16, reason: &str) {
    let _ = peer
        .inbound
        .send(Inbound::Closed {
            code,
            reason: reason.to_string(),
        })
        .await;
}
