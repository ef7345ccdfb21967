//! Connection manager handle
//!
//! [`ConnectionManager`] is a cheap front for a driver task that owns the
//! connection lifecycle. Lifecycle commands go to the driver; `send` reads the
//! shared link state and writes to the channel or the fallback directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::AuthTokenProvider;
use crate::correlator::{CorrelatorConfig, MessageCorrelator, Outstanding};
use crate::endpoint::{EndpointConfig, EndpointResolver};
use crate::error::{Error, Result};
use crate::fallback::{DisabledFallback, FallbackTransport};
use crate::heartbeat::HeartbeatConfig;
use crate::reconnect::RetryConfig;
use crate::scope::{MemoryScopeStore, ScopeStore};

use super::channel::{Connector, Outbound, WsConnector};
use super::driver::{Command, Dialer, Driver, Shared};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Limit for a single channel open
    pub connect_timeout: Duration,

    /// Reconnection policy
    pub retry: RetryConfig,

    /// Liveness probing
    pub heartbeat: HeartbeatConfig,

    /// Correlated message timeouts
    pub correlator: CorrelatorConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            correlator: CorrelatorConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical binding to one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub channel_id: String,
    /// Scope selected when the address was last resolved
    pub scope_id: Option<String>,
    pub reconnect_attempts: u32,
    pub using_fallback: bool,
    pub last_error: Option<String>,
}

impl Session {
    pub(crate) fn new(channel_id: String) -> Self {
        Self {
            channel_id,
            scope_id: None,
            reconnect_attempts: 0,
            using_fallback: false,
            last_error: None,
        }
    }
}

/// How messages will be delivered after `connect` settles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Persistent channel is up
    Realtime,
    /// Messages go through the fallback transport
    Fallback,
}

/// Lifecycle callbacks supplied by the caller.
///
/// Called from the driver task; implementations should return quickly.
/// A panicking callback is logged and otherwise ignored.
pub trait ConnectionHandler: Send + Sync {
    /// Inbound message that is neither a control frame nor a pending reply
    fn on_message(&self, _message: Value) {}

    fn on_error(&self, _error: &Error) {}

    fn on_connect(&self) {}

    fn on_disconnect(&self, _reason: &str) {}

    fn on_state_change(&self, _from: ConnectionState, _to: ConnectionState) {}
}

/// Handler that ignores every callback
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

// ─────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────

enum Route {
    Realtime(mpsc::Sender<Outbound>, Outstanding),
    Fallback(String, Value),
}

/// Resilient realtime client for one channel at a time
pub struct ConnectionManager {
    shared: Arc<Shared>,
    resolver: Arc<EndpointResolver>,
    commands: mpsc::Sender<Command>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::default()
    }

    /// Connect to a channel.
    ///
    /// Settles once the first attempt cycle finishes: `Realtime` when the
    /// channel is open, `Fallback` when retries are exhausted or the server
    /// refused the session. Errors for invalid input, an unobtainable
    /// credential, or a destroyed manager, and with `ConnectionClosed(1000)`
    /// when the attempt is superseded by another channel or cancelled by
    /// `disconnect`.
    pub async fn connect(&self, channel_id: &str) -> Result<LinkMode> {
        if self.shared.is_destroyed() {
            return Err(Error::Destroyed);
        }
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Err(Error::invalid_endpoint(channel_id, "channel id is empty"));
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                channel_id: channel_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::Destroyed)?;

        rx.await.map_err(|_| Error::Destroyed)?
    }

    /// Send a payload and wait for its response.
    ///
    /// Uses the realtime channel only while `Connected` and not in fallback
    /// mode; otherwise the fallback transport carries the message.
    pub async fn send(&self, payload: Value) -> Result<Value> {
        let route = {
            let link = self.shared.link.read();
            if link.destroyed {
                return Err(Error::Destroyed);
            }
            let Some(session) = link.session.as_ref() else {
                return Err(Error::fallback_unavailable("no channel selected"));
            };
            let realtime = link.state == ConnectionState::Connected && !session.using_fallback;
            match link.writer.as_ref().filter(|_| realtime) {
                // Registered under the lock: teardown takes the writer before rejecting
                Some(writer) => Route::Realtime(writer.clone(), self.shared.correlator.register(payload)?),
                None => Route::Fallback(session.channel_id.clone(), payload),
            }
        };

        match route {
            Route::Realtime(writer, outstanding) => self.shared.correlator.deliver(outstanding, &writer).await,
            Route::Fallback(channel_id, payload) => {
                debug!(channel_id = %channel_id, "Routing message to fallback transport");
                self.shared.fallback.send(&channel_id, payload).await
            }
        }
    }

    /// Close the channel and stay disconnected; no-op when already disconnected
    pub async fn disconnect(&self) {
        if self.shared.is_destroyed() {
            return;
        }
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Tear everything down. Safe from any state and idempotent; every later
    /// operation fails with `Destroyed`.
    pub async fn destroy(&self) {
        self.shared.mark_destroyed();

        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Destroy { reply }).await.is_ok() {
            let _ = rx.await;
        }

        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
            info!("Connection manager destroyed");
        }
    }

    pub fn is_connected(&self) -> bool {
        let link = self.shared.link.read();
        link.state == ConnectionState::Connected && link.writer.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.read().state
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<Session> {
        self.shared.link.read().session.clone()
    }

    /// Persist the selected scope; used from the next resolved address on
    pub fn select_scope(&self, scope_id: Option<&str>) -> Result<()> {
        if self.shared.is_destroyed() {
            return Err(Error::Destroyed);
        }
        self.shared.scopes.save(scope_id.filter(|s| !s.trim().is_empty()))
    }

    /// Record the scope a channel belongs to
    pub fn bind_channel(&self, channel_id: &str, scope_id: &str) {
        self.resolver.bind_channel(channel_id, scope_id);
    }

    /// Correlated messages still waiting for a reply
    pub fn pending_messages(&self) -> usize {
        self.shared.correlator.pending_count()
    }
}

// ─────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────

/// Assembles a [`ConnectionManager`] from its collaborators
#[derive(Default)]
pub struct ConnectionManagerBuilder {
    config: ConnectionConfig,
    endpoint: EndpointConfig,
    resolver: Option<Arc<EndpointResolver>>,
    auth: Option<Arc<AuthTokenProvider>>,
    connector: Option<Arc<dyn Connector>>,
    fallback: Option<Arc<dyn FallbackTransport>>,
    scopes: Option<Arc<dyn ScopeStore>>,
    handler: Option<Arc<dyn ConnectionHandler>>,
}

impl ConnectionManagerBuilder {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Share a resolver (and its channel bindings) with other managers
    pub fn resolver(mut self, resolver: Arc<EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn auth(mut self, auth: Arc<AuthTokenProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn FallbackTransport>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn scope_store(mut self, scopes: Arc<dyn ScopeStore>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build the manager and spawn its driver task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<ConnectionManager> {
        let auth = self
            .auth
            .ok_or_else(|| Error::config_validation("an auth token provider is required"))?;
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(EndpointResolver::new(self.endpoint)));
        let scopes = self
            .scopes
            .unwrap_or_else(|| Arc::new(MemoryScopeStore::default()));

        let shared = Arc::new(Shared::new(
            self.handler.unwrap_or_else(|| Arc::new(NoopHandler)),
            MessageCorrelator::new(self.config.correlator.clone()),
            self.fallback.unwrap_or_else(|| Arc::new(DisabledFallback)),
            scopes.clone(),
        ));

        let dialer = Arc::new(Dialer {
            auth,
            resolver: resolver.clone(),
            scopes,
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(WsConnector::default())),
            connect_timeout: self.config.connect_timeout,
        });

        let (commands, command_rx) = mpsc::channel(32);
        let driver = Driver::new(shared.clone(), dialer, &self.config, command_rx);
        let handle = tokio::spawn(driver.run());

        Ok(ConnectionManager {
            shared,
            resolver,
            commands,
            driver: Mutex::new(Some(handle)),
        })
    }
}
