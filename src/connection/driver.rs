//! Connection state machine
//!
//! One task per manager runs [`Driver::run`]. Each phase awaits its own work
//! (dial, channel events, backoff) raced against caller commands, so every
//! transition happens on this task and in order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use backoff::backoff::Backoff;

use crate::auth::AuthTokenProvider;
use crate::correlator::MessageCorrelator;
use crate::endpoint::{redact, validate_endpoint, EndpointResolver};
use crate::error::{Error, Result};
use crate::fallback::FallbackTransport;
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::{ControlFrame, InboundMessage, CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::reconnect::{FailureKind, ReconnectionPolicy};
use crate::scope::ScopeStore;

use super::channel::{ChannelHandle, Connector, Inbound, Outbound};
use super::manager::{ConnectionConfig, ConnectionHandler, ConnectionState, LinkMode, Session};

// ─────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────

pub(crate) struct LinkState {
    pub state: ConnectionState,
    pub session: Option<Session>,
    /// Writer of the open channel; present only while `Connected`
    pub writer: Option<mpsc::Sender<Outbound>>,
    pub destroyed: bool,
}

/// State visible to both the handle and the driver
pub(crate) struct Shared {
    pub link: RwLock<LinkState>,
    pub correlator: MessageCorrelator,
    pub fallback: Arc<dyn FallbackTransport>,
    pub scopes: Arc<dyn ScopeStore>,
    handler: Arc<dyn ConnectionHandler>,
}

impl Shared {
    pub fn new(
        handler: Arc<dyn ConnectionHandler>,
        correlator: MessageCorrelator,
        fallback: Arc<dyn FallbackTransport>,
        scopes: Arc<dyn ScopeStore>,
    ) -> Self {
        Self {
            link: RwLock::new(LinkState {
                state: ConnectionState::Disconnected,
                session: None,
                writer: None,
                destroyed: false,
            }),
            correlator,
            fallback,
            scopes,
            handler,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.link.read().destroyed
    }

    pub fn mark_destroyed(&self) {
        self.link.write().destroyed = true;
    }

    fn state(&self) -> ConnectionState {
        self.link.read().state
    }

    fn channel_id(&self) -> Option<String> {
        self.link.read().session.as_ref().map(|s| s.channel_id.clone())
    }

    fn update_session(&self, f: impl FnOnce(&mut Session)) {
        if let Some(session) = self.link.write().session.as_mut() {
            f(session);
        }
    }

    /// Run a callback, containing any panic
    fn notify(&self, f: impl FnOnce(&dyn ConnectionHandler)) {
        let handler = self.handler.as_ref();
        if catch_unwind(AssertUnwindSafe(|| f(handler))).is_err() {
            error!("Connection handler panicked");
        }
    }

    /// Change state; returns `false` if already there
    fn transition(&self, to: ConnectionState) -> bool {
        let from = {
            let mut link = self.link.write();
            let from = link.state;
            if from == to {
                return false;
            }
            link.state = to;
            from
        };
        info!(from = %from, to = %to, "Connection state changed");
        self.notify(|h| h.on_state_change(from, to));
        true
    }

    fn enter_connected(&self) {
        if self.transition(ConnectionState::Connected) {
            self.notify(|h| h.on_connect());
        }
    }

    fn enter_disconnected(&self, reason: &str) {
        if self.transition(ConnectionState::Disconnected) {
            self.notify(|h| h.on_disconnect(reason));
        }
    }

    fn enter_error(&self, error: &Error) {
        self.transition(ConnectionState::Error);
        self.notify(|h| h.on_error(error));
    }

    fn engage_fallback(&self) {
        self.update_session(|s| s.using_fallback = true);
        warn!("Realtime channel abandoned, using fallback transport");
    }
}

// ─────────────────────────────────────────────────────────────────
// Dialing
// ─────────────────────────────────────────────────────────────────

/// Everything needed to open a channel
pub(crate) struct Dialer {
    pub auth: Arc<AuthTokenProvider>,
    pub resolver: Arc<EndpointResolver>,
    pub scopes: Arc<dyn ScopeStore>,
    pub connector: Arc<dyn Connector>,
    pub connect_timeout: Duration,
}

pub(crate) struct Dialed {
    handle: ChannelHandle,
    scope_id: Option<String>,
}

impl Dialer {
    async fn dial(&self, channel_id: &str) -> Result<Dialed> {
        let credential = match self.auth.get_valid_credential().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "No credential, invalidating cache and retrying once");
                self.auth.invalidate();
                self.auth.get_valid_credential().await?
            }
        };

        let scope_id = self.scopes.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read selected scope");
            None
        });

        let url = self.resolver.resolve(scope_id.as_deref(), channel_id, &credential)?;
        // Inputs may have gone stale since the address was built
        validate_endpoint(&url)?;

        let shown = redact(&url);
        let handle = tokio::time::timeout(self.connect_timeout, self.connector.open(&url))
            .await
            .map_err(|_| Error::ConnectionTimeout {
                url: shown,
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })??;

        Ok(Dialed { handle, scope_id })
    }
}

// ─────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────

pub(crate) enum Command {
    Connect {
        channel_id: String,
        reply: oneshot::Sender<Result<LinkMode>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

enum Phase {
    Idle,
    Connect,
    Live(Dialed),
    Recover(Error),
    Backoff { delay: Duration, refresh: bool },
    Terminated(Option<oneshot::Sender<()>>),
}

/// A command that ends the current phase
enum Interrupt {
    Restart,
    Disconnect(oneshot::Sender<()>),
    Terminate(Option<oneshot::Sender<()>>),
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    dialer: Arc<Dialer>,
    policy: ReconnectionPolicy,
    heartbeat: HeartbeatMonitor,
    commands: mpsc::Receiver<Command>,
    waiters: Vec<oneshot::Sender<Result<LinkMode>>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl Driver {
    pub fn new(
        shared: Arc<Shared>,
        dialer: Arc<Dialer>,
        config: &ConnectionConfig,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            shared,
            dialer,
            policy: ReconnectionPolicy::new(config.retry.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            commands,
            waiters: Vec::new(),
            refresh_task: None,
        }
    }

    pub async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connect => self.connect().await,
                Phase::Live(dialed) => self.live(dialed).await,
                Phase::Recover(error) => self.recover(error),
                Phase::Backoff { delay, refresh } => self.backoff(delay, refresh).await,
                Phase::Terminated(reply) => {
                    self.shutdown(reply);
                    break;
                }
            };
        }
        debug!("Connection driver terminated");
    }

    // ─────────────────────────────────────────────────────────────
    // Phases
    // ─────────────────────────────────────────────────────────────

    async fn idle(&mut self) -> Phase {
        match self.commands.recv().await {
            None => Phase::Terminated(None),
            Some(Command::Connect { channel_id, reply }) => {
                self.begin(channel_id);
                self.waiters.push(reply);
                Phase::Connect
            }
            Some(Command::Disconnect { reply }) => {
                let _ = reply.send(());
                Phase::Idle
            }
            Some(Command::Destroy { reply }) => Phase::Terminated(Some(reply)),
        }
    }

    async fn connect(&mut self) -> Phase {
        let Some(channel_id) = self.shared.channel_id() else {
            return Phase::Idle;
        };
        self.shared.transition(ConnectionState::Connecting);
        info!(channel_id = %channel_id, attempt = self.policy.attempts() + 1, "Connecting");

        let dialer = self.dialer.clone();
        let work = async move { dialer.dial(&channel_id).await };
        tokio::pin!(work);

        loop {
            tokio::select! {
                outcome = &mut work => {
                    return match outcome {
                        Ok(dialed) => Phase::Live(dialed),
                        Err(e) => Phase::Recover(e),
                    };
                }
                cmd = self.commands.recv() => {
                    if let Some(interrupt) = self.on_command(cmd) {
                        return self.interrupt(interrupt);
                    }
                }
            }
        }
    }

    async fn live(&mut self, dialed: Dialed) -> Phase {
        let Dialed { handle, scope_id } = dialed;
        let ChannelHandle {
            outbound,
            mut inbound,
        } = handle;

        self.policy.reset();
        self.shared.link.write().writer = Some(outbound.clone());
        self.shared.update_session(|s| {
            s.scope_id = scope_id;
            s.reconnect_attempts = 0;
            s.using_fallback = false;
            s.last_error = None;
        });
        self.shared.enter_connected();
        self.resolve_waiters(|| Ok(LinkMode::Realtime));

        let probe_writer = outbound.clone();
        let mut liveness = self.heartbeat.start(move || match ControlFrame::ping().to_json() {
            Ok(frame) => probe_writer.try_send(Outbound::Text(frame)).is_ok(),
            Err(_) => false,
        });
        let mut liveness_armed = true;

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(Inbound::Text(text)) => self.dispatch(&text, &outbound),
                    Some(Inbound::Closed { code, reason }) => {
                        return Phase::Recover(Error::connection_closed(code, reason));
                    }
                    Some(Inbound::Error(message)) => {
                        let target = self.shared.channel_id().unwrap_or_default();
                        return Phase::Recover(Error::connection_failed(target, message));
                    }
                    None => {
                        return Phase::Recover(Error::connection_closed(CLOSE_ABNORMAL, "channel dropped"));
                    }
                },
                failure = &mut liveness, if liveness_armed => match failure {
                    Ok(failure) => return Phase::Recover(failure.into()),
                    Err(_) => liveness_armed = false,
                },
                cmd = self.commands.recv() => {
                    if let Some(interrupt) = self.on_command(cmd) {
                        return self.interrupt(interrupt);
                    }
                }
            }
        }
    }

    fn recover(&mut self, error: Error) -> Phase {
        let class = self.policy.classify(&error);
        let (code, reason) = match &error {
            Error::ConnectionClosed { code, reason } => (*code, reason.clone()),
            other => (CLOSE_ABNORMAL, other.to_string()),
        };
        self.teardown(code, &reason);
        self.shared.update_session(|s| s.last_error = Some(error.format_for_log()));

        if class.kind == FailureKind::Normal {
            info!(code, reason = %reason, "Channel closed normally");
            self.shared.enter_disconnected(&reason);
            self.resolve_waiters(|| Ok(LinkMode::Fallback));
            return Phase::Idle;
        }

        warn!(error = %error, kind = ?class.kind, "Channel failure");
        self.shared.enter_error(&error);

        match class.kind {
            FailureKind::Fatal => {
                self.shared.engage_fallback();
                self.shared.enter_disconnected(&error.to_string());
                self.resolve_waiters(|| Err(replicate(&error)));
                Phase::Idle
            }
            FailureKind::PolicyViolation => {
                self.shared.engage_fallback();
                let notice = Error::PolicyViolation {
                    reason: if reason.is_empty() { "policy violation".to_string() } else { reason.clone() },
                };
                self.shared.notify(|h| h.on_error(&notice));
                self.shared.enter_disconnected(&reason);
                self.resolve_waiters(|| Ok(LinkMode::Fallback));
                Phase::Idle
            }
            _ => match self.policy.next_backoff() {
                None => {
                    let attempts = self.policy.attempts();
                    self.shared.update_session(|s| s.reconnect_attempts = attempts);
                    self.shared.engage_fallback();
                    let degraded = Error::Degraded { attempts };
                    warn!(attempts, "Reconnection attempts exhausted");
                    self.shared.notify(|h| h.on_error(&degraded));
                    self.shared.enter_disconnected(&degraded.to_string());
                    self.resolve_waiters(|| Ok(LinkMode::Fallback));
                    Phase::Idle
                }
                Some(delay) => {
                    let attempts = self.policy.attempts();
                    self.shared.update_session(|s| s.reconnect_attempts = attempts);
                    if class.immediate {
                        self.policy.use_auth_retry();
                        self.dialer.auth.invalidate();
                    }
                    info!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        immediate = class.immediate,
                        "Scheduling reconnection"
                    );
                    Phase::Backoff {
                        delay,
                        refresh: class.immediate,
                    }
                }
            },
        }
    }

    async fn backoff(&mut self, delay: Duration, refresh: bool) -> Phase {
        self.shared.transition(ConnectionState::Reconnecting);

        let auth = self.dialer.auth.clone();
        let wait = async move {
            if refresh {
                match auth.get_valid_credential().await {
                    Ok(_) => {
                        info!("Credential refreshed, retrying immediately");
                        return;
                    }
                    Err(e) => warn!(error = %e, "Credential refresh failed, backing off"),
                }
            }
            tokio::time::sleep(delay).await;
        };
        tokio::pin!(wait);

        loop {
            tokio::select! {
                _ = &mut wait => return Phase::Connect,
                cmd = self.commands.recv() => {
                    if let Some(interrupt) = self.on_command(cmd) {
                        return self.interrupt(interrupt);
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────

    /// Handle a command arriving mid-phase; `Some` ends the phase
    fn on_command(&mut self, cmd: Option<Command>) -> Option<Interrupt> {
        match cmd {
            None => Some(Interrupt::Terminate(None)),
            Some(Command::Destroy { reply }) => Some(Interrupt::Terminate(Some(reply))),
            Some(Command::Disconnect { reply }) => Some(Interrupt::Disconnect(reply)),
            Some(Command::Connect { channel_id, reply }) => {
                if self.shared.channel_id().as_deref() == Some(channel_id.as_str()) {
                    if self.shared.state() == ConnectionState::Connected {
                        let _ = reply.send(Ok(LinkMode::Realtime));
                    } else {
                        self.waiters.push(reply);
                    }
                    return None;
                }

                info!(channel_id = %channel_id, "Switching channel");
                self.resolve_waiters(|| {
                    Err(Error::connection_closed(CLOSE_NORMAL, "superseded by another connect"))
                });
                self.begin(channel_id);
                self.waiters.push(reply);
                Some(Interrupt::Restart)
            }
        }
    }

    fn interrupt(&mut self, interrupt: Interrupt) -> Phase {
        match interrupt {
            Interrupt::Restart => {
                self.teardown(CLOSE_NORMAL, "switching channel");
                self.shared.enter_disconnected("switching channel");
                Phase::Connect
            }
            Interrupt::Disconnect(reply) => {
                self.teardown(CLOSE_NORMAL, "client disconnect");
                self.resolve_waiters(|| {
                    Err(Error::connection_closed(CLOSE_NORMAL, "disconnected before the channel opened"))
                });
                self.shared.enter_disconnected("client disconnect");
                let _ = reply.send(());
                Phase::Idle
            }
            Interrupt::Terminate(reply) => Phase::Terminated(reply),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────

    /// Start a fresh session for a channel
    fn begin(&mut self, channel_id: String) {
        self.policy.reset();
        self.shared.link.write().session = Some(Session::new(channel_id));
    }

    fn resolve_waiters(&mut self, outcome: impl Fn() -> Result<LinkMode>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome());
        }
    }

    /// Release everything tied to the current channel
    fn teardown(&mut self, code: u16, reason: &str) {
        self.heartbeat.stop();
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        let writer = self.shared.link.write().writer.take();
        if let Some(writer) = writer {
            let _ = writer.try_send(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: reason.to_string(),
            });
        }
        self.shared.correlator.reject_all(code, reason);
    }

    fn shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        self.teardown(CLOSE_NORMAL, "client destroyed");
        self.resolve_waiters(|| Err(Error::Destroyed));
        self.shared.enter_disconnected("client destroyed");
        {
            let mut link = self.shared.link.write();
            link.destroyed = true;
            link.session = None;
        }

        // Settle commands that raced with destroy
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Connect { reply, .. } => {
                    let _ = reply.send(Err(Error::Destroyed));
                }
                Command::Disconnect { reply } | Command::Destroy { reply } => {
                    let _ = reply.send(());
                }
            }
        }

        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Inbound dispatch
    // ─────────────────────────────────────────────────────────────

    fn dispatch(&mut self, text: &str, writer: &mpsc::Sender<Outbound>) {
        let message = match InboundMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };
        debug!(message_type = message.type_name(), "Received message");

        match message {
            InboundMessage::Pong { .. } => self.heartbeat.on_ack(),
            InboundMessage::TokenRefreshRequired => self.refresh_on_channel(writer.clone()),
            InboundMessage::TokenRefreshSuccess { new_version } => {
                info!(new_version = ?new_version, "Server accepted refreshed credential");
            }
            InboundMessage::Reply {
                message_id,
                payload,
            } => {
                if !self.shared.correlator.resolve(&message_id, payload.clone()) {
                    self.forward(payload);
                }
            }
            InboundMessage::Other(payload) => self.forward(payload),
        }
    }

    fn forward(&self, payload: Value) {
        self.shared.notify(|h| h.on_message(payload));
    }

    /// Obtain a fresh credential and push it over the open channel
    fn refresh_on_channel(&mut self, writer: mpsc::Sender<Outbound>) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        let auth = self.dialer.auth.clone();

        self.refresh_task = Some(tokio::spawn(async move {
            auth.invalidate();
            let credential = match auth.get_valid_credential().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Server-requested credential refresh failed");
                    return;
                }
            };
            let frame = ControlFrame::TokenRefresh {
                token: credential.token().to_string(),
            };
            match frame.to_json() {
                Ok(text) => {
                    if writer.send(Outbound::Text(text)).await.is_err() {
                        debug!("Channel closed before refreshed credential was sent");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode token refresh"),
            }
        }));
    }
}

/// Copy of an error for every waiter of one failed attempt
fn replicate(error: &Error) -> Error {
    match error {
        Error::InvalidEndpoint { address, reason } => Error::invalid_endpoint(address.clone(), reason.clone()),
        Error::AuthUnavailable { message } => Error::auth_unavailable(message.clone()),
        Error::Destroyed => Error::Destroyed,
        other => Error::Internal(other.to_string()),
    }
}
