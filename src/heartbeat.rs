//! Liveness probing for an established channel

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::Error;

/// Heartbeat configuration
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between probes
    pub interval: Duration,

    /// Unanswered probes tolerated before declaring the channel dead
    pub max_pending_probes: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_pending_probes: 3,
        }
    }
}

impl HeartbeatConfig {
    /// Silence longer than this is a liveness failure
    pub fn silence_window(&self) -> Duration {
        self.interval.mul_f64(1.5)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatState {
    pub pending_probes: u32,
    pub last_probe_ack_at: Instant,
}

impl HeartbeatState {
    fn fresh() -> Self {
        Self {
            pending_probes: 0,
            last_probe_ack_at: Instant::now(),
        }
    }
}

/// Reported once when the channel is considered dead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessFailure {
    pub pending_probes: u32,
    pub silent_for: Duration,
}

impl From<LivenessFailure> for Error {
    fn from(f: LivenessFailure) -> Self {
        Error::LivenessTimeout {
            pending_probes: f.pending_probes,
            silent_ms: f.silent_for.as_millis() as u64,
        }
    }
}

/// Periodically probes the channel and watches for acknowledgments
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<Mutex<HeartbeatState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HeartbeatState::fresh())),
            task: Mutex::new(None),
        }
    }

    /// Start probing with a fresh state.
    ///
    /// `send_probe` returns `false` when the probe could not be written, which
    /// counts as a liveness failure. The returned receiver fires at most once;
    /// it closes without a value when the monitor is stopped.
    pub fn start<F>(&self, send_probe: F) -> oneshot::Receiver<LivenessFailure>
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.stop();
        *self.state.lock() = HeartbeatState::fresh();

        let (tx, rx) = oneshot::channel();
        let state = self.state.clone();
        let interval = self.config.interval;
        let window = self.config.silence_window();
        let max_pending = self.config.max_pending_probes;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let deadline = state.lock().last_probe_ack_at + window;

                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = *state.lock();
                        let silent_for = snapshot.last_probe_ack_at.elapsed();
                        if silent_for > window || snapshot.pending_probes > max_pending {
                            warn!(
                                pending_probes = snapshot.pending_probes,
                                silent_ms = silent_for.as_millis() as u64,
                                "Heartbeat missed, channel considered dead"
                            );
                            let _ = tx.send(LivenessFailure {
                                pending_probes: snapshot.pending_probes,
                                silent_for,
                            });
                            return;
                        }

                        if !send_probe() {
                            warn!("Failed to send heartbeat probe");
                            let _ = tx.send(LivenessFailure {
                                pending_probes: snapshot.pending_probes,
                                silent_for,
                            });
                            return;
                        }

                        let pending = {
                            let mut s = state.lock();
                            s.pending_probes += 1;
                            s.pending_probes
                        };
                        debug!(pending_probes = pending, "Heartbeat probe sent");
                    }
                    _ = sleep_until(deadline) => {
                        // An ack may have moved the deadline while we slept
                        let snapshot = *state.lock();
                        let silent_for = snapshot.last_probe_ack_at.elapsed();
                        if silent_for >= window {
                            warn!(
                                pending_probes = snapshot.pending_probes,
                                silent_ms = silent_for.as_millis() as u64,
                                "Heartbeat silence window elapsed, channel considered dead"
                            );
                            let _ = tx.send(LivenessFailure {
                                pending_probes: snapshot.pending_probes,
                                silent_for,
                            });
                            return;
                        }
                    }
                }
            }
        });

        *self.task.lock() = Some(handle);
        rx
    }

    /// Record a probe acknowledgment
    pub fn on_ack(&self) {
        let mut s = self.state.lock();
        s.pending_probes = s.pending_probes.saturating_sub(1);
        s.last_probe_ack_at = Instant::now();
    }

    /// Stop probing; safe to call repeatedly
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            debug!("Heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn state(&self) -> HeartbeatState {
        *self.state.lock()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
