//! Reconnection policy
//!
//! Classifies channel failures and computes exponential backoff with jitter.
//! The policy owns the [`RetryState`] for one manager; it is reset whenever a
//! connection is established.

use std::time::Duration;

use backoff::backoff::Backoff;
use rand::Rng;

use crate::error::Error;
use crate::protocol::CloseKind;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failures tolerated before switching to fallback
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any delay
    pub max_delay: Duration,

    /// Fraction of the exponential delay added as random jitter (0.0..=1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.5,
        }
    }
}

/// Retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap: Duration,
}

/// Failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Clean teardown
    Normal,
    /// Server refused the session; never retried
    PolicyViolation,
    /// Credential problem; one immediate retry after a refresh
    AuthRelated,
    /// Bad input or missing credential; never retried
    Fatal,
    /// Anything else; retried with backoff
    Transient,
}

impl FailureKind {
    pub fn of(error: &Error) -> Self {
        match error {
            Error::ConnectionClosed { code, .. } => match CloseKind::from_code(*code) {
                CloseKind::Normal => FailureKind::Normal,
                CloseKind::PolicyViolation => FailureKind::PolicyViolation,
                CloseKind::Auth => FailureKind::AuthRelated,
                CloseKind::Abnormal => FailureKind::Transient,
            },
            Error::PolicyViolation { .. } => FailureKind::PolicyViolation,
            Error::AuthRejected { .. } => FailureKind::AuthRelated,
            e if e.is_fatal() => FailureKind::Fatal,
            _ => FailureKind::Transient,
        }
    }

    fn retryable(self) -> bool {
        matches!(self, FailureKind::AuthRelated | FailureKind::Transient)
    }
}

/// Result of classifying a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: FailureKind,
    pub retry: bool,
    pub immediate: bool,
}

/// Decides whether and when to reconnect
#[derive(Debug)]
pub struct ReconnectionPolicy {
    jitter_factor: f64,
    state: RetryState,
    auth_retry_used: bool,
}

impl ReconnectionPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            state: RetryState {
                attempts: 0,
                max_attempts: config.max_attempts,
                base_delay: config.base_delay,
                cap: config.max_delay,
            },
            auth_retry_used: false,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.state.attempts >= self.state.max_attempts
    }

    /// Classify a failure against the current retry state
    pub fn classify(&self, error: &Error) -> Classification {
        let kind = FailureKind::of(error);
        let retry = kind.retryable() && !self.exhausted();
        Classification {
            kind,
            retry,
            immediate: retry && kind == FailureKind::AuthRelated && !self.auth_retry_used,
        }
    }

    /// Count one failed attempt
    pub fn record_failure(&mut self) -> u32 {
        self.state.attempts = self.state.attempts.saturating_add(1);
        self.state.attempts
    }

    /// Consume the one immediate retry allowed per connection cycle
    pub fn use_auth_retry(&mut self) {
        self.auth_retry_used = true;
    }

    /// `min(cap, base * 2^(attempt-1) * (1 + random * jitter))`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(32) as i32;
        let exponential = self.state.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let jitter = rand::thread_rng().gen::<f64>() * self.jitter_factor;
        let delay = exponential * (1.0 + jitter);

        let cap = self.state.cap.as_secs_f64();
        if !delay.is_finite() || delay >= cap {
            self.state.cap
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Backoff for ReconnectionPolicy {
    /// Record a failure and return the delay before the next attempt, or
    /// `None` once attempts are exhausted.
    fn next_backoff(&mut self) -> Option<Duration> {
        let attempt = self.record_failure();
        if self.exhausted() {
            None
        } else {
            Some(self.next_delay(attempt))
        }
    }

    fn reset(&mut self) {
        self.state.attempts = 0;
        self.auth_retry_used = false;
    }
}
