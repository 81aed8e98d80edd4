//! A single server in the pool and its failure bookkeeping.

use crate::error::{Error, Result};
use crate::types::{
    ServerAddress, ServerId, ServerSnapshot, ServerSpec, ServerState, ServerStatus, TransportKind,
};
use std::time::Duration;
use tokio::time::Instant;

/// When a server is declared dead and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Consecutive failures before the server is marked dead.
    pub failure_threshold: u32,
    /// First dead window, and the value restored on success.
    pub retry_timeout: Duration,
    /// Ceiling for the doubled dead window.
    pub retry_timeout_max: Duration,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            retry_timeout: Duration::from_secs(2),
            retry_timeout_max: Duration::from_secs(60),
        }
    }
}

impl FailurePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.retry_timeout > self.retry_timeout_max {
            return Err(Error::Config(format!(
                "retry_timeout {:?} exceeds retry_timeout_max {:?}",
                self.retry_timeout, self.retry_timeout_max
            )));
        }
        Ok(())
    }

    /// The window that follows `current`.
    fn next_timeout(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.retry_timeout_max)
    }
}

/// One cache endpoint.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    id: ServerId,
    address: ServerAddress,
    transport: TransportKind,
    weight: u32,
    /// `address` rendered once; names the server's ring points.
    identity: String,
    state: ServerState,
    failure_count: u32,
    retry_timeout: Duration,
}

impl ServerEntry {
    pub(crate) fn new(id: ServerId, spec: ServerSpec, policy: &FailurePolicy) -> Self {
        Self {
            id,
            identity: spec.address.to_string(),
            address: spec.address,
            transport: spec.transport,
            weight: spec.weight,
            state: ServerState::Unknown,
            failure_count: 0,
            retry_timeout: policy.retry_timeout,
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// The string ring points are derived from.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Window the next escalation will use.
    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }

    /// Time left in the dead window at `now`, if the server is inside one.
    pub fn retry_in(&self, now: Instant) -> Option<Duration> {
        match self.state {
            ServerState::Dead { until } if now < until => Some(until - now),
            _ => None,
        }
    }

    /// Whether a connection may be attempted at `now`.
    pub fn is_available(&self, now: Instant) -> bool {
        self.retry_in(now).is_none()
    }

    /// Error for a caller that hit this server inside its dead window.
    pub(crate) fn unavailable(&self, now: Instant) -> Option<Error> {
        self.retry_in(now).map(|retry_in| Error::ServerUnavailable {
            address: self.identity.clone(),
            retry_in,
        })
    }

    /// Start a dead window of `window` without touching the counters.
    pub(crate) fn mark_dead(&mut self, now: Instant, window: Duration) {
        self.state = ServerState::Dead { until: now + window };
    }

    /// Clear dead state and failure history. Returns whether the server was
    /// dead before.
    pub(crate) fn mark_alive(&mut self, policy: &FailurePolicy) -> bool {
        let was_dead = matches!(self.state, ServerState::Dead { .. });
        self.state = ServerState::Live;
        self.failure_count = 0;
        self.retry_timeout = policy.retry_timeout;
        was_dead
    }

    /// Count one failure. Once the count reaches the threshold the server
    /// enters a dead window of the current retry timeout and the next
    /// window doubles. Returns the window if one was started.
    pub(crate) fn record_failure(&mut self, now: Instant, policy: &FailurePolicy) -> Option<Duration> {
        self.failure_count = self.failure_count.saturating_add(1);
        if self.failure_count < policy.failure_threshold {
            return None;
        }
        let window = self.retry_timeout;
        self.mark_dead(now, window);
        self.retry_timeout = policy.next_timeout(window);
        Some(window)
    }

    pub(crate) fn snapshot(&self, index: usize, now: Instant) -> ServerSnapshot {
        let status = match self.state {
            ServerState::Unknown => ServerStatus::Unknown,
            ServerState::Live => ServerStatus::Live,
            ServerState::Dead { .. } => ServerStatus::Dead,
        };
        ServerSnapshot {
            id: self.id,
            index,
            address: self.address.clone(),
            transport: self.transport,
            weight: self.weight,
            status,
            failure_count: self.failure_count,
            retry_timeout: self.retry_timeout,
            retry_in: self.retry_in(now),
        }
    }
}
