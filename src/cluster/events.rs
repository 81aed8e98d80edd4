//! Pool membership and liveness events.

use crate::types::{ServerAddress, ServerId};
use std::time::Duration;

/// Events emitted by a [`ServerPool`](super::ServerPool).
///
/// Listeners are called after the pool lock has been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A server was appended to the pool.
    ServerAdded {
        /// The server's ID.
        server_id: ServerId,
        /// Where it listens.
        address: ServerAddress,
    },

    /// A server was removed from the pool.
    ServerRemoved {
        /// The server's ID.
        server_id: ServerId,
        /// Where it listened.
        address: ServerAddress,
    },

    /// A server entered a dead window.
    ServerDead {
        /// The server's ID.
        server_id: ServerId,
        /// Where it listens.
        address: ServerAddress,
        /// Length of the window.
        retry_timeout: Duration,
    },

    /// A dead server answered again or was revived by hand.
    ServerRevived {
        /// The server's ID.
        server_id: ServerId,
        /// Where it listens.
        address: ServerAddress,
    },
}

impl PoolEvent {
    /// Get the server ID associated with this event.
    pub fn server_id(&self) -> ServerId {
        match self {
            PoolEvent::ServerAdded { server_id, .. } => *server_id,
            PoolEvent::ServerRemoved { server_id, .. } => *server_id,
            PoolEvent::ServerDead { server_id, .. } => *server_id,
            PoolEvent::ServerRevived { server_id, .. } => *server_id,
        }
    }

    /// Check if this event changed pool membership.
    pub fn is_membership_change(&self) -> bool {
        matches!(
            self,
            PoolEvent::ServerAdded { .. } | PoolEvent::ServerRemoved { .. }
        )
    }
}

/// Listener for pool events.
pub trait PoolEventListener: Send + Sync + 'static {
    /// Called when a pool event occurs.
    fn on_event(&self, event: &PoolEvent);
}

/// Event listener that logs events.
pub struct LoggingEventListener;

impl PoolEventListener for LoggingEventListener {
    fn on_event(&self, event: &PoolEvent) {
        match event {
            PoolEvent::ServerAdded { server_id, address } => {
                tracing::info!(server_id, %address, "Server added to pool");
            }
            PoolEvent::ServerRemoved { server_id, address } => {
                tracing::info!(server_id, %address, "Server removed from pool");
            }
            PoolEvent::ServerDead {
                server_id,
                address,
                retry_timeout,
            } => {
                tracing::warn!(server_id, %address, ?retry_timeout, "Server marked dead");
            }
            PoolEvent::ServerRevived { server_id, address } => {
                tracing::info!(server_id, %address, "Server revived");
            }
        }
    }
}
