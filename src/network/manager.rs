//! Per-server connection slots, reuse, and failure accounting.

use super::connection::Connection;
use super::transport::Transport;
use crate::cluster::{PoolEvent, PoolEventListener, ServerPool, Target};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::types::ServerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

/// How an operation on a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The server answered with something unexpected.
    ProtocolError,
    /// Sending or receiving failed, or timed out.
    IoError,
}

/// Connection counters for monitoring
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    pub connect_attempts: AtomicUsize,
    pub connect_failures: AtomicUsize,
    pub connections_opened: AtomicUsize,
    pub connections_reused: AtomicUsize,
    pub connections_broken: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionMetricsSnapshot {
    pub connect_attempts: usize,
    pub connect_failures: usize,
    pub connections_opened: usize,
    pub connections_reused: usize,
    pub connections_broken: usize,
}

/// Idle connections and the concurrency limit for one server.
#[derive(Debug)]
struct ServerSlot {
    idle: Mutex<Vec<Transport>>,
    permits: Arc<Semaphore>,
}

type Slots = Arc<Mutex<HashMap<ServerId, Arc<ServerSlot>>>>;

/// Drops a server's slot when it leaves the pool.
struct SlotReaper {
    slots: Slots,
}

impl PoolEventListener for SlotReaper {
    fn on_event(&self, event: &PoolEvent) {
        if let PoolEvent::ServerRemoved { server_id, address } = event {
            if let Some(slot) = self.slots.lock().remove(server_id) {
                // Waiters fail; dropping the idle transports closes them
                slot.permits.close();
                let idle = std::mem::take(&mut *slot.idle.lock());
                debug!(server_id, %address, idle = idle.len(), "Dropped connections of removed server");
            }
        }
    }
}

/// Hands out connections to pool servers and keeps their failure
/// bookkeeping in the pool up to date.
pub struct ConnectionManager {
    pool: Arc<ServerPool>,
    config: ConnectionConfig,
    slots: Slots,
    metrics: ConnectionMetrics,
}

impl ConnectionManager {
    /// Create a manager for `pool`. Subscribes to pool events so removed
    /// servers lose their idle connections.
    pub fn new(pool: Arc<ServerPool>, config: ConnectionConfig) -> Self {
        let slots: Slots = Arc::new(Mutex::new(HashMap::new()));
        pool.subscribe(Arc::new(SlotReaper {
            slots: Arc::clone(&slots),
        }));

        Self {
            pool,
            config,
            slots,
            metrics: ConnectionMetrics::default(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn metrics(&self) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            connect_attempts: self.metrics.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.metrics.connect_failures.load(Ordering::Relaxed),
            connections_opened: self.metrics.connections_opened.load(Ordering::Relaxed),
            connections_reused: self.metrics.connections_reused.load(Ordering::Relaxed),
            connections_broken: self.metrics.connections_broken.load(Ordering::Relaxed),
        }
    }

    /// Idle connections currently held for `server_id`.
    pub fn idle_count(&self, server_id: ServerId) -> usize {
        self.slots
            .lock()
            .get(&server_id)
            .map(|slot| slot.idle.lock().len())
            .unwrap_or(0)
    }

    fn slot(&self, server_id: ServerId) -> Arc<ServerSlot> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(server_id).or_insert_with(|| {
            Arc::new(ServerSlot {
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(self.config.max_connections_per_server)),
            })
        });
        Arc::clone(slot)
    }

    /// Slot for `target`, provided the server is still in the pool.
    ///
    /// A removal can land between the availability check and slot creation,
    /// after the reaper has already run. The new slot is dropped again then.
    fn live_slot(&self, target: &Target) -> Result<Arc<ServerSlot>> {
        let slot = self.slot(target.server_id);
        if self.pool.index_of(target.server_id).is_some() {
            return Ok(slot);
        }

        let mut slots = self.slots.lock();
        if slots
            .get(&target.server_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            slots.remove(&target.server_id);
        }
        drop(slots);
        slot.permits.close();
        trace!(server = %target.address, "Server left the pool before its slot was created");
        Err(Error::ServerNotFound(target.address.to_string()))
    }

    /// Get a connection to the server at `index`.
    pub async fn acquire(&self, index: usize) -> Result<Connection> {
        let target = self.pool.target(index)?;
        self.acquire_target(&target).await
    }

    /// Get a connection to `target`.
    ///
    /// A server inside its dead window fails with `ServerUnavailable`
    /// without any I/O. Otherwise an idle connection is reused, or a new one
    /// is opened within the connect timeout. Open failures count against
    /// the server.
    pub async fn acquire_target(&self, target: &Target) -> Result<Connection> {
        self.pool.check_available(target.server_id)?;

        let slot = self.live_slot(target)?;
        let permit = self.wait_for_slot(&slot, target).await?;

        loop {
            let idle = slot.idle.lock().pop();
            let Some(transport) = idle else { break };
            if transport.is_reusable() {
                self.metrics.connections_reused.fetch_add(1, Ordering::Relaxed);
                trace!(server = %target.address, "Reusing idle connection");
                return Ok(Connection::reuse(target, &self.config, permit, transport));
            }
            trace!(server = %target.address, "Discarding stale idle connection");
        }

        self.metrics.connect_attempts.fetch_add(1, Ordering::Relaxed);
        match Connection::connect(target, &self.config, permit).await {
            Ok(conn) => {
                self.metrics.connections_opened.fetch_add(1, Ordering::Relaxed);
                self.pool.record_success_for(target.server_id);
                debug!(server = %target.address, kind = %target.transport, "Connection opened");
                Ok(conn)
            }
            Err(e) => {
                self.metrics.connect_failures.fetch_add(1, Ordering::Relaxed);
                warn!(server = %target.address, error = %e, "Connect failed");
                self.pool.record_failure_for(target.server_id);
                Err(e.into())
            }
        }
    }

    /// Wait for one of the server's connection slots, bounded by the
    /// connect timeout. Running out of time is local contention, not a
    /// server failure.
    async fn wait_for_slot(&self, slot: &ServerSlot, target: &Target) -> Result<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&slot.permits).try_acquire_owned() {
            return Ok(permit);
        }

        trace!(server = %target.address, "Waiting for a connection slot");
        let acquire = Arc::clone(&slot.permits).acquire_owned();
        let permit = if self.config.connect_timeout.is_zero() {
            acquire.await
        } else {
            match tokio::time::timeout(self.config.connect_timeout, acquire).await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!(server = %target.address, "Timed out waiting for a connection slot");
                    return Err(Error::Timeout);
                }
            }
        };
        // Closed only when the server left the pool
        permit.map_err(|_| Error::ServerNotFound(target.address.to_string()))
    }

    /// Hand a connection back with the outcome of its last operation.
    ///
    /// Success keeps the connection for reuse and clears the server's
    /// failure history. Errors break and close it and count against the
    /// server.
    pub async fn release(&self, mut conn: Connection, outcome: Outcome) {
        let server_id = conn.server_id();

        match outcome {
            Outcome::Success => {
                if !self.pool.record_success_for(server_id) {
                    trace!(server = %conn.address(), "Server left the pool, closing connection");
                    conn.close().await;
                    return;
                }
                let slot = self.slots.lock().get(&server_id).cloned();
                let (transport, permit) = conn.into_idle();
                match (slot, transport) {
                    (Some(slot), Some(transport)) => slot.idle.lock().push(transport),
                    (_, Some(transport)) => transport.close().await,
                    (_, None) => {}
                }
                drop(permit);
            }
            Outcome::ProtocolError | Outcome::IoError => {
                conn.mark_broken();
                self.metrics.connections_broken.fetch_add(1, Ordering::Relaxed);
                debug!(server = %conn.address(), ?outcome, "Connection broken");
                conn.close().await;
                self.pool.record_failure_for(server_id);
            }
        }
    }

    /// Close every idle connection.
    pub async fn close_idle(&self) {
        let slots: Vec<Arc<ServerSlot>> = self.slots.lock().values().cloned().collect();
        let mut closed = 0;
        for slot in slots {
            let idle = std::mem::take(&mut *slot.idle.lock());
            for transport in idle {
                transport.close().await;
                closed += 1;
            }
        }
        debug!(closed, "Closed idle connections");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("servers", &self.slots.lock().len())
            .field("metrics", &self.metrics())
            .finish()
    }
}
