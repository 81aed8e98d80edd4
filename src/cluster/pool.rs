//! The server pool.
//!
//! Servers, their liveness and the distribution state live behind one
//! `RwLock`. Membership changes take the write lock and bump the pool
//! version. The ring is rebuilt lazily: the first `select` that sees a stale
//! ring upgrades to the write lock, rebuilds, and downgrades again.

use super::events::{PoolEvent, PoolEventListener};
use super::server::{FailurePolicy, ServerEntry};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::hashing::KeyHasher;
use crate::partitioning::{
    points_for_weight, Distribution, DistributionStrategy, HashRing, RingLayout,
    MAX_POINTS_PER_SERVER,
};
use crate::types::{PoolSnapshot, ServerAddress, ServerId, ServerSpec, ServerState, TransportKind};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// A server chosen for a key, captured under the pool lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub server_id: ServerId,
    /// Position in the pool when the target was taken.
    pub index: usize,
    pub address: ServerAddress,
    pub transport: TransportKind,
}

struct PoolState {
    servers: Vec<ServerEntry>,
    version: u64,
    strategy: DistributionStrategy,
}

impl PoolState {
    fn position(&self, id: ServerId) -> Option<usize> {
        self.servers.iter().position(|s| s.id() == id)
    }

    fn target(&self, index: usize) -> Target {
        let entry = &self.servers[index];
        Target {
            server_id: entry.id(),
            index,
            address: entry.address().clone(),
            transport: entry.transport(),
        }
    }

    fn needs_rebuild(&self) -> bool {
        let count = self.servers.len();
        if !self.strategy.is_current(self.version, count) {
            return true;
        }
        let corrupt = self.strategy.is_corrupt(count);
        debug_assert!(!corrupt, "ring has no points for {} servers", count);
        if corrupt {
            warn!(servers = count, version = self.version, "Empty ring for non-empty pool, rebuilding");
        }
        corrupt
    }
}

/// Ordered collection of cache servers plus the distribution over them.
pub struct ServerPool {
    state: RwLock<PoolState>,
    hasher: Arc<dyn KeyHasher>,
    distribution: Distribution,
    points_per_server: u32,
    layout: RingLayout,
    skip_dead: bool,
    policy: FailurePolicy,
    next_id: AtomicU64,
    rebuilds: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn PoolEventListener>>>,
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let strategy = match config.distribution {
            Distribution::Modulo => DistributionStrategy::Modulo,
            Distribution::ConsistentRing => DistributionStrategy::ConsistentRing {
                ring: HashRing::empty(),
                version: 0,
            },
        };

        Ok(Self {
            state: RwLock::new(PoolState {
                servers: Vec::new(),
                version: 0,
                strategy,
            }),
            hasher: config.key_hasher(),
            distribution: config.distribution,
            points_per_server: config.points_per_server,
            layout: config.ring_layout,
            skip_dead: config.skip_dead_servers,
            policy: config.failure_policy(),
            next_id: AtomicU64::new(1),
            rebuilds: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Create a pool holding `servers` in order. Bad entries are
    /// configuration errors.
    pub fn with_servers<I>(config: &PoolConfig, servers: I) -> Result<Self>
    where
        I: IntoIterator<Item = ServerSpec>,
    {
        let pool = Self::new(config)?;
        for spec in servers {
            pool.insert(spec).map_err(|e| match e {
                Error::InvalidServer(msg) => Error::Config(msg),
                other => other,
            })?;
        }
        Ok(pool)
    }

    /// Register a listener for pool events.
    pub fn subscribe(&self, listener: Arc<dyn PoolEventListener>) {
        self.listeners.write().push(listener);
    }

    fn emit(&self, event: PoolEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn insert(&self, spec: ServerSpec) -> Result<(ServerId, ServerAddress)> {
        if spec.weight == 0 {
            return Err(Error::InvalidServer(format!(
                "server {} has weight 0",
                spec.address
            )));
        }
        if points_for_weight(self.points_per_server, spec.weight).is_none() {
            return Err(Error::InvalidServer(format!(
                "server {} weight {} exceeds {} ring points",
                spec.address, spec.weight, MAX_POINTS_PER_SERVER
            )));
        }

        let mut state = self.state.write();
        if state.servers.iter().any(|s| *s.address() == spec.address) {
            return Err(Error::InvalidServer(format!(
                "server {} is already in the pool",
                spec.address
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let address = spec.address.clone();
        state.servers.push(ServerEntry::new(id, spec, &self.policy));
        state.version += 1;
        debug!(server_id = id, %address, version = state.version, "Server added");
        Ok((id, address))
    }

    /// Append a server. Rejects weight 0, weights past the ring point bound,
    /// and addresses already present.
    pub fn add(&self, spec: ServerSpec) -> Result<ServerId> {
        let (server_id, address) = self.insert(spec)?;
        self.emit(PoolEvent::ServerAdded { server_id, address });
        Ok(server_id)
    }

    /// Remove the server listening at `address`.
    pub fn remove(&self, address: &ServerAddress) -> Result<ServerId> {
        let server_id = {
            let mut state = self.state.write();
            let index = state
                .servers
                .iter()
                .position(|s| s.address() == address)
                .ok_or_else(|| Error::ServerNotFound(address.to_string()))?;
            let entry = state.servers.remove(index);
            state.version += 1;
            debug!(server_id = entry.id(), %address, version = state.version, "Server removed");
            entry.id()
        };

        self.emit(PoolEvent::ServerRemoved {
            server_id,
            address: address.clone(),
        });
        Ok(server_id)
    }

    /// Membership version. Bumped by every add and remove.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn len(&self) -> usize {
        self.state.read().servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().servers.is_empty()
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn failure_policy(&self) -> &FailurePolicy {
        &self.policy
    }

    pub fn skip_dead_servers(&self) -> bool {
        self.skip_dead
    }

    /// Index of the server listening at `address`.
    pub fn position(&self, address: &ServerAddress) -> Option<usize> {
        self.state
            .read()
            .servers
            .iter()
            .position(|s| s.address() == address)
    }

    /// Current index of server `id`, if it is still in the pool.
    pub fn index_of(&self, id: ServerId) -> Option<usize> {
        self.state.read().position(id)
    }

    /// Copy of the entry at `index`.
    pub fn server(&self, index: usize) -> Option<ServerEntry> {
        self.state.read().servers.get(index).cloned()
    }

    /// The server at `index` as a connection target.
    pub fn target(&self, index: usize) -> Result<Target> {
        let state = self.state.read();
        if index >= state.servers.len() {
            return Err(index_not_found(index));
        }
        Ok(state.target(index))
    }

    /// Fails with `ServerUnavailable` while server `id` is inside its dead
    /// window, and with `ServerNotFound` once it has left the pool.
    pub fn check_available(&self, id: ServerId) -> Result<()> {
        let state = self.state.read();
        let index = state
            .position(id)
            .ok_or_else(|| Error::ServerNotFound(format!("id {}", id)))?;
        match state.servers[index].unavailable(Instant::now()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read guard over a distribution state that matches the current version.
    fn current(&self) -> Result<RwLockReadGuard<'_, PoolState>> {
        {
            let state = self.state.read();
            if !state.needs_rebuild() {
                return Ok(state);
            }
        }

        let mut state = self.state.write();
        // Another caller may have rebuilt while we waited for the lock
        if state.needs_rebuild() {
            self.rebuild_locked(&mut state)?;
        }
        Ok(RwLockWriteGuard::downgrade(state))
    }

    fn rebuild_locked(&self, state: &mut PoolState) -> Result<()> {
        match self.distribution {
            Distribution::Modulo => state.strategy = DistributionStrategy::Modulo,
            Distribution::ConsistentRing => {
                let ring = HashRing::build(
                    state.servers.iter().map(|s| (s.identity(), s.weight())),
                    self.hasher.as_ref(),
                    self.points_per_server,
                    self.layout,
                )?;
                debug!(
                    version = state.version,
                    servers = state.servers.len(),
                    points = ring.len(),
                    "Ring rebuilt"
                );
                state.strategy = DistributionStrategy::ConsistentRing {
                    ring,
                    version: state.version,
                };
            }
        }
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Rebuild the distribution state now, even if it is current.
    pub fn rebuild(&self) -> Result<()> {
        let mut state = self.state.write();
        self.rebuild_locked(&mut state)
    }

    /// Number of distribution rebuilds so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Copy of the current ring, or `None` in modulo mode.
    pub fn ring(&self) -> Result<Option<HashRing>> {
        Ok(self.current()?.strategy.ring().cloned())
    }

    /// Index of the server responsible for `key`.
    pub fn select(&self, key: &[u8]) -> Result<usize> {
        self.select_target(key, &[]).map(|t| t.index)
    }

    /// Like [`select`](Self::select) but never picks a server in `excluded`.
    pub fn select_excluding(&self, key: &[u8], excluded: &[ServerId]) -> Result<usize> {
        self.select_target(key, excluded).map(|t| t.index)
    }

    /// Pick the server for `key`.
    ///
    /// The primary is the strategy's answer. A server in `excluded`, or a
    /// dead one when dead servers are skipped, is passed over: the ring walks
    /// on to the next server that owns a point, modulo has nowhere to go.
    pub fn select_target(&self, key: &[u8], excluded: &[ServerId]) -> Result<Target> {
        let state = self.current()?;
        let count = state.servers.len();
        if count == 0 {
            return Err(Error::NoServersAvailable);
        }

        let hash = self.hasher.hash(key);
        let primary = state
            .strategy
            .select(hash, count)
            .ok_or(Error::NoServersAvailable)?;

        let now = Instant::now();
        let eligible = |index: usize| {
            let entry = &state.servers[index];
            !excluded.contains(&entry.id()) && (!self.skip_dead || entry.is_available(now))
        };

        if eligible(primary) {
            return Ok(state.target(primary));
        }

        if let Some(index) = state.strategy.candidates(hash, count).find(|&i| eligible(i)) {
            trace!(hash, from = primary, to = index, "Passed over unavailable server");
            return Ok(state.target(index));
        }

        if excluded.is_empty() {
            if let Some(err) = state.servers[primary].unavailable(now) {
                return Err(err);
            }
        }
        Err(Error::AllServersDown {
            attempts: excluded.len(),
        })
    }

    /// Put the server at `index` in a dead window. The ring is untouched.
    pub fn mark_dead(&self, index: usize, retry_timeout: Duration) -> Result<()> {
        let event = {
            let mut state = self.state.write();
            let entry = state
                .servers
                .get_mut(index)
                .ok_or_else(|| index_not_found(index))?;
            entry.mark_dead(Instant::now(), retry_timeout);
            PoolEvent::ServerDead {
                server_id: entry.id(),
                address: entry.address().clone(),
                retry_timeout,
            }
        };
        self.emit(event);
        Ok(())
    }

    /// Clear the dead state and failure history of the server at `index`.
    pub fn mark_alive(&self, index: usize) -> Result<()> {
        self.revive_where(|state| state.servers.get(index).map(|_| index))
            .map(|_| ())
            .ok_or_else(|| index_not_found(index))
    }

    /// Count a failure against the server at `index`. Returns the dead
    /// window if this failure started one.
    pub fn record_failure(&self, index: usize) -> Result<Option<Duration>> {
        self.fail_where(|state| state.servers.get(index).map(|_| index))
            .ok_or_else(|| index_not_found(index))
    }

    /// Reset the failure bookkeeping of the server at `index`.
    pub fn record_success(&self, index: usize) -> Result<()> {
        self.mark_alive(index)
    }

    /// Failure accounting by id. `None` if the server has left the pool.
    pub(crate) fn record_failure_for(&self, id: ServerId) -> Option<Option<Duration>> {
        self.fail_where(|state| state.position(id))
    }

    /// Success accounting by id. Returns false if the server has left the pool.
    pub(crate) fn record_success_for(&self, id: ServerId) -> bool {
        {
            let state = self.state.read();
            match state.position(id) {
                None => return false,
                Some(index) => {
                    let entry = &state.servers[index];
                    if entry.state() == ServerState::Live
                        && entry.failure_count() == 0
                        && entry.retry_timeout() == self.policy.retry_timeout
                    {
                        return true;
                    }
                }
            }
        }
        self.revive_where(|state| state.position(id)).is_some()
    }

    fn fail_where<F>(&self, locate: F) -> Option<Option<Duration>>
    where
        F: FnOnce(&PoolState) -> Option<usize>,
    {
        let (window, event) = {
            let mut state = self.state.write();
            let index = locate(&*state)?;
            let entry = &mut state.servers[index];
            let window = entry.record_failure(Instant::now(), &self.policy);
            debug!(
                server_id = entry.id(),
                server = %entry.address(),
                failures = entry.failure_count(),
                "Server failure recorded"
            );
            let event = window.map(|retry_timeout| PoolEvent::ServerDead {
                server_id: entry.id(),
                address: entry.address().clone(),
                retry_timeout,
            });
            (window, event)
        };

        if let Some(event) = event {
            warn!(server_id = event.server_id(), ?window, "Server marked dead after repeated failures");
            self.emit(event);
        }
        Some(window)
    }

    fn revive_where<F>(&self, locate: F) -> Option<()>
    where
        F: FnOnce(&PoolState) -> Option<usize>,
    {
        let event = {
            let mut state = self.state.write();
            let index = locate(&*state)?;
            let entry = &mut state.servers[index];
            let was_dead = entry.mark_alive(&self.policy);
            was_dead.then(|| PoolEvent::ServerRevived {
                server_id: entry.id(),
                address: entry.address().clone(),
            })
        };

        if let Some(event) = event {
            info!(server_id = event.server_id(), "Server revived");
            self.emit(event);
        }
        Some(())
    }

    /// Read-only copy of the pool for diagnostics.
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.read();
        let now = Instant::now();
        PoolSnapshot {
            version: state.version,
            distribution: self.distribution.to_string(),
            hash: self.hasher.name().to_string(),
            servers: state
                .servers
                .iter()
                .enumerate()
                .map(|(index, entry)| entry.snapshot(index, now))
                .collect(),
        }
    }
}

fn index_not_found(index: usize) -> Error {
    Error::ServerNotFound(format!("index {}", index))
}

impl std::fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ServerPool")
            .field("servers", &state.servers.len())
            .field("version", &state.version)
            .field("distribution", &self.distribution)
            .field("hash", &self.hasher.name())
            .field("skip_dead", &self.skip_dead)
            .finish()
    }
}
