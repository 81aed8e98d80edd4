//! The client facade.

mod router;

pub use router::{RequestRouter, Route};

use crate::buffer::ByteBuffer;
use crate::cluster::{LoggingEventListener, ServerPool, Target};
use crate::config::ClientConfig;
use crate::error::{Error, NetworkError, Result};
use crate::network::protocol::{encode_flush, parse_flush_reply};
use crate::network::{Connection, ConnectionManager, ConnectionMetricsSnapshot, Outcome};
use crate::types::{PoolSnapshot, ServerAddress, ServerId, ServerSpec, ServerStateChange};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maps keys to cache servers and hands out connections to them.
pub struct Client {
    pool: Arc<ServerPool>,
    manager: Arc<ConnectionManager>,
    router: RequestRouter,
    config: ClientConfig,
    request_id: AtomicU16,
}

impl Client {
    /// Create a client. Fails with `Error::Config` on an invalid
    /// configuration, including an empty server list.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let specs = config
            .servers
            .iter()
            .cloned()
            .map(|spec| apply_transport(spec, &config));
        let pool = Arc::new(ServerPool::with_servers(&config.pool, specs)?);
        pool.subscribe(Arc::new(LoggingEventListener));

        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&pool),
            config.connection.clone(),
        ));
        let router = RequestRouter::new(Arc::clone(&pool), Arc::clone(&manager));

        info!(
            servers = config.servers.len(),
            distribution = %config.pool.distribution,
            hash = config.pool.key_hasher().name(),
            skip_dead = config.pool.skip_dead_servers,
            "Client created"
        );

        Ok(Self {
            pool,
            manager,
            router,
            config,
            request_id: AtomicU16::new(0),
        })
    }

    /// Create a client with default settings from a server string.
    pub fn from_server_list(list: &str) -> Result<Self> {
        Self::new(ClientConfig::from_server_list(list)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn connection_metrics(&self) -> ConnectionMetricsSnapshot {
        self.manager.metrics()
    }

    /// Route `key` to its server and return a connection to it.
    pub async fn route(&self, key: impl AsRef<[u8]>) -> Result<Route> {
        self.router.route(key.as_ref()).await
    }

    /// Hand back a connection obtained from [`route`](Self::route).
    pub async fn report_outcome(&self, connection: Connection, outcome: Outcome) {
        self.manager.release(connection, outcome).await
    }

    /// Add a server at runtime.
    pub fn add_server(&self, spec: ServerSpec) -> Result<ServerId> {
        self.pool.add(apply_transport(spec, &self.config))
    }

    /// Remove a server at runtime. Its idle connections are dropped.
    pub fn remove_server(&self, address: &ServerAddress) -> Result<ServerId> {
        self.pool.remove(address)
    }

    /// Force a server alive or dead.
    pub fn set_server_state(&self, address: &ServerAddress, change: ServerStateChange) -> Result<()> {
        let index = self
            .pool
            .position(address)
            .ok_or_else(|| Error::ServerNotFound(address.to_string()))?;
        match change {
            ServerStateChange::Alive => self.pool.mark_alive(index),
            ServerStateChange::Dead { retry_timeout } => self.pool.mark_dead(index, retry_timeout),
        }
    }

    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }

    /// Invalidate every item on every server, optionally after `expire`
    /// seconds.
    ///
    /// All servers are visited even if some fail; the first failure is
    /// returned.
    pub async fn flush_all(&self, expire: u32) -> Result<()> {
        let targets: Vec<Target> = (0..self.pool.len())
            .filter_map(|index| self.pool.target(index).ok())
            .collect();

        let mut first_error = None;
        let mut flushed = 0;
        for target in &targets {
            match self.flush_server(target, expire).await {
                Ok(()) => {
                    flushed += 1;
                    debug!(server = %target.address, "Flushed");
                }
                Err(e) => {
                    warn!(server = %target.address, error = %e, "Flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(flushed, servers = targets.len(), "flush_all finished");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn flush_server(&self, target: &Target, expire: u32) -> Result<()> {
        let mut conn = self.manager.acquire_target(target).await?;
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);

        let mut request = ByteBuffer::with_block_size(64);
        let expects_reply = encode_flush(
            &mut request,
            conn.protocol_mode(),
            conn.transport_kind(),
            expire,
            request_id,
        )?;

        let result = exchange(&mut conn, request.as_bytes(), expects_reply).await;
        let outcome = match &result {
            Ok(()) => Outcome::Success,
            Err(NetworkError::Protocol(_)) => Outcome::ProtocolError,
            Err(_) => Outcome::IoError,
        };
        self.manager.release(conn, outcome).await;
        result.map_err(Error::from)
    }

    /// Close idle connections. Connections still checked out are closed
    /// when they are reported back with an error, or reused otherwise.
    pub async fn shutdown(&self) {
        self.manager.close_idle().await;
        info!("Client shut down");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.pool)
            .field("connections", &self.manager)
            .finish()
    }
}

fn apply_transport(spec: ServerSpec, config: &ClientConfig) -> ServerSpec {
    if config.connection.use_udp {
        spec.with_udp()
    } else {
        spec
    }
}

/// Send `request` and, if an answer is expected, read until a complete
/// flush reply has arrived.
async fn exchange(
    conn: &mut Connection,
    request: &[u8],
    expects_reply: bool,
) -> std::result::Result<(), NetworkError> {
    conn.send(request).await?;
    if !expects_reply {
        return Ok(());
    }

    let mode = conn.protocol_mode();
    let mut reply = ByteBuffer::with_block_size(64).with_max_capacity(4096);
    let mut chunk = [0u8; 256];
    loop {
        let n = conn.recv(&mut chunk).await?;
        reply
            .append(&chunk[..n])
            .map_err(|e| NetworkError::Protocol(e.to_string()))?;
        if parse_flush_reply(mode, reply.as_bytes())?.is_some() {
            return Ok(());
        }
    }
}
