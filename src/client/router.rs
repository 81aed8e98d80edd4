//! Key routing: pick a server, then get a connection to it.

use crate::cluster::ServerPool;
use crate::error::{Error, Result};
use crate::network::{Connection, ConnectionManager};
use crate::partitioning::Distribution;
use crate::types::{ServerAddress, ServerId};
use std::sync::Arc;
use tracing::debug;

/// A key's server and a connection to it.
#[derive(Debug)]
pub struct Route {
    pub server_id: ServerId,
    /// Position of the server when the route was taken.
    pub server_index: usize,
    pub address: ServerAddress,
    pub connection: Connection,
}

impl Route {
    pub fn into_connection(self) -> Connection {
        self.connection
    }
}

/// Composes server selection with connection acquisition.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    pool: Arc<ServerPool>,
    manager: Arc<ConnectionManager>,
}

impl RequestRouter {
    pub fn new(pool: Arc<ServerPool>, manager: Arc<ConnectionManager>) -> Self {
        Self { pool, manager }
    }

    /// Whether a failed acquire moves on to the next server on the ring.
    fn fails_over(&self) -> bool {
        self.pool.skip_dead_servers() && self.pool.distribution() == Distribution::ConsistentRing
    }

    /// Route `key` to its server and return a connection to it.
    ///
    /// With a consistent ring and dead servers skipped, a server that
    /// cannot be reached is excluded and the key is selected again, at most
    /// once per server. Otherwise the acquire error is returned as is.
    pub async fn route(&self, key: &[u8]) -> Result<Route> {
        let fails_over = self.fails_over();
        let limit = self.pool.len().max(1);
        let mut excluded: Vec<ServerId> = Vec::new();

        loop {
            let target = self.pool.select_target(key, &excluded)?;

            match self.manager.acquire_target(&target).await {
                Ok(connection) => {
                    return Ok(Route {
                        server_id: target.server_id,
                        server_index: target.index,
                        address: target.address,
                        connection,
                    })
                }
                Err(e) if fails_over && is_failover_error(&e) => {
                    excluded.push(target.server_id);
                    debug!(
                        server = %target.address,
                        error = %e,
                        attempt = excluded.len(),
                        "Acquire failed, trying next server"
                    );
                    if excluded.len() >= limit {
                        return Err(Error::AllServersDown {
                            attempts: excluded.len(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_failover_error(e: &Error) -> bool {
    matches!(e, Error::Network(_) | Error::ServerUnavailable { .. })
}
