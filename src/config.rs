//! Configuration types for the router.

use crate::cluster::FailurePolicy;
use crate::error::{Error, Result};
use crate::hashing::{HashAlgorithm, KeyHasher};
use crate::partitioning::{
    points_for_weight, Distribution, RingLayout, DEFAULT_POINTS_PER_SERVER, MAX_POINTS_PER_SERVER,
};
use crate::types::{parse_server_list, ProtocolMode, ServerSpec};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Initial servers, in pool order.
    pub servers: Vec<ServerSpec>,

    /// Key distribution and failure handling.
    pub pool: PoolConfig,

    /// Connection behavior.
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    /// Create a configuration for the given servers with default settings.
    pub fn new(servers: Vec<ServerSpec>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    /// Create a configuration from a server string such as
    /// `"cache1:11211:2, cache2, /var/run/memcached.sock"`.
    pub fn from_server_list(list: &str) -> Result<Self> {
        Ok(Self::new(parse_server_list(list)?))
    }

    /// Append a server.
    pub fn with_server(mut self, server: ServerSpec) -> Self {
        self.servers.push(server);
        self
    }

    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_connection_config(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Check the whole configuration. Called by `Client::new`.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("server list is empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.servers.len());
        for server in &self.servers {
            if server.weight == 0 {
                return Err(Error::Config(format!(
                    "server {} has weight 0",
                    server.address
                )));
            }
            if points_for_weight(self.pool.points_per_server, server.weight).is_none() {
                return Err(Error::Config(format!(
                    "server {} weight {} exceeds {} ring points",
                    server.address, server.weight, MAX_POINTS_PER_SERVER
                )));
            }
            if !seen.insert(&server.address) {
                return Err(Error::Config(format!(
                    "server {} listed twice",
                    server.address
                )));
            }
        }

        self.pool.validate()?;
        self.connection.validate()
    }
}

/// Key distribution and failure accounting.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Built-in hash algorithm.
    pub hash: HashAlgorithm,

    /// Custom hasher. Takes precedence over `hash` when set.
    pub hasher: Option<Arc<dyn KeyHasher>>,

    /// Modulo or consistent ring.
    pub distribution: Distribution,

    /// Ring points per unit of weight.
    pub points_per_server: u32,

    /// How ring point hashes are derived.
    pub ring_layout: RingLayout,

    /// Route around servers inside a dead window.
    pub skip_dead_servers: bool,

    /// Consecutive failures before a server is marked dead.
    pub failure_threshold: u32,

    /// First dead window.
    pub retry_timeout: Duration,

    /// Ceiling for the doubling dead window.
    pub retry_timeout_max: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let policy = FailurePolicy::default();
        Self {
            hash: HashAlgorithm::Default,
            hasher: None,
            distribution: Distribution::ConsistentRing,
            points_per_server: DEFAULT_POINTS_PER_SERVER,
            ring_layout: RingLayout::PerPoint,
            skip_dead_servers: false,
            failure_threshold: policy.failure_threshold,
            retry_timeout: policy.retry_timeout,
            retry_timeout_max: policy.retry_timeout_max,
        }
    }
}

impl PoolConfig {
    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    /// Use a custom hasher instead of a built-in algorithm.
    pub fn with_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_points_per_server(mut self, points: u32) -> Self {
        self.points_per_server = points;
        self
    }

    /// Use the ketama layout, MD5 digests split into four points each.
    pub fn with_ketama(mut self) -> Self {
        self.distribution = Distribution::ConsistentRing;
        self.ring_layout = RingLayout::Ketama;
        self
    }

    pub fn with_skip_dead_servers(mut self, enabled: bool) -> Self {
        self.skip_dead_servers = enabled;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn with_retry_timeout_max(mut self, timeout: Duration) -> Self {
        self.retry_timeout_max = timeout;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            failure_threshold: self.failure_threshold,
            retry_timeout: self.retry_timeout,
            retry_timeout_max: self.retry_timeout_max,
        }
    }

    /// The hasher keys and ring points go through.
    pub fn key_hasher(&self) -> Arc<dyn KeyHasher> {
        match &self.hasher {
            Some(hasher) => Arc::clone(hasher),
            None => Arc::new(self.hash) as Arc<dyn KeyHasher>,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.points_per_server == 0 {
            return Err(Error::Config(
                "points_per_server must be at least 1".to_string(),
            ));
        }
        if self.points_per_server > MAX_POINTS_PER_SERVER {
            return Err(Error::Config(format!(
                "points_per_server must be at most {}",
                MAX_POINTS_PER_SERVER
            )));
        }
        self.failure_policy().validate()
    }
}

/// Connection behavior.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on opening a connection, and on waiting for a free slot.
    /// Zero means no timeout.
    pub connect_timeout: Duration,

    /// Bound on each send or receive. Zero means no timeout.
    pub io_timeout: Duration,

    /// Simultaneous connections per server.
    pub max_connections_per_server: usize,

    /// Text or binary protocol.
    pub protocol: ProtocolMode,

    /// Reach network servers over UDP instead of TCP.
    pub use_udp: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_secs(1),
            max_connections_per_server: 4,
            protocol: ProtocolMode::Text,
            use_udp: false,
        }
    }
}

impl ConnectionConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_max_connections_per_server(mut self, max: usize) -> Self {
        self.max_connections_per_server = max;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolMode) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_udp(mut self, enabled: bool) -> Self {
        self.use_udp = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections_per_server == 0 {
            return Err(Error::Config(
                "max_connections_per_server must be at least 1".to_string(),
            ));
        }
        if self.use_udp && self.protocol == ProtocolMode::Binary {
            return Err(Error::Config(
                "the binary protocol is not supported over UDP".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> Vec<ServerSpec> {
        vec![
            ServerSpec::tcp("10.0.0.1", 11211),
            ServerSpec::tcp("10.0.0.2", 11211),
        ]
    }

    #[test]
    fn test_defaults_validate() {
        let config = ClientConfig::new(servers());
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.points_per_server, 160);
        assert!(!config.pool.skip_dead_servers);
        assert_eq!(config.connection.max_connections_per_server, 4);
    }

    #[test]
    fn test_empty_server_list() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_and_zero_weight() {
        let dup = ClientConfig::new(servers()).with_server(ServerSpec::tcp("10.0.0.1", 11211));
        assert!(dup.validate().is_err());

        let zero = ClientConfig::new(vec![ServerSpec::tcp("a", 1).with_weight(0)]);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_weight_bounded_by_ring_points() {
        let heavy = ClientConfig::from_server_list("a:11211:4294967295").unwrap();
        assert!(matches!(heavy.validate(), Err(Error::Config(_))));

        // 160 points per unit of weight: 6553 fits, 6554 does not
        let fits = ClientConfig::new(vec![ServerSpec::tcp("a", 1).with_weight(6553)]);
        assert!(fits.validate().is_ok());
        let over = ClientConfig::new(vec![ServerSpec::tcp("a", 1).with_weight(6554)]);
        assert!(over.validate().is_err());

        // The bound follows the configured point count
        let sparse = over.with_pool_config(PoolConfig::default().with_points_per_server(1));
        assert!(sparse.validate().is_ok());
        assert!(PoolConfig::default()
            .with_points_per_server(MAX_POINTS_PER_SERVER + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_pool_builders() {
        let pool = PoolConfig::default()
            .with_hash(HashAlgorithm::Md5)
            .with_ketama()
            .with_skip_dead_servers(true)
            .with_failure_threshold(3)
            .with_retry_timeout(Duration::from_secs(1))
            .with_retry_timeout_max(Duration::from_secs(30));

        assert_eq!(pool.ring_layout, RingLayout::Ketama);
        assert_eq!(pool.key_hasher().name(), "md5");
        let policy = pool.failure_policy();
        assert_eq!(policy.failure_threshold, 3);
        assert_eq!(policy.retry_timeout_max, Duration::from_secs(30));
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_invalid_pool_settings() {
        assert!(PoolConfig::default().with_points_per_server(0).validate().is_err());
        assert!(PoolConfig::default().with_failure_threshold(0).validate().is_err());
        assert!(PoolConfig::default()
            .with_retry_timeout(Duration::from_secs(120))
            .validate()
            .is_err());
    }

    #[test]
    fn test_connection_settings() {
        assert!(ConnectionConfig::default()
            .with_max_connections_per_server(0)
            .validate()
            .is_err());
        assert!(ConnectionConfig::default()
            .with_udp(true)
            .with_protocol(ProtocolMode::Binary)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_server_list() {
        let config = ClientConfig::from_server_list("a:11211:2, b").unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].weight, 2);
        assert!(ClientConfig::from_server_list("a:bad").is_err());
    }
}
