//! Core types used throughout the router.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Process-unique server identifier. Stays fixed when other servers are
/// removed, unlike the server's index in the pool.
pub type ServerId = u64;

/// Port used when a server string does not name one.
pub const DEFAULT_PORT: u16 = 11211;

/// Where a cache server listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerAddress {
    /// Hostname or IP literal plus port.
    Tcp { host: String, port: u16 },
    /// Local (Unix domain) socket path.
    Unix(PathBuf),
}

impl ServerAddress {
    /// Create a network address.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ServerAddress::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Create a local socket address.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ServerAddress::Unix(path.into())
    }

    /// Whether this address names a local socket.
    pub fn is_local_socket(&self) -> bool {
        matches!(self, ServerAddress::Unix(_))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddress::Tcp { host, port } if host.contains(':') => {
                write!(f, "[{}]:{}", host, port)
            }
            ServerAddress::Tcp { host, port } => write!(f, "{}:{}", host, port),
            ServerAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Transport used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Tcp,
    Udp,
    Unix,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Unix => write!(f, "unix"),
        }
    }
}

/// Wire protocol spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolMode {
    #[default]
    Text,
    Binary,
}

/// A server as given at construction or to `add_server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    /// Where the server listens.
    pub address: ServerAddress,
    /// Relative share of keys. Must be positive.
    pub weight: u32,
    /// How to reach it.
    pub transport: TransportKind,
}

impl ServerSpec {
    /// Create a spec with the transport implied by the address.
    pub fn new(address: ServerAddress, weight: u32) -> Self {
        let transport = if address.is_local_socket() {
            TransportKind::Unix
        } else {
            TransportKind::Tcp
        };
        Self {
            address,
            weight,
            transport,
        }
    }

    /// Create a TCP server spec with weight 1.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(ServerAddress::tcp(host, port), 1)
    }

    /// Create a local socket server spec with weight 1.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::new(ServerAddress::unix(path), 1)
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Use UDP instead of TCP. Local sockets are left alone.
    pub fn with_udp(mut self) -> Self {
        if self.transport == TransportKind::Tcp {
            self.transport = TransportKind::Udp;
        }
        self
    }
}

impl FromStr for ServerSpec {
    type Err = Error;

    /// Parse `host`, `host:port`, `host:port:weight`, `[v6]:port:weight`
    /// or a local socket path starting with `/`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("empty server entry".to_string()));
        }
        if s.starts_with('/') {
            return Ok(ServerSpec::unix(s));
        }

        let (host, rest) = if let Some(stripped) = s.strip_prefix('[') {
            let end = stripped
                .find(']')
                .ok_or_else(|| Error::Config(format!("unterminated IPv6 literal: {}", s)))?;
            let rest = &stripped[end + 1..];
            let rest = match rest.strip_prefix(':') {
                Some(rest) => rest,
                None if rest.is_empty() => rest,
                None => return Err(Error::Config(format!("invalid server entry: {}", s))),
            };
            (&stripped[..end], rest)
        } else {
            match s.split_once(':') {
                Some((host, rest)) => (host, rest),
                None => (s, ""),
            }
        };

        if host.is_empty() {
            return Err(Error::Config(format!("missing host in: {}", s)));
        }

        let mut fields = rest.split(':');
        let port = match fields.next() {
            None | Some("") => DEFAULT_PORT,
            Some(port) => parse_port(port, s)?,
        };
        let weight = match fields.next() {
            None => 1,
            Some(weight) => parse_weight(weight, s)?,
        };
        if fields.next().is_some() {
            return Err(Error::Config(format!("too many fields in: {}", s)));
        }

        Ok(ServerSpec::tcp(host, port).with_weight(weight))
    }
}

fn parse_port(field: &str, entry: &str) -> Result<u16> {
    match field.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::Config(format!("invalid port in: {}", entry))),
        Ok(port) => Ok(port),
    }
}

fn parse_weight(field: &str, entry: &str) -> Result<u32> {
    match field.parse::<u32>() {
        Ok(0) | Err(_) => Err(Error::Config(format!("invalid weight in: {}", entry))),
        Ok(weight) => Ok(weight),
    }
}

/// Parse a comma separated server list such as
/// `"cache1:11211:2, cache2, /var/run/memcached.sock"`.
pub fn parse_server_list(list: &str) -> Result<Vec<ServerSpec>> {
    list.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Liveness of a server as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Never contacted.
    Unknown,
    /// Last contact succeeded.
    Live,
    /// Failed; no new connections until `until`.
    Dead { until: Instant },
}

/// Coarse server status for snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Unknown,
    Live,
    Dead,
}

/// Explicit state change requested through the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStateChange {
    /// Clear any dead state and failure history.
    Alive,
    /// Mark dead for the given window.
    Dead { retry_timeout: Duration },
}

/// Read-only view of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub id: ServerId,
    pub index: usize,
    pub address: ServerAddress,
    pub transport: TransportKind,
    pub weight: u32,
    pub status: ServerStatus,
    pub failure_count: u32,
    pub retry_timeout: Duration,
    /// Time left in the dead window, if any.
    pub retry_in: Option<Duration>,
}

/// Read-only view of the whole pool, for diagnostics and tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub version: u64,
    pub distribution: String,
    pub hash: String,
    pub servers: Vec<ServerSnapshot>,
}

impl PoolSnapshot {
    /// Number of servers currently inside a dead window.
    pub fn dead_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.status == ServerStatus::Dead && s.retry_in.is_some())
            .count()
    }
}
