//! Key-to-server distribution strategies.

use super::hashring::HashRing;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How keys are spread over the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Distribution {
    /// `hash % server_count`. Cheap, but nearly every key moves when the
    /// pool size changes.
    Modulo,
    /// Weighted consistent hash ring. About 1/N of keys move per change.
    #[default]
    ConsistentRing,
}

impl Distribution {
    pub fn as_str(self) -> &'static str {
        match self {
            Distribution::Modulo => "modulo",
            Distribution::ConsistentRing => "consistent",
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distribution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "modulo" | "modula" => Ok(Distribution::Modulo),
            "consistent" | "ketama" | "ring" => Ok(Distribution::ConsistentRing),
            other => Err(Error::Config(format!("unknown distribution: {}", other))),
        }
    }
}

/// Selection state for one pool version.
///
/// Modulo needs nothing beyond the server count. The ring variant records
/// the pool version it was built from so readers can tell when it is stale.
#[derive(Debug, Clone)]
pub enum DistributionStrategy {
    Modulo,
    ConsistentRing { ring: HashRing, version: u64 },
}

impl DistributionStrategy {
    /// Whether this state can serve lookups for `version` of a pool with
    /// `server_count` servers.
    pub fn is_current(&self, version: u64, server_count: usize) -> bool {
        match self {
            DistributionStrategy::Modulo => true,
            DistributionStrategy::ConsistentRing { ring, version: built } => {
                *built == version && ring.server_count() == server_count
            }
        }
    }

    /// A non-empty pool must never be served by an empty ring.
    pub fn is_corrupt(&self, server_count: usize) -> bool {
        match self {
            DistributionStrategy::Modulo => false,
            DistributionStrategy::ConsistentRing { ring, .. } => {
                server_count > 0 && ring.is_empty()
            }
        }
    }

    /// The primary server for `hash`.
    #[inline]
    pub fn select(&self, hash: u32, server_count: usize) -> Option<usize> {
        if server_count == 0 {
            return None;
        }
        if server_count == 1 {
            return Some(0);
        }
        match self {
            DistributionStrategy::Modulo => Some(hash as usize % server_count),
            DistributionStrategy::ConsistentRing { ring, .. } => ring.lookup(hash),
        }
    }

    /// Servers to try for `hash`, primary first. Modulo offers only the
    /// primary; the ring offers every server in ring order.
    pub fn candidates(&self, hash: u32, server_count: usize) -> Box<dyn Iterator<Item = usize> + '_> {
        match self {
            DistributionStrategy::Modulo => Box::new(self.select(hash, server_count).into_iter()),
            DistributionStrategy::ConsistentRing { ring, .. } => Box::new(ring.walk(hash)),
        }
    }

    pub fn ring(&self) -> Option<&HashRing> {
        match self {
            DistributionStrategy::Modulo => None,
            DistributionStrategy::ConsistentRing { ring, .. } => Some(ring),
        }
    }
}
