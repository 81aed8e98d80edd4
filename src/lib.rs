//! Key distribution and connection management for memcached-style clients.
//!
//! This crate decides which cache server handles a key, keeps that decision
//! stable as the server pool changes, hands out connections to servers, and
//! tracks server failures so a bad server is skipped instead of hammered.
//!
//! # Features
//!
//! - Built-in memcached key hashes (one-at-a-time, MD5, CRC32, FNV, Hsieh,
//!   Murmur, xxHash) or any custom [`KeyHasher`]
//! - Modulo or weighted consistent-ring distribution, ketama-compatible
//! - Lazy ring rebuild on membership change, behind a single `RwLock`
//! - Per-server connection reuse and concurrency limits over TCP, UDP or a
//!   local socket, with every I/O step time-bounded
//! - Failure thresholds, dead windows and capped exponential backoff
//!
//! # Example
//!
//! ```rust,no_run
//! use memrouter::{Client, ClientConfig, Outcome, PoolConfig};
//! use memrouter::hashing::HashAlgorithm;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_server_list("10.0.0.1:11211, 10.0.0.2:11211:2")?
//!         .with_pool_config(
//!             PoolConfig::default()
//!                 .with_hash(HashAlgorithm::Md5)
//!                 .with_ketama()
//!                 .with_skip_dead_servers(true),
//!         );
//!     let client = Client::new(config)?;
//!
//!     let route = client.route("user:123").await?;
//!     println!("user:123 lives on {}", route.address);
//!
//!     // ... talk to the server over route.connection ...
//!
//!     client.report_outcome(route.into_connection(), Outcome::Success).await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Client API                  │
//! │  • route(key) -> Route                      │
//! │  • report_outcome(conn, outcome)            │
//! │  • add_server / remove_server / flush_all   │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │               RequestRouter                 │
//! └─────────────────────────────────────────────┘
//!           │                       │
//!           ▼                       ▼
//! ┌──────────────────┐    ┌──────────────────────┐
//! │    ServerPool    │◄───│  ConnectionManager   │
//! │ hash → ring/mod  │    │ slots, reuse, backoff│
//! └──────────────────┘    └──────────────────────┘
//!                                   │
//!                                   ▼
//!                         ┌──────────────────────┐
//!                         │ Transport TCP/UDP/UDS│
//!                         └──────────────────────┘
//! ```

pub mod buffer;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod hashing;
pub mod network;
pub mod partitioning;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, RequestRouter, Route};
pub use config::{ClientConfig, ConnectionConfig, PoolConfig};
pub use error::{BufferError, Error, NetworkError, Result};
pub use types::{
    parse_server_list, PoolSnapshot, ProtocolMode, ServerAddress, ServerId, ServerSnapshot,
    ServerSpec, ServerState, ServerStateChange, ServerStatus, TransportKind,
};

pub use buffer::ByteBuffer;
pub use cluster::{FailurePolicy, PoolEvent, PoolEventListener, ServerEntry, ServerPool};
pub use hashing::{HashAlgorithm, KeyHasher};
pub use network::{Connection, ConnectionManager, Outcome, TransportState};
pub use partitioning::{Distribution, HashRing, RingLayout};
