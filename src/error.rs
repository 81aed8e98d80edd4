//! Error types for the router.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the router.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration detected while building a client.
    #[error("config error: {0}")]
    Config(String),

    /// A server passed to a runtime membership change was rejected.
    #[error("invalid server: {0}")]
    InvalidServer(String),

    /// The pool has no servers.
    #[error("no servers available")]
    NoServersAvailable,

    /// The named server is not part of the pool.
    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// The target server is dead and still inside its retry window.
    #[error("server {address} unavailable, retry in {retry_in:?}")]
    ServerUnavailable { address: String, retry_in: Duration },

    /// Every server tried for a key failed.
    #[error("all servers down after {attempts} attempts")]
    AllServersDown { attempts: usize },

    /// Timed out waiting for a free connection slot.
    #[error("operation timed out")]
    Timeout,

    /// Transport-level failures.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Byte buffer failures.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
}

impl Error {
    /// Whether this error should count against a server's failure counter.
    pub fn is_server_failure(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Whether retrying against another server could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::ServerUnavailable { .. } | Error::Timeout
        )
    }
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// A connect, send or receive exceeded its deadline.
    #[error("timed out talking to {addr}")]
    Timeout { addr: String },

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Address could not be used with the requested transport.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Growable buffer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Appending would grow the buffer past its configured limit.
    #[error("capacity exceeded: need {requested} bytes, limit is {max}")]
    CapacityExceeded { requested: usize, max: usize },

    /// The allocator refused to grow the buffer.
    #[error("memory allocation failure")]
    OutOfMemory,
}
