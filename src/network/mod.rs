//! Network layer: transports, connections and the connection manager.

pub mod connection;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use connection::{Connection, TransportState};
pub use manager::{ConnectionManager, ConnectionMetricsSnapshot, Outcome};
pub use transport::Transport;
