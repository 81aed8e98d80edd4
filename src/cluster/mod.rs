//! Server pool, per-server state and pool events.

pub mod events;
pub mod pool;
pub mod server;

pub use events::{LoggingEventListener, PoolEvent, PoolEventListener};
pub use pool::{ServerPool, Target};
pub use server::{FailurePolicy, ServerEntry};
