//! Testing utilities for the router.
//!
//! This module provides tools for exercising a client against real sockets:
//! - A mock memcached server with switchable faults
//! - Scenario tests for placement, failure handling, routing, flushing and
//!   abandoned requests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Client                              │
//! └─────────────────────────────────────────────────────────────┘
//!                │ TCP (text or binary)
//!                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MockServer                            │
//! │  - Answers flush_all                                        │
//! │  - Fault::ServerError / Hang / Close on demand              │
//! │  - Counts connections and requests                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use memrouter::testing::{Fault, MockServer};
//! use memrouter::Client;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockServer::start().await?;
//! let client = Client::from_server_list(&server.address().to_string())?;
//!
//! client.flush_all(0).await?;
//! assert_eq!(server.requests(), 1);
//!
//! // Requests from now on get a SERVER_ERROR
//! server.set_fault(Fault::ServerError);
//! assert!(client.flush_all(0).await.is_err());
//! # Ok(())
//! # }
//! ```

mod mock;

mod cancellation_tests;
mod distribution_tests;
mod failure_tests;
mod flush_tests;
#[cfg(test)]
mod utils;

pub use mock::{Fault, MockServer, STATUS_INTERNAL_ERROR};
