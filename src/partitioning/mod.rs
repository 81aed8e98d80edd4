//! Partitioning module for distributing keys across cache servers.
//!
//! Two strategies are supported:
//! - **Modulo**: `hash(key) % n`, stable only while the pool never changes
//! - **Consistent ring**: weighted ketama-style ring, ~1/N keys move per change
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  DistributionStrategy                        │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                    HashRing                           │  │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐   │  │
//! │  │  │P:0  │→│P:2  │→│P:1  │→│P:0  │→│P:1  │→│P:2  │   │  │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘ └─────┘ └─────┘   │  │
//! │  │     weight × 160 points per server                  │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                                                             │
//! │  Key "user:123" → hash → first point ≥ hash → server 2      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use memrouter::hashing::HashAlgorithm;
//! use memrouter::partitioning::{HashRing, RingLayout, DEFAULT_POINTS_PER_SERVER};
//!
//! let ring = HashRing::build(
//!     [("10.0.0.1:11211", 1), ("10.0.0.2:11211", 2)],
//!     &HashAlgorithm::Md5,
//!     DEFAULT_POINTS_PER_SERVER,
//!     RingLayout::Ketama,
//! )
//! .unwrap();
//!
//! let server = ring.lookup(HashAlgorithm::Md5.hash(b"user:123")).unwrap();
//! assert!(server < 2);
//! ```

mod distribution;
mod hashring;

pub use distribution::{Distribution, DistributionStrategy};
pub use hashring::{
    points_for_weight, HashRing, RingLayout, RingPoint, RingWalk, DEFAULT_POINTS_PER_SERVER,
    MAX_POINTS_PER_SERVER, POINTS_PER_DIGEST,
};
