//! Key hashing.
//!
//! A [`HashAlgorithm`] names one of the built-in functions used by memcached
//! clients. Anything implementing [`KeyHasher`] can be plugged into a pool
//! instead, which is how tests get exact, hand-computed placements.
//!
//! # Example
//!
//! ```rust
//! use memrouter::hashing::{HashAlgorithm, KeyHasher};
//!
//! let algo: HashAlgorithm = "fnv1a_32".parse().unwrap();
//! assert_eq!(algo.hash(b"a"), 0xe40c_292c);
//! ```

mod functions;

pub use functions::{
    crc32, fnv1_32, fnv1_64, fnv1a_32, fnv1a_64, hsieh, md5, md5_digest, murmur2, one_at_a_time,
    xxhash,
};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maps a key to a 32-bit hash. Must be pure and deterministic.
pub trait KeyHasher: Send + Sync + fmt::Debug {
    /// Hash a key.
    fn hash(&self, key: &[u8]) -> u32;

    /// Name shown in snapshots and logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Built-in hash algorithms.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// The native client hash (one-at-a-time).
    #[default]
    Default,
    Md5,
    Crc32,
    Fnv1_64,
    Fnv1a_64,
    Fnv1_32,
    Fnv1a_32,
    /// Jenkins one-at-a-time.
    Jenkins,
    Hsieh,
    Murmur,
    XxHash,
}

impl HashAlgorithm {
    /// Every built-in algorithm.
    pub const ALL: [HashAlgorithm; 11] = [
        HashAlgorithm::Default,
        HashAlgorithm::Md5,
        HashAlgorithm::Crc32,
        HashAlgorithm::Fnv1_64,
        HashAlgorithm::Fnv1a_64,
        HashAlgorithm::Fnv1_32,
        HashAlgorithm::Fnv1a_32,
        HashAlgorithm::Jenkins,
        HashAlgorithm::Hsieh,
        HashAlgorithm::Murmur,
        HashAlgorithm::XxHash,
    ];

    /// Canonical configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Default => "default",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Crc32 => "crc",
            HashAlgorithm::Fnv1_64 => "fnv1_64",
            HashAlgorithm::Fnv1a_64 => "fnv1a_64",
            HashAlgorithm::Fnv1_32 => "fnv1_32",
            HashAlgorithm::Fnv1a_32 => "fnv1a_32",
            HashAlgorithm::Jenkins => "jenkins",
            HashAlgorithm::Hsieh => "hsieh",
            HashAlgorithm::Murmur => "murmur",
            HashAlgorithm::XxHash => "xxhash",
        }
    }

    /// Hash a key with this algorithm.
    #[inline]
    pub fn hash(self, key: &[u8]) -> u32 {
        match self {
            HashAlgorithm::Default | HashAlgorithm::Jenkins => one_at_a_time(key),
            HashAlgorithm::Md5 => md5(key),
            HashAlgorithm::Crc32 => crc32(key),
            HashAlgorithm::Fnv1_64 => fnv1_64(key),
            HashAlgorithm::Fnv1a_64 => fnv1a_64(key),
            HashAlgorithm::Fnv1_32 => fnv1_32(key),
            HashAlgorithm::Fnv1a_32 => fnv1a_32(key),
            HashAlgorithm::Hsieh => hsieh(key),
            HashAlgorithm::Murmur => murmur2(key),
            HashAlgorithm::XxHash => xxhash(key),
        }
    }
}

impl KeyHasher for HashAlgorithm {
    fn hash(&self, key: &[u8]) -> u32 {
        HashAlgorithm::hash(*self, key)
    }

    fn name(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        let algo = match name.as_str() {
            "default" | "native" => HashAlgorithm::Default,
            "md5" => HashAlgorithm::Md5,
            "crc" | "crc32" => HashAlgorithm::Crc32,
            "fnv1_64" => HashAlgorithm::Fnv1_64,
            "fnv1a_64" => HashAlgorithm::Fnv1a_64,
            "fnv1_32" => HashAlgorithm::Fnv1_32,
            "fnv1a_32" => HashAlgorithm::Fnv1a_32,
            "jenkins" | "one_at_a_time" => HashAlgorithm::Jenkins,
            "hsieh" => HashAlgorithm::Hsieh,
            "murmur" => HashAlgorithm::Murmur,
            "xxhash" | "xxh64" => HashAlgorithm::XxHash,
            _ => return Err(Error::Config(format!("unknown hash algorithm: {}", s))),
        };
        Ok(algo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for algo in HashAlgorithm::ALL {
            let parsed: HashAlgorithm = algo.as_str().parse().unwrap();
            assert_eq!(parsed, algo);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("NATIVE".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Default);
        assert_eq!("crc32".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Crc32);
        assert_eq!(" xxh64 ".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::XxHash);
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = "sha256".parse::<HashAlgorithm>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_all_deterministic() {
        for algo in HashAlgorithm::ALL {
            assert_eq!(algo.hash(b"user:42"), algo.hash(b"user:42"), "{}", algo);
        }
    }

    #[test]
    fn test_trait_object_dispatch() {
        let hasher: &dyn KeyHasher = &HashAlgorithm::Crc32;
        assert_eq!(hasher.hash(b"123456789"), 0xcbf4_3926);
        assert_eq!(hasher.name(), "crc");
    }
}
