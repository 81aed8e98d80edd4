use crate::cluster::ServerPool;
use crate::config::PoolConfig;
use crate::hashing::KeyHasher;
use crate::types::ServerSpec;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::TcpListener;

/// Hashes a decimal key to its own value, so placements can be worked out
/// by hand. Anything else hashes to 0.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IdentityHasher;

impl KeyHasher for IdentityHasher {
    fn hash(&self, key: &[u8]) -> u32 {
        std::str::from_utf8(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// A local port nothing listens on.
pub(crate) fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener); // Release the port immediately
    port
}

/// Allocate OS-assigned ports by briefly binding to port 0.
pub(crate) fn allocate_os_ports(count: usize) -> Vec<u16> {
    // Hold every listener until all are bound so the ports are distinct
    let listeners: Vec<TcpListener> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

/// `count` servers named `10.0.<i/256>.<i%256>:11211`, weight 1.
pub(crate) fn server_specs(count: usize) -> Vec<ServerSpec> {
    (0..count)
        .map(|i| ServerSpec::tcp(format!("10.0.{}.{}", i / 256, i % 256), 11211))
        .collect()
}

pub(crate) fn pool_with(config: &PoolConfig, specs: Vec<ServerSpec>) -> ServerPool {
    ServerPool::with_servers(config, specs).unwrap()
}

/// Reproducible random keys.
pub(crate) fn random_keys(seed: u64, count: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let len = rng.random_range(4..32);
            (0..len)
                .map(|_| rng.random_range(b'a'..=b'z') as char)
                .collect()
        })
        .collect()
}

/// Where each key lands.
pub(crate) fn placements(pool: &ServerPool, keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|key| {
            let index = pool.select(key.as_bytes()).unwrap();
            pool.server(index).unwrap().address().to_string()
        })
        .collect()
}
