//! Key placement across pool changes.
//!
//! These tests cover:
//! - Identical placements from identically built pools, for every hash
//! - Bounded remapping when a ring pool gains or loses a server
//! - The exact remap set of a modulo pool shrinking from 4 to 3 servers
//! - Placements matching other ketama clients

#[cfg(test)]
mod tests {
    use crate::config::PoolConfig;
    use crate::hashing::HashAlgorithm;
    use crate::partitioning::{Distribution, RingLayout};
    use crate::testing::utils::{
        placements, pool_with, random_keys, server_specs, IdentityHasher,
    };
    use crate::types::ServerSpec;
    use proptest::prelude::*;
    use std::sync::Arc;

    const SAMPLE_KEYS: usize = 10_000;

    #[test]
    fn test_placement_is_deterministic_for_every_hash() {
        let keys = random_keys(7, 2_000);
        for hash in HashAlgorithm::ALL {
            for layout in [RingLayout::PerPoint, RingLayout::Ketama] {
                let mut config = PoolConfig::default().with_hash(hash);
                config.ring_layout = layout;

                let first = pool_with(&config, server_specs(5));
                let second = pool_with(&config, server_specs(5));
                assert_eq!(
                    placements(&first, &keys),
                    placements(&second, &keys),
                    "{} / {:?}",
                    hash,
                    layout
                );
            }
        }
    }

    #[test]
    fn test_rebuild_after_changes_matches_fresh_pool() {
        let config = PoolConfig::default().with_hash(HashAlgorithm::Md5);
        let keys = random_keys(11, 2_000);

        let churned = pool_with(&config, server_specs(6));
        let extra = ServerSpec::tcp("10.9.9.9", 11211);
        churned.add(extra.clone()).unwrap();
        churned.remove(&extra.address).unwrap();

        let fresh = pool_with(&config, server_specs(6));
        assert_eq!(placements(&churned, &keys), placements(&fresh, &keys));
    }

    #[test]
    fn test_every_server_gets_keys() {
        let config = PoolConfig::default().with_hash(HashAlgorithm::Md5).with_ketama();
        let pool = pool_with(&config, server_specs(8));
        let keys = random_keys(3, SAMPLE_KEYS);

        let mut counts = [0usize; 8];
        for key in &keys {
            counts[pool.select(key.as_bytes()).unwrap()] += 1;
        }
        let fair = SAMPLE_KEYS / 8;
        for (index, count) in counts.iter().enumerate() {
            assert!(
                *count > fair / 2 && *count < fair * 2,
                "server {} got {} keys, fair share {}",
                index,
                count,
                fair
            );
        }
    }

    #[test]
    fn test_ketama_placements() {
        // Worked out independently from the libmemcached ketama layout
        let config = PoolConfig::default().with_hash(HashAlgorithm::Md5).with_ketama();
        let pool = pool_with(
            &config,
            vec![
                ServerSpec::tcp("10.0.0.1", 11211),
                ServerSpec::tcp("10.0.0.2", 11211),
                ServerSpec::tcp("10.0.0.3", 11211),
            ],
        );

        let expected = [
            ("foo", 2),
            ("bar", 0),
            ("baz", 2),
            ("user:1", 2),
            ("user:2", 2),
            ("session:42", 1),
        ];
        for (key, index) in expected {
            assert_eq!(pool.select(key.as_bytes()).unwrap(), index, "key {}", key);
        }
    }

    #[test]
    fn test_modulo_shrink_remap_set() {
        let config = PoolConfig::default()
            .with_distribution(Distribution::Modulo)
            .with_hasher(Arc::new(IdentityHasher));
        let pool = pool_with(&config, server_specs(4));
        let keys: Vec<String> = (0..12).map(|k| k.to_string()).collect();

        let before = placements(&pool, &keys);
        pool.remove(&server_specs(4)[3].address).unwrap();
        let after = placements(&pool, &keys);

        // k % 4 == k % 3 only below 3
        let moved: Vec<usize> = (0..keys.len()).filter(|&k| before[k] != after[k]).collect();
        assert_eq!(moved, (3..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_modulo_remaps_majority() {
        let config = PoolConfig::default()
            .with_distribution(Distribution::Modulo)
            .with_hash(HashAlgorithm::Md5);
        let pool = pool_with(&config, server_specs(10));
        let keys = random_keys(5, SAMPLE_KEYS);

        let before = placements(&pool, &keys);
        pool.remove(&server_specs(10)[4].address).unwrap();
        let after = placements(&pool, &keys);

        let moved = before.iter().zip(&after).filter(|(a, b)| a != b).count();
        assert!(moved > SAMPLE_KEYS / 2, "only {} keys moved", moved);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_remove_moves_only_removed_servers_keys(
            n in 2usize..20,
            victim in any::<prop::sample::Index>(),
            seed in any::<u64>(),
        ) {
            let config = PoolConfig::default().with_hash(HashAlgorithm::Md5);
            let specs = server_specs(n);
            let removed = specs[victim.index(n)].address.clone();
            let pool = pool_with(&config, specs);
            let keys = random_keys(seed, SAMPLE_KEYS);

            let before = placements(&pool, &keys);
            pool.remove(&removed).unwrap();
            let after = placements(&pool, &keys);

            let removed = removed.to_string();
            let mut moved = 0;
            for (old, new) in before.iter().zip(&after) {
                if old != new {
                    prop_assert_eq!(old, &removed);
                    moved += 1;
                }
            }
            let fair = SAMPLE_KEYS.div_ceil(n);
            prop_assert!(moved <= fair + fair / 2, "{} keys moved, fair share {}", moved, fair);
        }

        #[test]
        fn prop_add_moves_keys_only_to_new_server(
            n in 2usize..20,
            seed in any::<u64>(),
        ) {
            let config = PoolConfig::default().with_hash(HashAlgorithm::Md5).with_ketama();
            let pool = pool_with(&config, server_specs(n));
            let keys = random_keys(seed, SAMPLE_KEYS);

            let before = placements(&pool, &keys);
            let added = ServerSpec::tcp("10.200.0.1", 11211);
            pool.add(added.clone()).unwrap();
            let after = placements(&pool, &keys);

            let added = added.address.to_string();
            let mut moved = 0;
            for (old, new) in before.iter().zip(&after) {
                if old != new {
                    prop_assert_eq!(new, &added);
                    moved += 1;
                }
            }
            let fair = SAMPLE_KEYS.div_ceil(n + 1);
            prop_assert!(moved <= fair + fair / 2, "{} keys moved, fair share {}", moved, fair);
        }
    }
}
