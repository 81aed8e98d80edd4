//! Failure handling through the client.
//!
//! These tests cover:
//! - Connect failures escalating to dead windows with capped backoff
//! - Dead windows failing fast without touching the network
//! - Request timeouts counting against a server
//! - Failover bounded by the pool size

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::config::{ClientConfig, ConnectionConfig, PoolConfig};
    use crate::error::{Error, NetworkError};
    use crate::hashing::HashAlgorithm;
    use crate::network::Outcome;
    use crate::testing::mock::{Fault, MockServer};
    use crate::testing::utils::{allocate_os_ports, refused_port};
    use crate::types::{ServerSpec, ServerStateChange, ServerStatus};
    use std::time::Duration;

    /// No connect timer, so a paused clock never fires one early.
    fn untimed() -> ConnectionConfig {
        ConnectionConfig::default()
            .with_connect_timeout(Duration::ZERO)
            .with_io_timeout(Duration::ZERO)
    }

    fn client(specs: Vec<ServerSpec>, pool: PoolConfig, connection: ConnectionConfig) -> Client {
        let config = ClientConfig::new(specs)
            .with_pool_config(pool)
            .with_connection_config(connection);
        Client::new(config).unwrap()
    }

    fn retry_in(err: &Error) -> Duration {
        match err {
            Error::ServerUnavailable { retry_in, .. } => *retry_in,
            other => panic!("expected ServerUnavailable, got {}", other),
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_connect_failures_back_off() {
        let pool = PoolConfig::default()
            .with_failure_threshold(2)
            .with_retry_timeout(Duration::from_secs(1))
            .with_retry_timeout_max(Duration::from_secs(4));
        let client = client(
            vec![ServerSpec::tcp("127.0.0.1", refused_port())],
            pool,
            untimed(),
        );

        let err = client.route("k").await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::ConnectionFailed { .. })));
        assert_eq!(client.pool_snapshot().servers[0].failure_count, 1);

        // Threshold reached: first window
        assert!(client.route("k").await.unwrap_err().is_server_failure());
        assert_eq!(retry_in(&client.route("k").await.unwrap_err()), Duration::from_secs(1));

        // Each further failure doubles the window up to the ceiling
        for expected in [2, 4, 4] {
            let window = client.pool_snapshot().servers[0].retry_in.unwrap();
            tokio::time::advance(window).await;
            assert!(client.route("k").await.unwrap_err().is_server_failure());
            assert_eq!(
                retry_in(&client.route("k").await.unwrap_err()),
                Duration::from_secs(expected)
            );
        }

        // Calls inside a window never reached the network
        let metrics = client.connection_metrics();
        assert_eq!(metrics.connect_attempts, 5);
        assert_eq!(metrics.connect_failures, 5);
        assert_eq!(client.pool_snapshot().dead_count(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_request_timeout_marks_server_dead() {
        let server = MockServer::with_fault(Fault::Hang).await.unwrap();
        let pool = PoolConfig::default()
            .with_failure_threshold(1)
            .with_retry_timeout(Duration::from_secs(3))
            .with_retry_timeout_max(Duration::from_secs(3));
        let connection = ConnectionConfig::default().with_io_timeout(Duration::from_millis(250));
        let client = client(vec![server.spec()], pool, connection);

        let err = client.flush_all(0).await.unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::Timeout { .. })), "{}", err);

        let snapshot = client.pool_snapshot();
        assert_eq!(snapshot.servers[0].status, ServerStatus::Dead);
        let window = snapshot.servers[0].retry_in.unwrap();
        assert!(window <= Duration::from_secs(3) && window > Duration::from_secs(2));
        assert_eq!(client.connection_metrics().connections_broken, 1);
        assert!(matches!(
            client.route("k").await.unwrap_err(),
            Error::ServerUnavailable { .. }
        ));

        // Forced back to life: history is gone and requests flow again
        server.set_fault(Fault::None);
        client
            .set_server_state(&server.address(), ServerStateChange::Alive)
            .unwrap();
        client.flush_all(0).await.unwrap();
        let snapshot = client.pool_snapshot();
        assert_eq!(snapshot.servers[0].status, ServerStatus::Live);
        assert_eq!(snapshot.servers[0].failure_count, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_failover_reaches_live_server() {
        let live = MockServer::start().await.unwrap();
        let ports = allocate_os_ports(2);
        let specs = vec![
            ServerSpec::tcp("127.0.0.1", ports[0]),
            live.spec(),
            ServerSpec::tcp("127.0.0.1", ports[1]),
        ];
        let pool = PoolConfig::default()
            .with_hash(HashAlgorithm::Md5)
            .with_skip_dead_servers(true)
            .with_failure_threshold(1)
            .with_retry_timeout(Duration::from_secs(60))
            .with_retry_timeout_max(Duration::from_secs(60));
        let client = client(specs, pool, ConnectionConfig::default());

        for i in 0..50 {
            let route = client.route(format!("key:{}", i)).await.unwrap();
            assert_eq!(route.address, live.address());
            client.report_outcome(route.into_connection(), Outcome::Success).await;
        }

        // Each unreachable server was tried once, then skipped while dead
        let metrics = client.connection_metrics();
        assert_eq!(metrics.connect_failures, 2);
        assert_eq!(metrics.connections_opened, 1);
        assert_eq!(metrics.connections_reused, 49);
        assert_eq!(client.pool_snapshot().dead_count(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_failover_is_bounded_by_pool_size() {
        let ports = allocate_os_ports(3);
        let specs = ports
            .iter()
            .map(|&port| ServerSpec::tcp("127.0.0.1", port))
            .collect();
        let pool = PoolConfig::default()
            .with_hash(HashAlgorithm::Md5)
            .with_skip_dead_servers(true)
            .with_failure_threshold(1)
            .with_retry_timeout(Duration::from_secs(60))
            .with_retry_timeout_max(Duration::from_secs(60));
        let client = client(specs, pool, ConnectionConfig::default());

        let err = client.route("k").await.unwrap_err();
        assert!(matches!(err, Error::AllServersDown { attempts: 3 }), "{}", err);
        assert_eq!(client.connection_metrics().connect_attempts, 3);

        // Everything is dead now: fail fast on the key's own server
        let err = client.route("k").await.unwrap_err();
        assert!(matches!(err, Error::ServerUnavailable { .. }), "{}", err);
        assert_eq!(client.connection_metrics().connect_attempts, 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_no_failover_without_skip_dead() {
        let servers = [
            MockServer::start().await.unwrap(),
            MockServer::start().await.unwrap(),
        ];
        let specs = servers.iter().map(MockServer::spec).collect();
        let pool = PoolConfig::default().with_hash(HashAlgorithm::Md5);
        let client = client(specs, pool, ConnectionConfig::default());

        let route = client.route("k").await.unwrap();
        let home = route.address.clone();
        client.report_outcome(route.into_connection(), Outcome::Success).await;

        client
            .set_server_state(
                &home,
                ServerStateChange::Dead {
                    retry_timeout: Duration::from_secs(30),
                },
            )
            .unwrap();
        let err = client.route("k").await.unwrap_err();
        assert!(matches!(err, Error::ServerUnavailable { .. }), "{}", err);

        // Forcing a server dead is not a failure of its own
        let snapshot = client.pool_snapshot();
        let entry = snapshot.servers.iter().find(|s| s.address == home).unwrap();
        assert_eq!(entry.failure_count, 0);
    }
}
