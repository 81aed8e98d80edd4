//! Abandoned requests.
//!
//! These tests cover:
//! - A route dropped while waiting for a connection slot
//! - A flush dropped while the server is still answering
//!
//! Neither may leak a slot, pool a half-used socket, or count against the
//! server.

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::config::{ClientConfig, ConnectionConfig, PoolConfig};
    use crate::network::Outcome;
    use crate::testing::mock::{Fault, MockServer};
    use crate::types::{ServerSpec, ServerStatus};
    use std::future::{poll_fn, Future};
    use std::pin::Pin;
    use std::task::Poll;
    use std::time::Duration;

    fn client(specs: Vec<ServerSpec>, connection: ConnectionConfig) -> Client {
        let config = ClientConfig::new(specs)
            .with_pool_config(PoolConfig::default().with_failure_threshold(1))
            .with_connection_config(connection);
        Client::new(config).unwrap()
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_route_dropped_while_waiting_for_slot() {
        let server = MockServer::start().await.unwrap();
        let connection = ConnectionConfig::default()
            .with_max_connections_per_server(1)
            .with_connect_timeout(Duration::ZERO)
            .with_io_timeout(Duration::ZERO);
        let client = client(vec![server.spec()], connection);

        let held = client.route("k").await.unwrap();
        let before = client.pool_snapshot();

        // The only slot is taken, so this waits until it is dropped
        let abandoned = tokio::time::timeout(Duration::from_millis(100), client.route("k")).await;
        assert!(abandoned.is_err());

        let mut waiting = Box::pin(client.route("other"));
        assert!(poll_once(waiting.as_mut()).await.is_none());
        drop(waiting);

        assert_eq!(client.pool_snapshot(), before);
        let metrics = client.connection_metrics();
        assert_eq!(metrics.connect_attempts, 1);
        assert_eq!(metrics.connections_opened, 1);

        // The slot goes back and the next caller gets the same connection
        client.report_outcome(held.into_connection(), Outcome::Success).await;
        let route = tokio::time::timeout(Duration::from_secs(1), client.route("k"))
            .await
            .unwrap()
            .unwrap();
        assert!(route.connection.is_reused());
        client.report_outcome(route.into_connection(), Outcome::Success).await;

        let metrics = client.connection_metrics();
        assert_eq!(metrics.connections_opened, 1);
        assert_eq!(metrics.connections_reused, 1);
        assert_eq!(client.pool_snapshot().servers[0].failure_count, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_flush_dropped_mid_request() {
        let server = MockServer::with_fault(Fault::Hang).await.unwrap();
        let connection = ConnectionConfig::default()
            .with_max_connections_per_server(1)
            .with_io_timeout(Duration::ZERO);
        let client = client(vec![server.spec()], connection);

        let abandoned = tokio::time::timeout(Duration::from_millis(200), client.flush_all(0)).await;
        assert!(abandoned.is_err());

        // Nothing counted against the server and the socket was not pooled
        let snapshot = client.pool_snapshot();
        assert_eq!(snapshot.servers[0].failure_count, 0);
        assert_ne!(snapshot.servers[0].status, ServerStatus::Dead);
        assert_eq!(snapshot.dead_count(), 0);
        let id = snapshot.servers[0].id;
        assert_eq!(client.connections().idle_count(id), 0);
        assert_eq!(client.connection_metrics().connections_broken, 0);

        // With one slot per server, this only works if the slot came back
        server.set_fault(Fault::None);
        tokio::time::timeout(Duration::from_secs(5), client.flush_all(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.connections().idle_count(id), 1);
        assert_eq!(client.pool_snapshot().servers[0].failure_count, 0);
    }

    /// Poll `fut` once and report whether it finished.
    async fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
        poll_fn(|cx| {
            Poll::Ready(match Pin::new(&mut fut).poll(cx) {
                Poll::Ready(out) => Some(out),
                Poll::Pending => None,
            })
        })
        .await
    }
}
