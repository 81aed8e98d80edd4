//! `flush_all` across the whole pool.
//!
//! These tests cover:
//! - Text and binary flushes reaching every server
//! - A failing server not stopping the others from being flushed
//! - Fire-and-forget flushes over UDP

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::config::{ClientConfig, ConnectionConfig, PoolConfig};
    use crate::error::{Error, NetworkError};
    use crate::network::protocol::UDP_HEADER_SIZE;
    use crate::testing::mock::{Fault, MockServer};
    use crate::types::{ProtocolMode, ServerSpec, ServerStatus, TransportKind};
    use std::time::Duration;
    use tokio::net::UdpSocket;

    fn client(specs: Vec<ServerSpec>, connection: ConnectionConfig) -> Client {
        let config = ClientConfig::new(specs)
            .with_pool_config(PoolConfig::default())
            .with_connection_config(connection);
        Client::new(config).unwrap()
    }

    async fn start_servers(faults: &[Fault]) -> Vec<MockServer> {
        let mut servers = Vec::with_capacity(faults.len());
        for &fault in faults {
            servers.push(MockServer::with_fault(fault).await.unwrap());
        }
        servers
    }

    #[test_log::test(tokio::test)]
    async fn test_text_flush_reaches_every_server() {
        let servers = start_servers(&[Fault::None; 3]).await;
        let client = client(
            servers.iter().map(MockServer::spec).collect(),
            ConnectionConfig::default(),
        );

        client.flush_all(0).await.unwrap();
        client.flush_all(30).await.unwrap();

        for server in &servers {
            assert_eq!(server.requests(), 2);
        }
        // The second round went over the connections kept from the first
        let metrics = client.connection_metrics();
        assert_eq!(metrics.connections_opened, 3);
        assert_eq!(metrics.connections_reused, 3);
        assert!(client
            .pool_snapshot()
            .servers
            .iter()
            .all(|s| s.status == ServerStatus::Live));
    }

    #[test_log::test(tokio::test)]
    async fn test_binary_flush() {
        let servers = start_servers(&[Fault::None; 2]).await;
        let client = client(
            servers.iter().map(MockServer::spec).collect(),
            ConnectionConfig::default().with_protocol(ProtocolMode::Binary),
        );

        client.flush_all(60).await.unwrap();
        for server in &servers {
            assert_eq!(server.requests(), 1);
        }

        servers[1].set_fault(Fault::ServerError);
        let err = client.flush_all(0).await.unwrap_err();
        assert!(
            matches!(err, Error::Network(NetworkError::Protocol(ref msg)) if msg.contains("0x0084")),
            "{}",
            err
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_server_does_not_stop_flush() {
        let servers = start_servers(&[Fault::None, Fault::ServerError, Fault::None]).await;
        let client = client(
            servers.iter().map(MockServer::spec).collect(),
            ConnectionConfig::default(),
        );

        let err = client.flush_all(0).await.unwrap_err();
        assert!(
            matches!(err, Error::Network(NetworkError::Protocol(ref msg)) if msg.starts_with("SERVER_ERROR")),
            "{}",
            err
        );
        for server in &servers {
            assert_eq!(server.requests(), 1);
        }

        // A bad answer breaks the connection and counts as a failure
        let snapshot = client.pool_snapshot();
        assert_eq!(snapshot.servers[1].failure_count, 1);
        assert_eq!(snapshot.servers[0].failure_count, 0);
        assert_eq!(client.connection_metrics().connections_broken, 1);
        assert_eq!(client.connections().idle_count(snapshot.servers[1].id), 0);
        assert_eq!(client.connections().idle_count(snapshot.servers[0].id), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_udp_flush_is_fire_and_forget() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let client = client(
            vec![ServerSpec::tcp("127.0.0.1", port)],
            ConnectionConfig::default().with_udp(true),
        );
        assert_eq!(client.pool_snapshot().servers[0].transport, TransportKind::Udp);

        client.flush_all(5).await.unwrap();

        let mut datagram = [0u8; 128];
        let n = tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut datagram))
            .await
            .unwrap()
            .unwrap();
        let (frame, body) = datagram[..n].split_at(UDP_HEADER_SIZE);
        assert_eq!(&frame[2..], &[0, 0, 0, 1, 0, 0]);
        assert_eq!(body, b"flush_all 5 noreply\r\n");
    }

    #[test]
    fn test_binary_over_udp_is_rejected() {
        let config = ClientConfig::new(vec![ServerSpec::tcp("127.0.0.1", 11211)])
            .with_connection_config(
                ConnectionConfig::default()
                    .with_udp(true)
                    .with_protocol(ProtocolMode::Binary),
            );
        assert!(matches!(Client::new(config), Err(Error::Config(_))));
    }
}
