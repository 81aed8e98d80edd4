//! A checked-out connection to one server.

use super::transport::Transport;
use crate::cluster::Target;
use crate::config::ConnectionConfig;
use crate::error::NetworkError;
use crate::types::{ProtocolMode, ServerAddress, ServerId, TransportKind};
use std::fmt;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tracing::trace;

/// Lifecycle of a connection.
///
/// ```text
/// Closed → Connecting → Open → Closed
///              │          │
///              └→ Broken ←┘
///                   │
///                   └→ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Closed,
    Connecting,
    Open,
    Broken,
}

impl TransportState {
    /// Whether `self → next` is a legal move.
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        matches!(
            (self, next),
            (Closed, Connecting)
                | (Connecting, Open)
                | (Connecting, Broken)
                | (Open, Broken)
                | (Open, Closed)
                | (Broken, Closed)
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Closed => "closed",
            TransportState::Connecting => "connecting",
            TransportState::Open => "open",
            TransportState::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// A connection owned by one caller between acquire and release.
///
/// Holds one of the server's connection slots until it is released or
/// dropped.
pub struct Connection {
    server_id: ServerId,
    server_index: usize,
    address: ServerAddress,
    kind: TransportKind,
    state: TransportState,
    mode: ProtocolMode,
    io_timeout: Duration,
    reused: bool,
    transport: Option<Transport>,
    permit: OwnedSemaphorePermit,
}

impl Connection {
    fn closed(target: &Target, config: &ConnectionConfig, permit: OwnedSemaphorePermit) -> Self {
        Self {
            server_id: target.server_id,
            server_index: target.index,
            address: target.address.clone(),
            kind: target.transport,
            state: TransportState::Closed,
            mode: config.protocol,
            io_timeout: config.io_timeout,
            reused: false,
            transport: None,
            permit,
        }
    }

    /// Open a new connection to `target`.
    pub(crate) async fn connect(
        target: &Target,
        config: &ConnectionConfig,
        permit: OwnedSemaphorePermit,
    ) -> Result<Self, NetworkError> {
        let mut conn = Self::closed(target, config, permit);
        conn.transition(TransportState::Connecting);

        match Transport::connect(&conn.address, conn.kind, config.connect_timeout).await {
            Ok(transport) => {
                conn.transport = Some(transport);
                conn.transition(TransportState::Open);
                Ok(conn)
            }
            Err(e) => {
                conn.transition(TransportState::Broken);
                conn.transition(TransportState::Closed);
                Err(e)
            }
        }
    }

    /// Wrap an idle transport that passed its reuse check.
    pub(crate) fn reuse(
        target: &Target,
        config: &ConnectionConfig,
        permit: OwnedSemaphorePermit,
        transport: Transport,
    ) -> Self {
        let mut conn = Self::closed(target, config, permit);
        conn.transition(TransportState::Connecting);
        conn.transport = Some(transport);
        conn.transition(TransportState::Open);
        conn.reused = true;
        conn
    }

    fn transition(&mut self, next: TransportState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal connection transition {} -> {}",
            self.state,
            next
        );
        trace!(server = %self.address, from = %self.state, to = %next, "Connection state");
        self.state = next;
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Index of the server when the connection was handed out.
    pub fn server_index(&self) -> usize {
        self.server_index
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn protocol_mode(&self) -> ProtocolMode {
        self.mode
    }

    /// Whether this connection came from the idle list.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    fn open_transport(&mut self) -> Result<&mut Transport, NetworkError> {
        match (self.state, self.transport.as_mut()) {
            (TransportState::Open, Some(transport)) => Ok(transport),
            _ => Err(NetworkError::ConnectionClosed),
        }
    }

    /// Send `buf` within the I/O timeout. Any failure breaks the connection.
    pub async fn send(&mut self, buf: &[u8]) -> Result<(), NetworkError> {
        let timeout = self.io_timeout;
        let result = self.open_transport()?.send(buf, timeout).await;
        if result.is_err() {
            self.mark_broken();
        }
        result
    }

    /// Receive into `buf` within the I/O timeout. Any failure breaks the
    /// connection.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        let timeout = self.io_timeout;
        let result = self.open_transport()?.recv(buf, timeout).await;
        if result.is_err() {
            self.mark_broken();
        }
        result
    }

    /// Move an open connection to `Broken`. No-op in any other state.
    pub(crate) fn mark_broken(&mut self) {
        if self.state == TransportState::Open {
            self.transition(TransportState::Broken);
        }
    }

    /// Split into the transport, if it can be reused, and the slot permit.
    /// The caller drops the permit once the transport is stored so a waiter
    /// finds it idle.
    pub(crate) fn into_idle(self) -> (Option<Transport>, OwnedSemaphorePermit) {
        let transport = match self.state {
            TransportState::Open => self.transport,
            _ => None,
        };
        (transport, self.permit)
    }

    /// Close the underlying transport.
    pub(crate) async fn close(mut self) {
        if matches!(self.state, TransportState::Open | TransportState::Broken) {
            self.transition(TransportState::Closed);
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server_id", &self.server_id)
            .field("server_index", &self.server_index)
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("reused", &self.reused)
            .finish()
    }
}
