//! Byte transports to a cache server: TCP, UDP or a local socket.
//!
//! Every operation takes a deadline. A zero duration disables the deadline.

use crate::error::NetworkError;
use crate::types::{ServerAddress, TransportKind};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::trace;

/// Run `fut` with a deadline of `limit`. Zero means no deadline.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    peer: &str,
    fut: F,
) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, NetworkError>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| NetworkError::Timeout {
            addr: peer.to_string(),
        })?
}

enum Stream {
    Tcp(TcpStream),
    Udp(UdpSocket),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// An open transport to one server.
pub struct Transport {
    peer: String,
    stream: Stream,
}

impl Transport {
    /// Open a transport of `kind` to `address` within `timeout`.
    pub async fn connect(
        address: &ServerAddress,
        kind: TransportKind,
        timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let peer = address.to_string();
        let stream = bounded(timeout, &peer, open(address, kind, &peer)).await?;
        trace!(%peer, %kind, "Transport opened");
        Ok(Self { peer, stream })
    }

    /// Address of the remote end as configured.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn kind(&self) -> TransportKind {
        match self.stream {
            Stream::Tcp(_) => TransportKind::Tcp,
            Stream::Udp(_) => TransportKind::Udp,
            #[cfg(unix)]
            Stream::Unix(_) => TransportKind::Unix,
        }
    }

    /// Write all of `buf`. Over UDP `buf` is a single datagram.
    pub async fn send(&mut self, buf: &[u8], timeout: Duration) -> Result<(), NetworkError> {
        let peer = self.peer.clone();
        bounded(timeout, &peer, async {
            match &mut self.stream {
                Stream::Tcp(stream) => {
                    stream.write_all(buf).await?;
                    stream.flush().await?;
                }
                Stream::Udp(socket) => {
                    let sent = socket.send(buf).await?;
                    if sent != buf.len() {
                        return Err(NetworkError::Protocol(format!(
                            "short datagram: {} of {} bytes",
                            sent,
                            buf.len()
                        )));
                    }
                }
                #[cfg(unix)]
                Stream::Unix(stream) => {
                    stream.write_all(buf).await?;
                    stream.flush().await?;
                }
            }
            Ok::<(), NetworkError>(())
        })
        .await
    }

    /// Read whatever is available into `buf`. A stream that reports end of
    /// file is `ConnectionClosed`.
    pub async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, NetworkError> {
        let peer = self.peer.clone();
        let read = bounded(timeout, &peer, async {
            let n = match &mut self.stream {
                Stream::Tcp(stream) => stream.read(buf).await?,
                Stream::Udp(socket) => socket.recv(buf).await?,
                #[cfg(unix)]
                Stream::Unix(stream) => stream.read(buf).await?,
            };
            Ok::<usize, NetworkError>(n)
        })
        .await?;

        if read == 0 && !buf.is_empty() && !matches!(self.stream, Stream::Udp(_)) {
            return Err(NetworkError::ConnectionClosed);
        }
        Ok(read)
    }

    /// Whether an idle transport can be handed out again: the peer has not
    /// closed it and there is no unread data left over.
    pub fn is_reusable(&self) -> bool {
        let mut probe = [0u8; 1];
        let result = match &self.stream {
            Stream::Tcp(stream) => stream.try_read(&mut probe),
            Stream::Udp(_) => return true,
            #[cfg(unix)]
            Stream::Unix(stream) => stream.try_read(&mut probe),
        };
        matches!(result, Err(ref e) if e.kind() == io::ErrorKind::WouldBlock)
    }

    /// Shut the transport down. Errors are ignored; the socket is released
    /// either way.
    pub async fn close(mut self) {
        let result = match &mut self.stream {
            Stream::Tcp(stream) => stream.shutdown().await,
            Stream::Udp(_) => Ok(()),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.shutdown().await,
        };
        if let Err(e) = result {
            trace!(peer = %self.peer, error = %e, "Error while closing transport");
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("kind", &self.kind())
            .finish()
    }
}

fn connect_failed(peer: &str, e: io::Error) -> NetworkError {
    NetworkError::ConnectionFailed {
        addr: peer.to_string(),
        reason: e.to_string(),
    }
}

async fn open(
    address: &ServerAddress,
    kind: TransportKind,
    peer: &str,
) -> Result<Stream, NetworkError> {
    match (kind, address) {
        (TransportKind::Tcp, ServerAddress::Tcp { host, port }) => {
            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(|e| connect_failed(peer, e))?;
            stream.set_nodelay(true)?;
            Ok(Stream::Tcp(stream))
        }
        (TransportKind::Udp, ServerAddress::Tcp { host, port }) => {
            let remote = tokio::net::lookup_host((host.as_str(), *port))
                .await
                .map_err(|e| connect_failed(peer, e))?
                .next()
                .ok_or_else(|| NetworkError::InvalidAddress(peer.to_string()))?;
            let local: SocketAddr = if remote.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(local)
                .await
                .map_err(|e| connect_failed(peer, e))?;
            socket
                .connect(remote)
                .await
                .map_err(|e| connect_failed(peer, e))?;
            Ok(Stream::Udp(socket))
        }
        #[cfg(unix)]
        (TransportKind::Unix, ServerAddress::Unix(path)) => {
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| connect_failed(peer, e))?;
            Ok(Stream::Unix(stream))
        }
        _ => Err(NetworkError::InvalidAddress(format!(
            "{} cannot be reached over {}",
            peer, kind
        ))),
    }
}
