//! An in-process memcached stand-in with switchable faults.

use crate::network::protocol::{HEADER_SIZE, OPCODE_FLUSH, REQUEST_MAGIC, RESPONSE_MAGIC};
use crate::types::{ServerAddress, ServerSpec};
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, trace};

/// Binary status sent back while [`Fault::ServerError`] is active.
pub const STATUS_INTERNAL_ERROR: u16 = 0x0084;

/// How the server misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// Answer every request normally.
    #[default]
    None,
    /// Answer with a server error.
    ServerError,
    /// Read requests, never answer.
    Hang,
    /// Drop the connection on the next request.
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    fault: Mutex<Fault>,
    connections: AtomicUsize,
    requests: AtomicUsize,
}

/// A TCP listener on 127.0.0.1 speaking just enough memcached to answer
/// `flush_all` in text and binary form.
///
/// The accept loop and every connection task stop when the server is
/// dropped.
pub struct MockServer {
    port: u16,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Start a healthy server on an OS-assigned port.
    pub async fn start() -> io::Result<Self> {
        Self::with_fault(Fault::None).await
    }

    /// Start a server that misbehaves from the first request.
    pub async fn with_fault(fault: Fault) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(MockState {
            fault: Mutex::new(fault),
            ..MockState::default()
        });

        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        debug!(port, ?fault, "Mock server started");
        Ok(Self { port, state, task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> ServerAddress {
        ServerAddress::tcp("127.0.0.1", self.port)
    }

    pub fn spec(&self) -> ServerSpec {
        ServerSpec::tcp("127.0.0.1", self.port)
    }

    pub fn fault(&self) -> Fault {
        *self.state.fault.lock()
    }

    /// Change behaviour for requests read from now on.
    pub fn set_fault(&self, fault: Fault) {
        *self.state.fault.lock() = fault;
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Complete requests read so far, answered or not.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("port", &self.port)
            .field("fault", &self.fault())
            .field("connections", &self.connections())
            .field("requests", &self.requests())
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<MockState>) {
    // Owning the set ties connection tasks to this one
    let mut connections = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                state.connections.fetch_add(1, Ordering::SeqCst);
                trace!(%peer, "Mock server accepted connection");
                connections.spawn(serve(socket, Arc::clone(&state)));
            }
            Err(e) => {
                debug!(error = %e, "Mock server accept failed");
                return;
            }
        }
        while connections.try_join_next().is_some() {}
    }
}

async fn serve(mut socket: TcpStream, state: Arc<MockState>) {
    let mut buf = BytesMut::with_capacity(256);
    loop {
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        while let Some((len, binary)) = next_request(&buf) {
            let request = buf.split_to(len);
            state.requests.fetch_add(1, Ordering::SeqCst);

            let fault = *state.fault.lock();
            let reply = match fault {
                Fault::Close => return,
                Fault::Hang => continue,
                Fault::None => reply_to(&request, binary, false),
                Fault::ServerError => reply_to(&request, binary, true),
            };
            if let Some(reply) = reply {
                if socket.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Length of the first complete request in `buf` and whether it is binary.
fn next_request(buf: &[u8]) -> Option<(usize, bool)> {
    if buf.first() == Some(&REQUEST_MAGIC) {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let body = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        let total = HEADER_SIZE + body;
        (buf.len() >= total).then_some((total, true))
    } else {
        buf.windows(2)
            .position(|w| w == b"\r\n")
            .map(|end| (end + 2, false))
    }
}

fn reply_to(request: &[u8], binary: bool, failing: bool) -> Option<Vec<u8>> {
    if binary {
        let opcode = request[1];
        let status = match (opcode, failing) {
            (OPCODE_FLUSH, false) => 0,
            (OPCODE_FLUSH, true) => STATUS_INTERNAL_ERROR,
            // unknown command
            _ => 0x0081,
        };
        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        header.put_u8(RESPONSE_MAGIC);
        header.put_u8(opcode);
        header.put_u16(0);
        header.put_u8(0);
        header.put_u8(0);
        header.put_u16(status);
        header.put_u32(0);
        header.put_slice(&request[12..16]); // opaque
        header.put_u64(0);
        return Some(header.to_vec());
    }

    let line = &request[..request.len() - 2];
    let mut words = line.split(|&b| b == b' ').filter(|w| !w.is_empty());
    if words.next() != Some(&b"flush_all"[..]) {
        return Some(b"ERROR\r\n".to_vec());
    }
    if words.any(|w| w == b"noreply") {
        return None;
    }
    if failing {
        Some(b"SERVER_ERROR injected fault\r\n".to_vec())
    } else {
        Some(b"OK\r\n".to_vec())
    }
}
