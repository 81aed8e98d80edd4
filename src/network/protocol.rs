//! Wire encoding for the commands the router itself issues.
//!
//! Only `flush_all` is needed here. Text form:
//!
//! ```text
//! flush_all [exptime] [noreply]\r\n   →   OK\r\n
//! ```
//!
//! Binary form is a 24-byte request header (magic 0x80, opcode 0x08) with
//! a 4-byte expiration extra. Over UDP every request carries an 8-byte frame
//! header and is sent `noreply`.

use crate::buffer::ByteBuffer;
use crate::error::{BufferError, NetworkError};
use crate::types::{ProtocolMode, TransportKind};
use bytes::{BufMut, BytesMut};

pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;
pub const OPCODE_FLUSH: u8 = 0x08;
pub const HEADER_SIZE: usize = 24;
pub const UDP_HEADER_SIZE: usize = 8;

/// Write a `flush_all` request into `buf`, replacing its contents.
///
/// Returns whether the server will answer.
pub fn encode_flush(
    buf: &mut ByteBuffer,
    mode: ProtocolMode,
    transport: TransportKind,
    expire: u32,
    request_id: u16,
) -> Result<bool, BufferError> {
    buf.reset();
    let udp = transport == TransportKind::Udp;

    if udp {
        let mut frame = BytesMut::with_capacity(UDP_HEADER_SIZE);
        frame.put_u16(request_id);
        frame.put_u16(0); // sequence number
        frame.put_u16(1); // datagrams in this message
        frame.put_u16(0); // reserved
        buf.append(&frame)?;
    }

    match mode {
        ProtocolMode::Text => {
            buf.append(b"flush_all")?;
            if expire > 0 {
                buf.append(format!(" {}", expire).as_bytes())?;
            }
            if udp {
                buf.append(b" noreply")?;
            }
            buf.append(b"\r\n")?;
        }
        ProtocolMode::Binary => {
            let mut header = BytesMut::with_capacity(HEADER_SIZE + 4);
            header.put_u8(REQUEST_MAGIC);
            header.put_u8(OPCODE_FLUSH);
            header.put_u16(0); // key length
            header.put_u8(4); // extras length
            header.put_u8(0); // data type
            header.put_u16(0); // vbucket
            header.put_u32(4); // total body
            header.put_u32(u32::from(request_id));
            header.put_u64(0); // cas
            header.put_u32(expire);
            buf.append(&header)?;
        }
    }

    Ok(!udp)
}

/// Check a `flush_all` reply.
///
/// `Ok(None)` means more bytes are needed. Any answer other than success
/// is a protocol error carrying what the server said.
pub fn parse_flush_reply(mode: ProtocolMode, data: &[u8]) -> Result<Option<usize>, NetworkError> {
    match mode {
        ProtocolMode::Text => {
            let Some(end) = data.windows(2).position(|w| w == b"\r\n") else {
                return Ok(None);
            };
            let line = &data[..end];
            if line == b"OK" {
                Ok(Some(end + 2))
            } else {
                Err(NetworkError::Protocol(
                    String::from_utf8_lossy(line).into_owned(),
                ))
            }
        }
        ProtocolMode::Binary => {
            if data.len() < HEADER_SIZE {
                return Ok(None);
            }
            if data[0] != RESPONSE_MAGIC {
                return Err(NetworkError::Protocol(format!(
                    "invalid response magic {:#04x}",
                    data[0]
                )));
            }
            let body = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;
            let total = HEADER_SIZE + body;
            if data.len() < total {
                return Ok(None);
            }
            let status = u16::from_be_bytes([data[6], data[7]]);
            if status != 0 {
                return Err(NetworkError::Protocol(format!(
                    "flush failed with status {:#06x}",
                    status
                )));
            }
            Ok(Some(total))
        }
    }
}
