//! Receiver message frames
//!
//! ```text
//! +----------------+--------------+------+-----------------+---------------+
//! | handle len (8) | handle bytes | flag | payload len (8) | payload bytes |
//! +----------------+--------------+------+-----------------+---------------+
//! ```
//!
//! The flag is `1` for raw bytes and `0` for a codec-serialized object. A
//! receiver reads the handle first and drops the connection if it does not
//! match its own, so the payload of a foreign frame is never read.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use super::constants::{FLAG_OBJECT, FLAG_RAW_BYTES, LENGTH_PREFIX_SIZE, MAX_HANDLE_LEN};
use super::io::{checked_len, read_exact_bytes, read_length};
use crate::handle::Handle;

/// Read limits applied to inbound message frames
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Maximum bytes per socket read
    pub chunk_size: usize,
    /// Largest payload accepted
    pub max_payload_size: u64,
}

/// Result of reading one frame from a receiver connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Frame addressed to this receiver
    Message { is_raw: bool, payload: Bytes },
    /// Frame carrying a different handle (wrong sender or a liveness probe)
    Foreign,
}

/// Encode a message frame for `handle`
pub fn encode_message(handle: &Handle, is_raw: bool, payload: &[u8]) -> Bytes {
    let handle = handle.as_bytes();
    let mut buf =
        BytesMut::with_capacity(2 * LENGTH_PREFIX_SIZE + handle.len() + 1 + payload.len());

    buf.put_u64_le(handle.len() as u64);
    buf.put_slice(handle);
    buf.put_u8(if is_raw { FLAG_RAW_BYTES } else { FLAG_OBJECT });
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(payload);

    buf.freeze()
}

/// Read one message frame, checking its handle against `expected`
///
/// A handle of the wrong length or content yields [`InboundFrame::Foreign`]
/// without consuming the rest of the frame. Truncation and oversized
/// payloads are I/O errors.
pub async fn read_message<R>(
    reader: &mut R,
    expected: &Handle,
    limits: FrameLimits,
) -> io::Result<InboundFrame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let handle_len = read_length(reader, limits.chunk_size).await?;
    if handle_len > MAX_HANDLE_LEN || handle_len != expected.as_bytes().len() as u64 {
        return Ok(InboundFrame::Foreign);
    }

    let handle = read_exact_bytes(reader, limits.chunk_size, handle_len as usize).await?;
    if &handle[..] != expected.as_bytes() {
        return Ok(InboundFrame::Foreign);
    }

    let flag = read_exact_bytes(reader, limits.chunk_size, 1).await?;
    let is_raw = match flag[0] {
        FLAG_RAW_BYTES => true,
        FLAG_OBJECT => false,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown payload flag {}", other),
            ))
        }
    };

    let payload_len = read_length(reader, limits.chunk_size).await?;
    let payload_len = checked_len(payload_len, limits.max_payload_size)?;
    let payload = read_exact_bytes(reader, limits.chunk_size, payload_len).await?;

    Ok(InboundFrame::Message {
        is_raw,
        payload: payload.freeze(),
    })
}
