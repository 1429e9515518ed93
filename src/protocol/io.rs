//! Chunked stream I/O and length-prefixed frames
//!
//! Every frame on the wire is `[8-byte little-endian length][payload]`.
//! Reads and writes are split into chunks of at most `chunk_size` bytes.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::constants::LENGTH_PREFIX_SIZE;

/// Read up to `len` bytes in chunks of at most `chunk_size`
///
/// Stops early when the stream yields zero bytes. The returned buffer is then
/// shorter than `len`; callers must treat that as a dropped connection, not as
/// valid data. See [`read_exact_bytes`].
pub async fn read_bytes<R>(reader: &mut R, chunk_size: usize, len: usize) -> io::Result<BytesMut>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut buf = BytesMut::zeroed(len);
    let mut filled = 0;

    while filled < len {
        let end = filled + chunk_size.min(len - filled);
        let n = reader.read(&mut buf[filled..end]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    buf.truncate(filled);
    Ok(buf)
}

/// Read exactly `len` bytes, failing with `UnexpectedEof` on a short read
pub async fn read_exact_bytes<R>(reader: &mut R, chunk_size: usize, len: usize) -> io::Result<BytesMut>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let buf = read_bytes(reader, chunk_size, len).await?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended after {} of {} bytes", buf.len(), len),
        ));
    }
    Ok(buf)
}

/// Write `data` in chunks of at most `chunk_size`, then flush
pub async fn write_bytes<W>(writer: &mut W, chunk_size: usize, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    for chunk in data.chunks(chunk_size.max(1)) {
        writer.write_all(chunk).await?;
    }
    writer.flush().await
}

/// Read an 8-byte little-endian length prefix
pub async fn read_length<R>(reader: &mut R, chunk_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let buf = read_exact_bytes(reader, chunk_size, LENGTH_PREFIX_SIZE).await?;
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&buf);
    Ok(u64::from_le_bytes(prefix))
}

/// Prefix `body` with its length
pub fn encode_frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u64_le(body.len() as u64);
    buf.put_slice(body);
    buf.freeze()
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, chunk_size: usize, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_bytes(writer, chunk_size, &encode_frame(body)).await
}

/// Read one length-prefixed frame, rejecting bodies longer than `max_len`
pub async fn read_frame<R>(reader: &mut R, chunk_size: usize, max_len: u64) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_length(reader, chunk_size).await?;
    let len = checked_len(len, max_len)?;
    Ok(read_exact_bytes(reader, chunk_size, len).await?.freeze())
}

/// Validate a length read from the wire against an upper bound
pub fn checked_len(len: u64, max_len: u64) -> io::Result<usize> {
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} exceeds limit {}", len, max_len),
        ));
    }
    usize::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "frame length overflows usize")
    })
}

/// Check whether the peer has closed a stream we only ever write to
///
/// Never blocks. A pending EOF or socket error means the connection must be
/// replaced before the next write.
pub fn is_peer_closed(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_all_chunk_sizes() {
        for len in [0usize, 1, 2, 7, 8, 9, 63, 64, 65, 300] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();

            for chunk in [1usize, 2, 3, 8, 64, 1024] {
                let mut wire = Vec::new();
                write_bytes(&mut wire, chunk, &data).await.unwrap();
                assert_eq!(wire, data);

                let mut reader = &wire[..];
                let read = read_bytes(&mut reader, chunk, len).await.unwrap();
                assert_eq!(&read[..], &data[..], "len={} chunk={}", len, chunk);
            }
        }
    }

    #[tokio::test]
    async fn test_short_read_truncates() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"abc")
            .build();

        let read = read_bytes(&mut mock, 2, 5).await.unwrap();
        assert_eq!(&read[..], b"abc");
    }

    #[tokio::test]
    async fn test_read_exact_fails_on_truncation() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"abc")
            .build();

        let err = read_exact_bytes(&mut mock, 16, 5).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_reads_across_split_segments() {
        // Data arriving in pieces smaller than the chunk size
        let mut mock = tokio_test::io::Builder::new()
            .read(b"he")
            .read(b"ll")
            .read(b"o")
            .build();

        let read = read_exact_bytes(&mut mock, 4, 5).await.unwrap();
        assert_eq!(&read[..], b"hello");
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 3, b"payload").await.unwrap();
        assert_eq!(&wire[..8], &7u64.to_le_bytes());

        let mut reader = &wire[..];
        let body = read_frame(&mut reader, 3, 1024).await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn test_frame_over_limit_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 64, &[0u8; 32]).await.unwrap();

        let mut reader = &wire[..];
        let err = read_frame(&mut reader, 64, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_peer_closed_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        assert!(!is_peer_closed(&client));

        drop(server);
        // Give the FIN time to arrive
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(is_peer_closed(&client));
    }
}
