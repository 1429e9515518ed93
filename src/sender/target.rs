//! One receiver connection owned by a sender

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::io::{is_peer_closed, write_bytes};

/// Connection to one resolved receiver endpoint
///
/// Created unconnected; connected lazily on the first delivery and replaced
/// with a fresh connection whenever the peer is found gone.
#[derive(Debug)]
pub struct Target {
    endpoint: SocketAddr,
    stream: Option<TcpStream>,
}

impl Target {
    /// Unconnected target for `endpoint`
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            stream: None,
        }
    }

    /// Receiver endpoint
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Whether the stored connection is still usable
    pub fn is_connected(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| !is_peer_closed(stream))
    }

    /// Open a fresh connection, replacing any stored one
    pub async fn connect(&mut self, connect_timeout: Duration) -> Result<()> {
        self.stream = None;

        let stream = timeout(connect_timeout, TcpStream::connect(self.endpoint))
            .await
            .map_err(|_| Error::ConnectTimeout(self.endpoint))??;
        stream.set_nodelay(true)?;

        tracing::debug!(endpoint = %self.endpoint, "Connected to receiver");
        self.stream = Some(stream);
        Ok(())
    }

    /// Write one encoded frame, connecting first if needed
    ///
    /// On failure the connection is discarded.
    pub async fn deliver(
        &mut self,
        frame: &[u8],
        connect_timeout: Duration,
        chunk_size: usize,
    ) -> Result<()> {
        if !self.is_connected() {
            self.connect(connect_timeout).await?;
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Closed);
        };

        if let Err(e) = write_bytes(stream, chunk_size, frame).await {
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }
}
