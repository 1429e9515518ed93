//! Connection to the registry service

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_REGISTRY_BODY_SIZE};
use crate::protocol::io::{is_peer_closed, read_frame, write_frame};
use crate::protocol::secure::{Cipher, SecureTransform};

/// One persistent, lazily established connection to the registry service
///
/// Exchanges are serialized: a request is always followed by its response
/// on the same stream.
#[derive(Debug)]
pub struct ServiceConnection {
    config: ServiceConfig,
    transform: SecureTransform,
    stream: Mutex<Option<TcpStream>>,
}

impl ServiceConnection {
    /// Create a connection; no socket is opened until the first exchange
    ///
    /// Derives the channel cipher when credentials are configured, which
    /// fails if the salt is too short.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let transform = match &config.credentials {
            Some(credentials) => {
                SecureTransform::encrypted(Cipher::new(&credentials.password, &credentials.salt)?)
            }
            None => SecureTransform::plain(),
        };

        Ok(Self {
            config,
            transform,
            stream: Mutex::new(None),
        })
    }

    /// Address of the service
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Send `body` and return the service's reply
    ///
    /// An empty body reads the whole registry; anything else replaces it.
    pub async fn exchange(&self, body: &str) -> Result<String> {
        let mut guard = self.stream.lock().await;

        let stream = match guard.take() {
            Some(stream) if !is_peer_closed(&stream) => stream,
            Some(_) => {
                tracing::debug!(addr = %self.config.addr, "Registry service closed the connection, reconnecting");
                self.connect().await?
            }
            None => self.connect().await?,
        };
        let stream = guard.insert(stream);

        let request = self.transform.seal(body)?;
        let result = timeout(self.config.request_timeout, async {
            write_frame(stream, DEFAULT_CHUNK_SIZE, &request).await?;
            read_frame(stream, DEFAULT_CHUNK_SIZE, MAX_REGISTRY_BODY_SIZE).await
        })
        .await;

        let reply = match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                guard.take();
                return Err(e.into());
            }
            Err(_) => {
                guard.take();
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "registry service did not answer in time",
                )));
            }
        };

        self.transform.open(&reply)
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = self.config.addr;

        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(Error::ServiceUnreachable { addr, source }),
            Err(_) => {
                return Err(Error::ServiceUnreachable {
                    addr,
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        stream.set_nodelay(true)?;
        tracing::debug!(addr = %addr, encrypted = self.transform.is_encrypted(), "Connected to registry service");
        Ok(stream)
    }
}
