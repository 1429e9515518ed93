//! Error types
//!
//! Failures are scoped to one send, one connection or one registration
//! attempt. Nothing here is fatal to the process.

use std::io;
use std::net::SocketAddr;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Handle is empty or contains a reserved character
    #[error("invalid handle {handle:?}: {reason}")]
    InvalidHandle {
        handle: String,
        reason: &'static str,
    },

    /// The remote registry service could not be reached
    ///
    /// Kept apart from [`Error::Io`] so callers can tell a configuration or
    /// network problem from an ordinary failed exchange.
    #[error(
        "could not connect to the registry service at {addr}: {source}; \
         check firewall settings and that all machines share a network"
    )]
    ServiceUnreachable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Connecting to a receiver did not complete in time
    #[error("could not connect to receiver {0} within the connect timeout")]
    ConnectTimeout(SocketAddr),

    /// Registry read or write failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Payload (de)serialization failed
    #[error("codec error: {0}")]
    Codec(String),

    /// Compression or encryption of a registry exchange failed
    #[error("secure transform failed: {0}")]
    Crypto(String),

    /// A receiver could not register and bind within the attempt budget
    #[error("receiver for handle {handle:?} failed to register after {attempts} attempts")]
    RegistrationFailed { handle: String, attempts: u32 },

    /// Operation on a disposed sender or receiver
    #[error("instance is disposed")]
    Closed,

    /// Socket or file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error means the registry service is unreachable
    pub fn is_service_unreachable(&self) -> bool {
        matches!(self, Error::ServiceUnreachable { .. })
    }
}
