//! Registry service client configuration

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::constants::*;

/// Password and salt the channel cipher is derived from
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Shared password
    pub password: String,

    /// Key derivation salt, at least 8 bytes
    pub salt: Vec<u8>,
}

impl Credentials {
    /// Create credentials from a password and salt
    pub fn new(password: impl Into<String>, salt: impl Into<Vec<u8>>) -> Self {
        Self {
            password: password.into(),
            salt: salt.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// Registry service client configuration options
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address of the registry service
    pub addr: SocketAddr,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Upper bound on one request/response exchange
    pub request_timeout: Duration,

    /// Encrypt bodies with a key derived from these (None = compression only)
    pub credentials: Option<Credentials>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SERVICE_PORT)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_CONNECT_TIMEOUT,
            credentials: None,
        }
    }
}

impl ServiceConfig {
    /// Create a config for the service at `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    /// Set the service address
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Encrypt the channel with a password and salt
    pub fn credentials(mut self, password: impl Into<String>, salt: impl Into<Vec<u8>>) -> Self {
        self.credentials = Some(Credentials::new(password, salt));
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-exchange timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
