//! Receiver configuration

use std::net::IpAddr;
use std::time::Duration;

use crate::protocol::constants::*;
use crate::protocol::FrameLimits;

/// Receiver configuration options
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Address to advertise in the registry (None = first non-loopback address)
    pub host: Option<IpAddr>,

    /// Ports the receiver may listen on (None = any free port)
    pub allowed_ports: Option<Vec<u16>>,

    /// Register-and-bind attempts before giving up
    pub registration_attempts: u32,

    /// Backoff unit between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,

    /// Capacity of the message broadcast channel
    pub event_capacity: usize,

    /// Largest payload accepted from a sender
    pub max_payload_size: u64,

    /// Maximum bytes per socket read
    pub read_chunk_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: None,
            allowed_ports: None,
            registration_attempts: DEFAULT_REGISTRATION_ATTEMPTS,
            retry_backoff: DEFAULT_REGISTRATION_BACKOFF,
            event_capacity: 1024,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ReceiverConfig {
    /// Advertise `host` instead of the detected address
    ///
    /// Useful when senders reach this machine through another network.
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Only listen on one of `ports`
    pub fn allowed_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.allowed_ports = Some(ports.into());
        self
    }

    /// Set the number of registration attempts
    pub fn registration_attempts(mut self, attempts: u32) -> Self {
        self.registration_attempts = attempts.max(1);
        self
    }

    /// Set the retry backoff unit
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the broadcast channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the largest accepted payload
    pub fn max_payload_size(mut self, size: u64) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the socket read chunk size
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub(crate) fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            chunk_size: self.read_chunk_size,
            max_payload_size: self.max_payload_size,
        }
    }
}
