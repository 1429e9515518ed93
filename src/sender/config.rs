//! Sender configuration

use std::time::Duration;

use crate::protocol::constants::*;

/// Sender configuration options
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Reuse the last serialized frame when an object payload hashes the same
    ///
    /// Two different payloads with colliding hashes would resend the older
    /// one; only enable for types with a sound `Hash`.
    pub buffered: bool,

    /// Connection timeout per receiver
    pub connect_timeout: Duration,

    /// Maximum bytes per socket write
    pub write_chunk_size: usize,

    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            buffered: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_chunk_size: DEFAULT_CHUNK_SIZE,
            event_capacity: 256,
        }
    }
}

impl SenderConfig {
    /// Enable or disable the serialized payload cache
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket write chunk size
    pub fn write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size.max(1);
        self
    }

    /// Set the event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
