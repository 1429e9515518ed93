//! Wire and policy constants

use std::time::Duration;

/// Size of every length prefix on the wire (little-endian `u64`)
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Flag byte marking a raw byte payload in a message frame
pub const FLAG_RAW_BYTES: u8 = 1;

/// Flag byte marking a codec-serialized payload in a message frame
pub const FLAG_OBJECT: u8 = 0;

/// Characters used as delimiters by the registry encoding
pub const RESERVED_HANDLE_CHARS: &[char] = &[';', ',', '*', '+', '-'];

/// Default TCP port of the registry service
pub const DEFAULT_SERVICE_PORT: u16 = 4455;

/// Upper bound on connecting to a receiver or to the registry service
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Registration is retried this many times when the chosen port is taken
pub const DEFAULT_REGISTRATION_ATTEMPTS: u32 = 20;

/// Base backoff between registration attempts, multiplied by the attempt number
pub const DEFAULT_REGISTRATION_BACKOFF: Duration = Duration::from_millis(10);

/// Default chunk size for socket reads and writes
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Longest handle a receiver will read before treating the peer as foreign
pub const MAX_HANDLE_LEN: u64 = 4096;

/// Default upper bound on a single message payload
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 256 * 1024 * 1024;

/// Default upper bound on a registry service response body
pub const MAX_REGISTRY_BODY_SIZE: u64 = 64 * 1024 * 1024;

/// Listen backlog for a receiver using a local registry store
pub const LOCAL_BACKLOG: u32 = 1;

/// Listen backlog for a receiver that the registry service may probe
pub const REMOTE_BACKLOG: u32 = 2;
