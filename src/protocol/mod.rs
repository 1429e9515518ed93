//! Wire protocol shared by senders, receivers and the registry channel
//!
//! - [`io`]: chunked reads and writes, length-prefixed frames
//! - [`message`]: the frame a sender writes to each receiver
//! - [`secure`]: gzip and password-based encryption for registry exchanges
//! - [`constants`]: sizes, defaults and reserved characters

pub mod constants;
pub mod io;
pub mod message;
pub mod secure;

pub use message::{encode_message, read_message, FrameLimits, InboundFrame};
pub use secure::{Cipher, SecureTransform};
