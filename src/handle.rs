//! Channel handles
//!
//! A handle links one sender to its receivers. It is written verbatim into
//! the registry encoding, so the delimiters of that encoding may not appear
//! in it.

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::constants::RESERVED_HANDLE_CHARS;

/// Validated channel name shared by a sender and its receivers
///
/// No uniqueness is enforced: two unrelated applications picking the same
/// handle will receive each other's messages. Use something like a GUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    /// Validate and wrap a handle
    pub fn new(handle: impl Into<String>) -> Result<Self> {
        let handle = handle.into();

        if handle.trim().is_empty() {
            return Err(Error::InvalidHandle {
                handle,
                reason: "handle is empty",
            });
        }
        if handle.contains(RESERVED_HANDLE_CHARS) {
            return Err(Error::InvalidHandle {
                handle,
                reason: "handle contains one of the reserved characters ; , * + -",
            });
        }

        Ok(Self(handle))
    }

    /// The handle as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The handle's UTF-8 bytes, as written on the wire
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Handle {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}
