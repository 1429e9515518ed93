//! Registry error types
//!
//! Error types for endpoint registry operations.

use std::io;

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Stored or received registry text could not be decoded
    #[error("corrupt registry encoding: {0}")]
    Corrupt(String),

    /// Every candidate port is in use
    #[error("no free TCP port available")]
    NoFreePort,

    /// The OS port table could not be read
    #[error("could not read the TCP port table: {0}")]
    PortTable(#[source] io::Error),

    /// Reading, locking or writing the local store failed
    #[error("registry store {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: io::Error,
    },
}
