//! Registry service client
//!
//! Relays registry reads and writes to a remote service when senders and
//! receivers do not share a machine. One request/response exchange per call,
//! each body gzipped and optionally encrypted:
//!
//! ```text
//! Client                                  Service
//!   |--- [len][seal("")] ------------------>|   read
//!   |<-- [len][seal(map)] ------------------|
//!   |--- [len][seal("h*host-1+2+,")] ------>|   replace
//!   |<-- [len][seal(ack)] ------------------|
//! ```

pub mod config;
pub mod connection;

pub use config::{Credentials, ServiceConfig};
pub use connection::ServiceConnection;
