//! Endpoint registry
//!
//! The registry maps each handle to the host and ports its receivers listen
//! on. Receivers add themselves on startup; senders read it before every send.
//! Nobody removes entries explicitly: each access prunes ports that the OS no
//! longer reports as in use.
//!
//! # Architecture
//!
//! ```text
//!                        EndpointRegistry
//!               ┌──────────────────────────────┐
//!               │ store: Arc<dyn RegistryStore>│
//!               │ ports: Arc<dyn PortTable>    │
//!               └──────────────┬───────────────┘
//!                              │ update(prune + mutate)
//!          ┌───────────────────┼────────────────────┐
//!          ▼                   ▼                    ▼
//!     LocalStore          RemoteStore          MemoryStore
//!   (file + flock)   (ServiceConnection)     (this process)
//! ```
//!
//! # Encoding
//!
//! `handle*host-port+port+,handle*host-port+,` is both the stored value and
//! the body exchanged with the registry service.

pub mod config;
pub mod endpoints;
pub mod entry;
pub mod error;
pub mod ports;
pub mod store;

pub use config::RegistryConfig;
pub use endpoints::EndpointRegistry;
pub use entry::{EndpointMap, PruneScope, RegistryEntry};
pub use error::RegistryError;
pub use ports::{PortTable, SystemPortTable};
pub use store::{LocalStore, MapUpdate, MemoryStore, RegistryStore, RemoteStore};
