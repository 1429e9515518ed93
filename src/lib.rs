//! Handle-addressed process-to-process messaging over TCP
//!
//! A [`Sender`] broadcasts messages to every [`Receiver`] that shares its
//! handle. Neither side knows the other's address: receivers register their
//! listening endpoint in an [`EndpointRegistry`], senders look it up before
//! each send.
//!
//! ```text
//!   Receiver ──register──► EndpointRegistry ◄──resolve── Sender
//!      ▲                   (local file or                  │
//!      │                    registry service)              │
//!      └──────────── [len][handle][flag][len][payload] ────┘
//! ```
//!
//! The registry either lives in a per-user file guarded by a cross-process
//! lock, or on a registry service reached over a compressed and optionally
//! encrypted channel. Stale entries are pruned on every read by checking
//! ports against the OS's TCP table.
//!
//! # Example
//! ```no_run
//! use ipc_fanout::{EndpointRegistry, Handle, JsonCodec, Payload};
//! use ipc_fanout::{Receiver, ReceiverConfig, RegistryConfig, Sender, SenderConfig};
//!
//! # async fn example() -> ipc_fanout::Result<()> {
//! let registry = EndpointRegistry::local(RegistryConfig::default());
//! let handle = Handle::new("8B20C7BD634B408DB337732644177389")?;
//!
//! let receiver = Receiver::bind(
//!     handle.clone(),
//!     &registry,
//!     JsonCodec::<String>::new(),
//!     ReceiverConfig::default(),
//! )
//! .await?;
//! let mut messages = receiver.subscribe();
//!
//! let (sender, _events) = Sender::new(
//!     handle,
//!     registry,
//!     JsonCodec::<String>::new(),
//!     SenderConfig::default(),
//! );
//! sender.send(Payload::Object("hello".to_string())).await?;
//!
//! let message = messages.recv().await.ok();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod service;

pub use codec::{Codec, JsonCodec, Payload};
pub use error::{Error, Result};
pub use handle::Handle;
pub use receiver::{MessageEvent, Receiver, ReceiverConfig, ReceiverPhase};
pub use registry::{EndpointRegistry, RegistryConfig};
pub use sender::{SendEvent, Sender, SenderConfig};
pub use service::{Credentials, ServiceConfig};
