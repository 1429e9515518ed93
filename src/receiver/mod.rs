//! Message receiver
//!
//! A receiver registers one listening endpoint under its handle and
//! broadcasts every message it reads to its subscribers.
//!
//! ```text
//!                          Receiver
//!   bind: register ──► listen ──► accept_loop ──┬─► read_loop(sender A) ─┐
//!         (retry on port race)     │            └─► read_loop(sender B) ─┤
//!                                  │ idle while                          ▼
//!                                  │ nobody subscribes        broadcast::Sender
//!                                  ▼                                     │
//!                          watch: shutdown                 subscribe() ◄─┘
//! ```
//!
//! Connections presenting another handle are closed without an event; the
//! registry service uses exactly that to probe whether a port is alive.

pub mod config;
mod listener;
pub mod state;

pub use config::ReceiverConfig;
pub use state::{MessageEvent, ReceiverPhase};

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::protocol::constants::{LOCAL_BACKLOG, REMOTE_BACKLOG};
use crate::registry::EndpointRegistry;
use state::Shared;

/// Receives messages sent under one handle
///
/// # Example
/// ```no_run
/// use ipc_fanout::codec::{JsonCodec, Payload};
/// use ipc_fanout::handle::Handle;
/// use ipc_fanout::receiver::{Receiver, ReceiverConfig};
/// use ipc_fanout::registry::{EndpointRegistry, RegistryConfig};
///
/// # async fn example() -> ipc_fanout::error::Result<()> {
/// let registry = EndpointRegistry::local(RegistryConfig::default());
/// let receiver = Receiver::bind(
///     Handle::new("prices")?,
///     &registry,
///     JsonCodec::<f64>::new(),
///     ReceiverConfig::default(),
/// )
/// .await?;
///
/// let mut messages = receiver.subscribe();
/// while let Ok(message) = messages.recv().await {
///     if let Payload::Object(price) = &message.payload {
///         println!("{}: {}", message.handle, price);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Receiver<C: Codec> {
    shared: Arc<Shared<C::Item>>,
    endpoint: SocketAddr,
    local_addr: SocketAddr,
}

impl<C: Codec> Receiver<C> {
    /// Register under `handle` and start listening
    ///
    /// Ports this process cannot bind are skipped during allocation.
    /// Registration and bind are retried with a linearly growing backoff
    /// when another process grabs the chosen port first, each retry moving
    /// past the ports already tried. An unreachable registry service fails
    /// immediately.
    pub async fn bind(
        handle: Handle,
        registry: &EndpointRegistry,
        codec: C,
        config: ReceiverConfig,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new(handle.clone(), config.event_capacity));
        let backlog = if registry.is_remote() {
            REMOTE_BACKLOG
        } else {
            LOCAL_BACKLOG
        };

        let (endpoint, listener) =
            listen(&handle, registry, &config, backlog, listener::can_bind).await?;

        let local_addr = listener.local_addr()?;
        shared.set_phase(ReceiverPhase::Listening);
        tracing::info!(handle = %handle, endpoint = %endpoint, "Receiver listening");

        tokio::spawn(listener::accept_loop(
            listener,
            Arc::clone(&shared),
            Arc::new(codec),
            config.frame_limits(),
        ));

        Ok(Self {
            shared,
            endpoint,
            local_addr,
        })
    }

    /// Subscribe to incoming messages
    ///
    /// The receiver only accepts connections while at least one
    /// subscription is alive.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MessageEvent<C::Item>>> {
        let rx = self.shared.events.subscribe();
        self.shared.subscribed.notify_one();
        rx
    }

    /// Handle this receiver listens for
    pub fn handle(&self) -> &Handle {
        &self.shared.handle
    }

    /// Endpoint advertised in the registry
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> ReceiverPhase {
        self.shared.phase()
    }

    /// Whether [`Receiver::shutdown`] has run
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Stop listening and end every connection
    ///
    /// The registry entry is left in place; the next reader prunes it once
    /// the port is released.
    pub fn shutdown(&self) {
        if self.shared.dispose() {
            tracing::info!(handle = %self.shared.handle, endpoint = %self.endpoint, "Receiver disposed");
        }
    }
}

impl<C: Codec> Drop for Receiver<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: Codec> fmt::Debug for Receiver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("handle", &self.shared.handle)
            .field("endpoint", &self.endpoint)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Register an endpoint and bind it, retrying on lost port races
async fn listen<F>(
    handle: &Handle,
    registry: &EndpointRegistry,
    config: &ReceiverConfig,
    backlog: u32,
    usable: F,
) -> Result<(SocketAddr, TcpListener)>
where
    F: Fn(SocketAddr) -> bool + Send + Sync,
{
    let mut tried = HashSet::new();

    for attempt in 1..=config.registration_attempts {
        let endpoint = registry
            .register_receiver_where(handle, config.host, config.allowed_ports.as_deref(), |endpoint| {
                !tried.contains(&endpoint.port()) && usable(endpoint)
            })
            .await?;

        match listener::bind(endpoint, backlog) {
            Ok(listener) => return Ok((endpoint, listener)),
            Err(e) => {
                tracing::debug!(
                    handle = %handle,
                    endpoint = %endpoint,
                    attempt = attempt,
                    error = %e,
                    "Port taken before bind, retrying"
                );
                tried.insert(endpoint.port());
                tokio::time::sleep(config.retry_backoff * attempt).await;
            }
        }
    }

    Err(Error::RegistrationFailed {
        handle: handle.to_string(),
        attempts: config.registration_attempts,
    })
}
