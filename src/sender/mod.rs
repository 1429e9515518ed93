//! Message sender
//!
//! A sender resolves its handle's receivers on every send and fans the
//! message out to all of them concurrently.
//!
//! ```text
//!  send(payload)
//!     │  lock state
//!     ├─► set_targets: registry ──► {endpoint -> Target}  (keep open, add new, drop gone)
//!     ├─► BeforeSend
//!     ├─► encode frame once (or reuse the cached one)
//!     ├─► JoinSet ──┬─► Target A: connect? + write ──► ok
//!     │             ├─► Target B: connect? + write ──► ok
//!     │             └─► Target C: connect fails ─────► SendFailed, dropped
//!     └─► AfterSend
//! ```
//!
//! Delivery is best effort. Per-target failures only show up as events; the
//! next send resolves the registry again and may reach the receiver anew.

pub mod config;
pub mod target;

pub use config::SenderConfig;
pub use target::Target;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::codec::{Codec, Payload};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::protocol::encode_message;
use crate::registry::EndpointRegistry;

/// Events from a sender
#[derive(Debug)]
pub enum SendEvent {
    /// Targets resolved, about to send
    BeforeSend { targets: Vec<SocketAddr> },

    /// Every target was attempted; `targets` are the ones that received it
    AfterSend { targets: Vec<SocketAddr> },

    /// Delivery to one target failed, or (without an endpoint) the send
    /// could not start
    SendFailed {
        endpoint: Option<SocketAddr>,
        error: Error,
    },
}

/// Connection map and payload cache, guarded by one lock per sender
#[derive(Debug, Default)]
struct SenderState {
    targets: HashMap<SocketAddr, Target>,
    cache: Option<(u64, Bytes)>,
}

impl SenderState {
    /// Reconcile the connection map with freshly resolved endpoints
    ///
    /// Known endpoints keep their connection, new ones get an unconnected
    /// target and vanished ones are closed.
    fn set_targets(&mut self, handle: &Handle, endpoints: &[SocketAddr]) {
        let mut previous = std::mem::take(&mut self.targets);

        for &endpoint in endpoints {
            let target = previous
                .remove(&endpoint)
                .unwrap_or_else(|| Target::new(endpoint));
            self.targets.insert(endpoint, target);
        }

        for endpoint in previous.into_keys() {
            tracing::debug!(handle = %handle, endpoint = %endpoint, "Receiver gone, closing connection");
        }
    }
}

/// Sends messages to every receiver of one handle
///
/// # Example
/// ```no_run
/// use ipc_fanout::codec::{JsonCodec, Payload};
/// use ipc_fanout::handle::Handle;
/// use ipc_fanout::registry::{EndpointRegistry, RegistryConfig};
/// use ipc_fanout::sender::{SendEvent, Sender, SenderConfig};
///
/// # async fn example() -> ipc_fanout::error::Result<()> {
/// let registry = EndpointRegistry::local(RegistryConfig::default());
/// let (sender, mut events) = Sender::new(
///     Handle::new("prices")?,
///     registry,
///     JsonCodec::<String>::new(),
///     SenderConfig::default(),
/// );
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         if let SendEvent::SendFailed { endpoint, error } = event {
///             eprintln!("{:?}: {}", endpoint, error);
///         }
///     }
/// });
///
/// sender.send(Payload::Object("EURUSD 1.09".to_string())).await?;
/// # Ok(())
/// # }
/// ```
pub struct Sender<C: Codec> {
    handle: Handle,
    registry: EndpointRegistry,
    codec: C,
    config: SenderConfig,
    state: Mutex<SenderState>,
    event_tx: mpsc::Sender<SendEvent>,
    closed: AtomicBool,
}

impl<C: Codec> Sender<C> {
    /// Create a new sender.
    ///
    /// Returns the sender and a receiver for events.
    pub fn new(
        handle: Handle,
        registry: EndpointRegistry,
        codec: C,
        config: SenderConfig,
    ) -> (Self, mpsc::Receiver<SendEvent>) {
        let (tx, rx) = mpsc::channel(config.event_capacity);

        let sender = Self {
            handle,
            registry,
            codec,
            config,
            state: Mutex::new(SenderState::default()),
            event_tx: tx,
            closed: AtomicBool::new(false),
        };

        (sender, rx)
    }

    /// Handle this sender sends under
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Endpoints the sender currently holds a target for
    pub async fn targets(&self) -> Vec<SocketAddr> {
        let mut targets: Vec<_> = self.state.lock().await.targets.keys().copied().collect();
        targets.sort();
        targets
    }

    /// Close every connection and refuse further sends
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock().await;
        state.targets.clear();
        state.cache = None;
        tracing::info!(handle = %self.handle, "Sender closed");
    }

    /// Whether [`Sender::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn emit(&self, event: SendEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(handle = %self.handle, event = ?event, "Event channel full, dropping event");
            }
        }
    }
}

impl<C> Sender<C>
where
    C: Codec,
    C::Item: Hash,
{
    /// Send `payload` to every registered receiver
    ///
    /// Returns once each target was attempted. Only a closed sender is an
    /// error here; everything else is reported through [`SendEvent`]s.
    ///
    /// Connections move into one task per target for the fan-out. Dropping
    /// this future aborts those tasks and closes their connections, and a
    /// task that panics loses its connection the same way. The next `send`
    /// re-creates the missing targets from the registry and reconnects.
    pub async fn send(&self, payload: Payload<C::Item>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut state = self.state.lock().await;

        let endpoints = match self.registry.receiver_endpoints(&self.handle).await {
            Ok(endpoints) => endpoints,
            Err(error) => {
                tracing::debug!(handle = %self.handle, error = %error, "Failed to resolve receivers");
                self.emit(SendEvent::SendFailed {
                    endpoint: None,
                    error,
                });
                return Ok(());
            }
        };
        state.set_targets(&self.handle, &endpoints);

        let mut targets: Vec<_> = state.targets.keys().copied().collect();
        targets.sort();
        self.emit(SendEvent::BeforeSend { targets });

        let frame = match self.encode(&mut state, &payload) {
            Ok(frame) => frame,
            Err(error) => {
                self.emit(SendEvent::SendFailed {
                    endpoint: None,
                    error,
                });
                return Ok(());
            }
        };

        let mut tasks = JoinSet::new();
        for (_, mut target) in state.targets.drain() {
            let frame = frame.clone();
            let connect_timeout = self.config.connect_timeout;
            let chunk_size = self.config.write_chunk_size;

            tasks.spawn(async move {
                let result = target.deliver(&frame, connect_timeout, chunk_size).await;
                (target, result)
            });
        }

        let mut delivered = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (target, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The target is re-created on the next send
                    tracing::warn!(handle = %self.handle, error = %e, "Delivery task failed");
                    continue;
                }
            };

            let endpoint = target.endpoint();
            match result {
                Ok(()) => {
                    delivered.push(endpoint);
                    state.targets.insert(endpoint, target);
                }
                Err(error) => {
                    tracing::debug!(handle = %self.handle, endpoint = %endpoint, error = %error, "Dropping target");
                    self.emit(SendEvent::SendFailed {
                        endpoint: Some(endpoint),
                        error,
                    });
                }
            }
        }

        delivered.sort();
        self.emit(SendEvent::AfterSend { targets: delivered });
        Ok(())
    }

    /// Encode the frame for `payload`, reusing the cached one when allowed
    fn encode(&self, state: &mut SenderState, payload: &Payload<C::Item>) -> Result<Bytes> {
        let item = match payload {
            Payload::Bytes(bytes) => return Ok(encode_message(&self.handle, true, bytes)),
            Payload::Object(item) => item,
        };

        if !self.config.buffered {
            let bytes = self.codec.serialize(item)?;
            return Ok(encode_message(&self.handle, false, &bytes));
        }

        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        let hash = hasher.finish();

        if let Some((cached, frame)) = &state.cache {
            if *cached == hash {
                return Ok(frame.clone());
            }
        }

        let bytes = self.codec.serialize(item)?;
        let frame = encode_message(&self.handle, false, &bytes);
        state.cache = Some((hash, frame.clone()));
        Ok(frame)
    }
}

impl<C: Codec> fmt::Debug for Sender<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;
    use crate::registry::{MemoryStore, RegistryConfig, SystemPortTable};

    /// Codec that counts serializations
    #[derive(Debug, Default)]
    struct CountingCodec(Arc<AtomicUsize>);

    impl Codec for CountingCodec {
        type Item = u64;

        fn serialize(&self, item: &u64) -> Result<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(item.to_le_bytes().to_vec())
        }

        fn deserialize(&self, bytes: &[u8]) -> Result<u64> {
            let bytes: [u8; 8] = bytes
                .try_into()
                .map_err(|_| Error::Codec("expected 8 bytes".into()))?;
            Ok(u64::from_le_bytes(bytes))
        }
    }

    fn sender(buffered: bool) -> (Sender<CountingCodec>, Arc<AtomicUsize>) {
        let registry = EndpointRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemPortTable),
            RegistryConfig::default(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let (sender, _events) = Sender::new(
            Handle::new("h").unwrap(),
            registry,
            CountingCodec(counter.clone()),
            SenderConfig::default().buffered(buffered),
        );
        (sender, counter)
    }

    #[test]
    fn test_set_targets_keeps_known_endpoints() {
        let handle = Handle::new("h").unwrap();
        let a: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:1001".parse().unwrap();
        let c: SocketAddr = "127.0.0.1:1002".parse().unwrap();

        let mut state = SenderState::default();
        state.set_targets(&handle, &[a, b]);
        assert_eq!(state.targets.len(), 2);

        state.set_targets(&handle, &[b, c]);
        let mut endpoints: Vec<_> = state.targets.keys().copied().collect();
        endpoints.sort();
        assert_eq!(endpoints, vec![b, c]);

        state.set_targets(&handle, &[]);
        assert!(state.targets.is_empty());
    }

    #[test]
    fn test_encode_buffered_reuses_frame() {
        let (sender, counter) = sender(true);
        let mut state = SenderState::default();

        let first = sender.encode(&mut state, &Payload::Object(7)).unwrap();
        let second = sender.encode(&mut state, &Payload::Object(7)).unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        sender.encode(&mut state, &Payload::Object(8)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_encode_unbuffered_always_serializes() {
        let (sender, counter) = sender(false);
        let mut state = SenderState::default();

        sender.encode(&mut state, &Payload::Object(7)).unwrap();
        sender.encode(&mut state, &Payload::Object(7)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(state.cache.is_none());
    }

    #[test]
    fn test_raw_bytes_bypass_codec() {
        let (sender, counter) = sender(true);
        let mut state = SenderState::default();

        let frame = sender
            .encode(&mut state, &Payload::Bytes(Bytes::from_static(b"raw")))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(frame.ends_with(b"raw"));
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (sender, _) = sender(false);
        sender.close().await;

        assert!(sender.is_closed());
        assert!(matches!(sender.send(Payload::Object(1)).await, Err(Error::Closed)));
    }
}
