//! Receiver lifecycle state

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Notify};

use crate::codec::Payload;
use crate::handle::Handle;

/// Receiver lifecycle phase
///
/// ```text
/// Starting -> Listening -> Accepting <-> Idle
///                              \         /
///                               Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverPhase {
    /// Registering and binding
    Starting = 0,
    /// Socket bound, accept loop not yet running
    Listening = 1,
    /// Accepting connections for at least one subscriber
    Accepting = 2,
    /// No subscribers; connections stay queued in the backlog
    Idle = 3,
    /// Shut down
    Disposed = 4,
}

impl ReceiverPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReceiverPhase::Starting,
            1 => ReceiverPhase::Listening,
            2 => ReceiverPhase::Accepting,
            3 => ReceiverPhase::Idle,
            _ => ReceiverPhase::Disposed,
        }
    }
}

/// A message delivered to subscribers
#[derive(Debug, Clone)]
pub struct MessageEvent<T> {
    /// Handle the message was sent under
    pub handle: Handle,
    /// Raw bytes or the decoded object
    pub payload: Payload<T>,
    /// Address of the sending connection
    pub peer: SocketAddr,
}

/// State shared by a receiver and its background tasks
pub(crate) struct Shared<T> {
    pub handle: Handle,
    phase: AtomicU8,
    pub events: broadcast::Sender<Arc<MessageEvent<T>>>,
    pub subscribed: Notify,
    shutdown: watch::Sender<bool>,
}

impl<T> Shared<T> {
    pub fn new(handle: Handle, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        let (shutdown, _) = watch::channel(false);

        Self {
            handle,
            phase: AtomicU8::new(ReceiverPhase::Starting as u8),
            events,
            subscribed: Notify::new(),
            shutdown,
        }
    }

    pub fn phase(&self) -> ReceiverPhase {
        ReceiverPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move to `phase` unless already disposed
    pub fn set_phase(&self, phase: ReceiverPhase) {
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ReceiverPhase::Disposed as u8).then_some(phase as u8)
            });
    }

    pub fn is_disposed(&self) -> bool {
        self.phase() == ReceiverPhase::Disposed
    }

    pub fn has_subscribers(&self) -> bool {
        self.events.receiver_count() > 0
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Flag the receiver disposed, then wake every task waiting on shutdown
    ///
    /// Returns false if it was already disposed.
    pub fn dispose(&self) -> bool {
        let previous = self.phase.swap(ReceiverPhase::Disposed as u8, Ordering::AcqRel);
        if previous == ReceiverPhase::Disposed as u8 {
            return false;
        }
        self.shutdown.send_replace(true);
        true
    }
}

/// Resolve once `signal` reports shutdown
pub(crate) async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which only happens on drop
    let _ = signal.wait_for(|stopped| *stopped).await;
}
