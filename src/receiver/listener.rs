//! Listening socket, accept loop and per-connection read loops

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::state::{shutdown_requested, MessageEvent, ReceiverPhase, Shared};
use crate::codec::{Codec, Payload};
use crate::protocol::{read_message, FrameLimits, InboundFrame};
use crate::registry::ports::local_addresses;

/// Local address to bind for an advertised endpoint
///
/// The advertised address itself when it belongs to this machine,
/// otherwise every interface of its family (the advertised address is then
/// reached through a NAT or tunnel).
fn bind_addr(endpoint: SocketAddr) -> SocketAddr {
    let ip = if local_addresses().contains(&endpoint.ip()) {
        endpoint.ip()
    } else if endpoint.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, endpoint.port())
}

/// Bind a listener for an advertised endpoint
pub(crate) fn bind(endpoint: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let addr = bind_addr(endpoint);

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Whether this process may bind `endpoint` right now
///
/// Rejects ports held by sockets the port table missed and ports the
/// process lacks permission for. The trial socket is closed at once.
pub(crate) fn can_bind(endpoint: SocketAddr) -> bool {
    std::net::TcpListener::bind(bind_addr(endpoint)).is_ok()
}

/// Accept connections while anyone is subscribed, until shutdown
pub(crate) async fn accept_loop<C: Codec>(
    listener: TcpListener,
    shared: Arc<Shared<C::Item>>,
    codec: Arc<C>,
    limits: FrameLimits,
) {
    let mut shutdown = shared.shutdown_signal();

    while !shared.is_disposed() {
        if !shared.has_subscribers() {
            shared.set_phase(ReceiverPhase::Idle);
            tokio::select! {
                _ = shared.subscribed.notified() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
            continue;
        }

        shared.set_phase(ReceiverPhase::Accepting);
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown_requested(&mut shutdown) => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(handle = %shared.handle, peer = %peer, "Sender connected");
                tokio::spawn(read_loop(
                    stream,
                    peer,
                    Arc::clone(&shared),
                    Arc::clone(&codec),
                    limits,
                ));
            }
            Err(e) => {
                tracing::debug!(handle = %shared.handle, error = %e, "Failed to accept connection");
            }
        }
    }

    // Dropping the listener closes the socket
    drop(listener);
    tracing::debug!(handle = %shared.handle, "Accept loop stopped");
}

/// Read frames from one sender until it disconnects, misbehaves or the
/// receiver shuts down
async fn read_loop<C: Codec>(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared<C::Item>>,
    codec: Arc<C>,
    limits: FrameLimits,
) {
    let mut shutdown = shared.shutdown_signal();

    while !shared.is_disposed() {
        let frame = tokio::select! {
            frame = read_message(&mut stream, &shared.handle, limits) => frame,
            _ = shutdown_requested(&mut shutdown) => break,
        };

        let (is_raw, bytes) = match frame {
            Ok(InboundFrame::Message { is_raw, payload }) => (is_raw, payload),
            Ok(InboundFrame::Foreign) => {
                tracing::debug!(handle = %shared.handle, peer = %peer, "Foreign handle, closing connection");
                break;
            }
            Err(e) => {
                // EOF lands here too; the sender went away
                tracing::debug!(handle = %shared.handle, peer = %peer, error = %e, "Connection closed");
                break;
            }
        };

        let payload = if is_raw {
            Payload::Bytes(bytes)
        } else {
            match codec.deserialize(&bytes) {
                Ok(item) => Payload::Object(item),
                Err(e) => {
                    tracing::debug!(handle = %shared.handle, peer = %peer, error = %e, "Undecodable message, closing connection");
                    break;
                }
            }
        };

        if shared.is_disposed() {
            break;
        }

        let event = Arc::new(MessageEvent {
            handle: shared.handle.clone(),
            payload,
            peer,
        });
        // No subscribers left is not an error; the message is simply dropped
        let _ = shared.events.send(event);
    }
}
