//! OS port table, port allocation and host discovery

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Source of the set of TCP ports currently in use on this host
///
/// The set covers listening sockets and the local side of every active
/// connection. Registry pruning and port allocation both read it.
pub trait PortTable: Send + Sync + fmt::Debug {
    /// Snapshot the ports in use
    fn used_ports(&self) -> io::Result<HashSet<u16>>;
}

/// Port table read from the operating system
///
/// Uses the platform socket table (netlink on Linux, sysctl on macOS,
/// `GetExtendedTcpTable` on Windows). On Linux `/proc/net/tcp{,6}` is read
/// when that fails, as it does in some sandboxes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortTable;

impl PortTable for SystemPortTable {
    fn used_ports(&self) -> io::Result<HashSet<u16>> {
        match socket_table_ports() {
            Ok(ports) => Ok(ports),
            #[cfg(target_os = "linux")]
            Err(e) => {
                tracing::debug!(error = %e, "Socket table unavailable, reading /proc");
                proc_net_ports()
            }
            #[cfg(not(target_os = "linux"))]
            Err(e) => Err(e),
        }
    }
}

/// Local ports of every TCP socket, listeners and connections alike
fn socket_table_ports() -> io::Result<HashSet<u16>> {
    use netstat2::{get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo};

    let families = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
    let sockets = get_sockets_info(families, ProtocolFlags::TCP).map_err(io::Error::other)?;

    Ok(sockets
        .into_iter()
        .filter_map(|socket| match socket.protocol_socket_info {
            ProtocolSocketInfo::Tcp(tcp) => Some(tcp.local_port),
            ProtocolSocketInfo::Udp(_) => None,
        })
        .collect())
}

#[cfg(target_os = "linux")]
fn proc_net_ports() -> io::Result<HashSet<u16>> {
    let mut ports = HashSet::new();
    let mut read_any = false;

    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(table) {
            Ok(text) => {
                parse_proc_net_tcp(&text, &mut ports);
                read_any = true;
            }
            // tcp6 is absent when IPv6 is disabled
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    if !read_any {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no /proc/net/tcp table available",
        ));
    }
    Ok(ports)
}

/// Collect the local ports of a `/proc/net/tcp`-style table
///
/// Every socket state counts: listeners, established connections and
/// sockets lingering in TIME_WAIT all keep their port unavailable.
pub fn parse_proc_net_tcp(text: &str, ports: &mut HashSet<u16>) {
    for line in text.lines().skip(1) {
        let Some(local) = line.split_whitespace().nth(1) else {
            continue;
        };
        let Some((_, port)) = local.rsplit_once(':') else {
            continue;
        };
        if let Ok(port) = u16::from_str_radix(port, 16) {
            ports.insert(port);
        }
    }
}

/// Pick a port for a new receiver
///
/// With an allow-list, the first listed port not in use; otherwise the
/// lowest unused port at or above `first_port`.
pub fn allocate_port(used: &HashSet<u16>, allowed: Option<&[u16]>, first_port: u16) -> Option<u16> {
    allocate_port_where(used, allowed, first_port, |_| true)
}

/// [`allocate_port`], also skipping ports rejected by `usable`
///
/// `usable` sees only candidates missing from `used`, in scan order.
pub fn allocate_port_where(
    used: &HashSet<u16>,
    allowed: Option<&[u16]>,
    first_port: u16,
    mut usable: impl FnMut(u16) -> bool,
) -> Option<u16> {
    let mut free = |port: &u16| *port != 0 && !used.contains(port) && usable(*port);
    match allowed {
        Some(allowed) => allowed.iter().copied().find(|port| free(port)),
        None => (first_port.max(1)..=u16::MAX).find(|port| free(port)),
    }
}

/// Addresses of this machine's network interfaces, loopback included
pub fn local_addresses() -> Vec<IpAddr> {
    let mut addrs = interface_addresses();
    for loopback in [IpAddr::from(Ipv4Addr::LOCALHOST), IpAddr::from(Ipv6Addr::LOCALHOST)] {
        if !addrs.contains(&loopback) {
            addrs.push(loopback);
        }
    }
    addrs
}

/// The address a receiver advertises when no host is configured
///
/// The first interface address that is neither loopback, unspecified nor
/// IPv6 link-local. Falls back to `127.0.0.1`.
pub fn advertised_host() -> IpAddr {
    interface_addresses()
        .into_iter()
        .find(is_advertisable)
        .unwrap_or_else(|| {
            tracing::warn!("No non-loopback address found, advertising 127.0.0.1");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        })
}

fn is_advertisable(addr: &IpAddr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return false;
    }
    match addr {
        IpAddr::V4(_) => true,
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

#[cfg(unix)]
fn interface_addresses() -> Vec<IpAddr> {
    use std::net::{SocketAddrV4, SocketAddrV6};

    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for ifaddr in addrs {
        let Some(address) = ifaddr.address else {
            continue;
        };
        let ip = if let Some(v4) = address.as_sockaddr_in() {
            IpAddr::V4(*SocketAddrV4::from(*v4).ip())
        } else if let Some(v6) = address.as_sockaddr_in6() {
            IpAddr::V6(*SocketAddrV6::from(*v6).ip())
        } else {
            continue;
        };
        if !out.contains(&ip) {
            out.push(ip);
        }
    }
    out
}

#[cfg(not(unix))]
fn interface_addresses() -> Vec<IpAddr> {
    // Routing trick: the local side of a connected UDP socket is the
    // address of the default interface. No packet is sent.
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("192.0.2.1:9")?;
            socket.local_addr()
        })
        .map(|addr| vec![addr.ip()])
        .unwrap_or_default()
}
