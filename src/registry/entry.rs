//! Registry entries and their text encoding
//!
//! The whole registry is one string, shared by the local store and the
//! registry service:
//!
//! ```text
//! handle1*host1-port1+port2+,handle2*host2-port1+,
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use super::error::RegistryError;
use crate::handle::Handle;

/// Host and listening ports registered under one handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Address advertised by the receiver that last registered
    pub host: IpAddr,
    /// One port per receiver instance on that host
    pub ports: BTreeSet<u16>,
}

impl RegistryEntry {
    /// Create an entry without ports
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            ports: BTreeSet::new(),
        }
    }

    /// Every `(host, port)` pair of this entry
    pub fn endpoints(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.ports.iter().map(move |&port| SocketAddr::new(self.host, port))
    }
}

/// Which entries a pruning pass may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneScope {
    /// Every entry is assumed to live on this machine
    All,
    /// Only entries whose host is one of these addresses
    Hosts(HashSet<IpAddr>),
}

impl PruneScope {
    fn covers(&self, host: &IpAddr) -> bool {
        match self {
            PruneScope::All => true,
            PruneScope::Hosts(hosts) => hosts.contains(host),
        }
    }
}

/// The full handle -> entry map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointMap {
    entries: BTreeMap<Handle, RegistryEntry>,
}

impl EndpointMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry registered for `handle`
    pub fn get(&self, handle: &Handle) -> Option<&RegistryEntry> {
        self.entries.get(handle)
    }

    /// Iterate over all entries in handle order
    pub fn iter(&self) -> impl Iterator<Item = (&Handle, &RegistryEntry)> {
        self.entries.iter()
    }

    /// Number of handles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handle is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every endpoint registered for `handle`, empty if none
    pub fn endpoints(&self, handle: &Handle) -> Vec<SocketAddr> {
        self.get(handle)
            .map(|entry| entry.endpoints().collect())
            .unwrap_or_default()
    }

    /// Add `port` under `handle`, advertising `host`
    ///
    /// The handle's host becomes `host` even if the entry existed: one host
    /// per handle, last writer wins.
    pub fn add_port(&mut self, handle: Handle, host: IpAddr, port: u16) {
        let entry = self
            .entries
            .entry(handle)
            .or_insert_with(|| RegistryEntry::new(host));
        entry.host = host;
        entry.ports.insert(port);
    }

    /// Drop every port in scope that is not in `live`
    ///
    /// Handles left without ports are removed. Returns whether anything
    /// changed, in which case the caller must persist the map.
    pub fn prune(&mut self, live: &HashSet<u16>, scope: &PruneScope) -> bool {
        let mut changed = false;

        self.entries.retain(|handle, entry| {
            if scope.covers(&entry.host) {
                let before = entry.ports.len();
                entry.ports.retain(|port| live.contains(port));
                if entry.ports.len() != before {
                    tracing::debug!(
                        handle = %handle,
                        removed = before - entry.ports.len(),
                        "Pruned stale ports"
                    );
                    changed = true;
                }
            }

            if entry.ports.is_empty() {
                changed = true;
                false
            } else {
                true
            }
        });

        changed
    }

    /// Serialize to the registry text form
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse the registry text form
    pub fn decode(text: &str) -> Result<Self, RegistryError> {
        let mut map = Self::new();

        for token in text.split(',').filter(|t| !t.is_empty()) {
            let (handle, connection) = token
                .split_once('*')
                .ok_or_else(|| RegistryError::Corrupt(format!("missing '*' in {:?}", token)))?;
            let handle = Handle::new(handle)
                .map_err(|e| RegistryError::Corrupt(e.to_string()))?;

            let (host, ports) = connection
                .split_once('-')
                .ok_or_else(|| RegistryError::Corrupt(format!("missing '-' in {:?}", token)))?;
            let host = IpAddr::from_str(host)
                .map_err(|e| RegistryError::Corrupt(format!("bad host {:?}: {}", host, e)))?;

            let mut entry = RegistryEntry::new(host);
            for port in ports.split('+').filter(|p| !p.is_empty()) {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| RegistryError::Corrupt(format!("bad port {:?}: {}", port, e)))?;
                entry.ports.insert(port);
            }

            map.entries.insert(handle, entry);
        }

        Ok(map)
    }
}

impl fmt::Display for EndpointMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (handle, entry) in &self.entries {
            write!(f, "{}*{}-", handle, entry.host)?;
            for port in &entry.ports {
                write!(f, "{}+", port)?;
            }
            f.write_str(",")?;
        }
        Ok(())
    }
}

impl FromStr for EndpointMap {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
