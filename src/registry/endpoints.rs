//! Endpoint registry
//!
//! Maps handles to the endpoints of their listening receivers. Every read
//! first prunes ports the OS no longer reports as in use, so entries left by
//! crashed receivers disappear on the next access without any explicit
//! unregistration.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use super::config::RegistryConfig;
use super::entry::{EndpointMap, PruneScope};
use super::error::RegistryError;
use super::ports::{advertised_host, allocate_port_where, local_addresses, PortTable, SystemPortTable};
use super::store::{LocalStore, RegistryStore, RemoteStore};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::service::{ServiceConfig, ServiceConnection};

/// Handle -> receiver endpoint registry
///
/// Cheap to clone; clones share the store and port table.
#[derive(Clone)]
pub struct EndpointRegistry {
    store: Arc<dyn RegistryStore>,
    ports: Arc<dyn PortTable>,
    config: RegistryConfig,
}

impl EndpointRegistry {
    /// Create a registry over an explicit store and port table
    pub fn new(
        store: Arc<dyn RegistryStore>,
        ports: Arc<dyn PortTable>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            ports,
            config,
        }
    }

    /// Registry in the per-user local store
    pub fn local(config: RegistryConfig) -> Self {
        let store = match &config.store_dir {
            Some(dir) => LocalStore::in_dir(dir),
            None => LocalStore::new(),
        };
        Self::new(Arc::new(store), Arc::new(SystemPortTable), config)
    }

    /// Registry held by a remote registry service
    pub fn remote(service: ServiceConfig, config: RegistryConfig) -> Result<Self> {
        let store = RemoteStore::new(ServiceConnection::new(service)?);
        Ok(Self::new(Arc::new(store), Arc::new(SystemPortTable), config))
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Whether the registry is held by a remote service
    pub fn is_remote(&self) -> bool {
        self.store.is_remote()
    }

    /// Register a new receiver endpoint for `handle`
    ///
    /// Advertises `host` or, if `None`, this machine's first non-loopback
    /// address. Picks the first free port of `allowed_ports`, or the lowest
    /// free port from the configured start. The port is recorded before the
    /// caller binds it, so a concurrent process may grab it first; the
    /// caller retries in that case.
    pub async fn register_receiver(
        &self,
        handle: &Handle,
        host: Option<IpAddr>,
        allowed_ports: Option<&[u16]>,
    ) -> Result<SocketAddr> {
        self.register_receiver_where(handle, host, allowed_ports, |_| true)
            .await
    }

    /// [`register_receiver`](Self::register_receiver), skipping endpoints
    /// rejected by `usable`
    ///
    /// A port the OS does not report as in use may still be unusable to
    /// the caller (privileged, or lost in an earlier bind attempt).
    pub async fn register_receiver_where<F>(
        &self,
        handle: &Handle,
        host: Option<IpAddr>,
        allowed_ports: Option<&[u16]>,
        usable: F,
    ) -> Result<SocketAddr>
    where
        F: Fn(SocketAddr) -> bool + Send,
    {
        let host = host.unwrap_or_else(advertised_host);
        let live = self.live_ports().await?;

        let port = allocate_port_where(&live, allowed_ports, self.config.first_port, |port| {
            usable(SocketAddr::new(host, port))
        })
        .ok_or(RegistryError::NoFreePort)?;

        let scope = self.prune_scope();
        let entry_handle = handle.clone();
        self.store
            .update(Box::new(move |map: &mut EndpointMap| {
                map.prune(&live, &scope);
                map.add_port(entry_handle, host, port);
                true
            }))
            .await?;

        let endpoint = SocketAddr::new(host, port);
        tracing::info!(handle = %handle, endpoint = %endpoint, "Receiver endpoint registered");
        Ok(endpoint)
    }

    /// All endpoints currently registered for `handle`
    pub async fn receiver_endpoints(&self, handle: &Handle) -> Result<Vec<SocketAddr>> {
        Ok(self.snapshot().await?.endpoints(handle))
    }

    /// Read and prune the whole registry
    pub async fn snapshot(&self) -> Result<EndpointMap> {
        let live = self.live_ports().await?;
        let scope = self.prune_scope();

        self.store
            .update(Box::new(move |map: &mut EndpointMap| map.prune(&live, &scope)))
            .await
    }

    async fn live_ports(&self) -> Result<HashSet<u16>> {
        let ports = Arc::clone(&self.ports);
        tokio::task::spawn_blocking(move || ports.used_ports())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .map_err(|e| RegistryError::PortTable(e).into())
    }

    /// A local store only ever holds endpoints of this machine. A remote
    /// one also holds other machines' entries, which our port table says
    /// nothing about.
    fn prune_scope(&self) -> PruneScope {
        if self.is_remote() {
            PruneScope::Hosts(local_addresses().into_iter().collect())
        } else {
            PruneScope::All
        }
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("store", &self.store)
            .field("ports", &self.ports)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::registry::store::MemoryStore;

    /// Port table whose contents the test controls
    #[derive(Debug, Default)]
    struct FakePorts(Mutex<HashSet<u16>>);

    impl FakePorts {
        fn with(ports: &[u16]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(ports.iter().copied().collect())))
        }

        fn set(&self, ports: &[u16]) {
            *self.0.lock().unwrap() = ports.iter().copied().collect();
        }

        fn add(&self, port: u16) {
            self.0.lock().unwrap().insert(port);
        }
    }

    impl PortTable for FakePorts {
        fn used_ports(&self) -> std::io::Result<HashSet<u16>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn host() -> Option<IpAddr> {
        Some(IpAddr::from([10, 0, 0, 5]))
    }

    fn registry(store: &Arc<MemoryStore>, ports: &Arc<FakePorts>) -> EndpointRegistry {
        EndpointRegistry::new(store.clone(), ports.clone(), RegistryConfig::default())
    }

    #[tokio::test]
    async fn test_register_picks_lowest_free_port() {
        let store = Arc::new(MemoryStore::new());
        let ports = FakePorts::with(&[1, 2, 4]);
        let registry = registry(&store, &ports);
        let handle = Handle::new("h").unwrap();

        let endpoint = registry.register_receiver(&handle, host(), None).await.unwrap();
        assert_eq!(endpoint, "10.0.0.5:3".parse().unwrap());
        assert_eq!(store.value(), "h*10.0.0.5-3+,");
    }

    #[tokio::test]
    async fn test_register_twice_keeps_both_ports() {
        let store = Arc::new(MemoryStore::new());
        let ports = FakePorts::with(&[1]);
        let registry = registry(&store, &ports);
        let handle = Handle::new("h").unwrap();

        let first = registry.register_receiver(&handle, host(), None).await.unwrap();
        // The first receiver binds its port
        ports.add(first.port());
        let second = registry.register_receiver(&handle, host(), None).await.unwrap();
        ports.add(second.port());

        assert_ne!(first, second);
        let endpoints = registry.receiver_endpoints(&handle).await.unwrap();
        assert_eq!(endpoints, vec![first, second]);
    }

    #[tokio::test]
    async fn test_register_with_allow_list() {
        let store = Arc::new(MemoryStore::new());
        let ports = FakePorts::with(&[5000]);
        let registry = registry(&store, &ports);
        let handle = Handle::new("h").unwrap();

        let endpoint = registry
            .register_receiver(&handle, host(), Some(&[5000, 5001]))
            .await
            .unwrap();
        assert_eq!(endpoint.port(), 5001);

        ports.add(5001);
        let err = registry
            .register_receiver(&handle, host(), Some(&[5000, 5001]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::NoFreePort)));
    }

    #[tokio::test]
    async fn test_register_skips_unusable_endpoints() {
        let store = Arc::new(MemoryStore::new());
        let ports = FakePorts::with(&[1]);
        let registry = registry(&store, &ports);
        let handle = Handle::new("h").unwrap();

        let endpoint = registry
            .register_receiver_where(&handle, host(), None, |endpoint| endpoint.port() > 3)
            .await
            .unwrap();
        assert_eq!(endpoint, "10.0.0.5:4".parse().unwrap());
        assert_eq!(store.value(), "h*10.0.0.5-4+,");
    }

    #[tokio::test]
    async fn test_read_prunes_and_persists() {
        let store = Arc::new(MemoryStore::with_value("h*10.0.0.5-1+2+3+,"));
        let ports = FakePorts::with(&[2]);
        let registry = registry(&store, &ports);
        let handle = Handle::new("h").unwrap();

        let endpoints = registry.receiver_endpoints(&handle).await.unwrap();
        assert_eq!(endpoints, vec!["10.0.0.5:2".parse().unwrap()]);
        assert_eq!(store.value(), "h*10.0.0.5-2+,");
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_read_without_stale_ports_does_not_write() {
        let store = Arc::new(MemoryStore::with_value("h*10.0.0.5-1+2+,"));
        let ports = FakePorts::with(&[1, 2]);
        let registry = registry(&store, &ports);
        let handle = Handle::new("h").unwrap();

        registry.receiver_endpoints(&handle).await.unwrap();
        registry.receiver_endpoints(&handle).await.unwrap();
        assert_eq!(store.writes(), 0);
        assert_eq!(store.value(), "h*10.0.0.5-1+2+,");
    }

    #[tokio::test]
    async fn test_fully_pruned_handle_is_removed() {
        let store = Arc::new(MemoryStore::with_value("h*10.0.0.5-1+,g*10.0.0.5-2+,"));
        let ports = FakePorts::with(&[2]);
        let registry = registry(&store, &ports);

        let map = registry.snapshot().await.unwrap();
        assert!(map.get(&Handle::new("h").unwrap()).is_none());
        assert_eq!(store.value(), "g*10.0.0.5-2+,");

        ports.set(&[]);
        let endpoints = registry
            .receiver_endpoints(&Handle::new("g").unwrap())
            .await
            .unwrap();
        assert!(endpoints.is_empty());
        assert_eq!(store.value(), "");
    }

    #[tokio::test]
    async fn test_unknown_handle_is_empty() {
        let store = Arc::new(MemoryStore::with_value("h*10.0.0.5-1+,"));
        let ports = FakePorts::with(&[1]);
        let registry = registry(&store, &ports);

        let endpoints = registry
            .receiver_endpoints(&Handle::new("other").unwrap())
            .await
            .unwrap();
        assert!(endpoints.is_empty());
    }
}
