//! Registry stores
//!
//! A store holds the whole registry as one encoded string. Every access is
//! a read-modify-write transaction: load, decode, apply a mutation, and write
//! back only if the mutation reports a change.
//!
//! - [`LocalStore`]: a per-user file guarded by an exclusive file lock, so
//!   transactions are serialized across processes on this host
//! - [`RemoteStore`]: the registry service, reached through a
//!   [`ServiceConnection`]
//! - [`MemoryStore`]: a process-local string, for single-process setups and
//!   tests

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use fs2::FileExt;
use tokio::sync::Mutex;

use super::entry::EndpointMap;
use super::error::RegistryError;
use crate::error::{Error, Result};
use crate::service::ServiceConnection;

/// Mutation applied inside a store transaction; returns whether it changed the map
pub type MapUpdate = Box<dyn FnOnce(&mut EndpointMap) -> bool + Send>;

const STORE_FILE: &str = "endpoints";
const LOCK_FILE: &str = "endpoints.lock";
const APP_DIR: &str = "ipc-fanout";

/// Backing storage of the endpoint registry
#[async_trait]
pub trait RegistryStore: Send + Sync + fmt::Debug {
    /// Run `apply` against the current map and return the resulting map
    ///
    /// The map is persisted only when `apply` returns `true`.
    async fn update(&self, apply: MapUpdate) -> Result<EndpointMap>;

    /// Whether the map lives on another machine
    fn is_remote(&self) -> bool {
        false
    }
}

/// Decode stored text, treating corruption as an empty registry
///
/// Every entry only ever reflects ports bound at the time of writing, so
/// losing a corrupt value costs at most one round of re-registration.
fn decode_or_empty(text: &str, source: &str) -> EndpointMap {
    match EndpointMap::decode(text) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(store = source, error = %e, "Discarding corrupt registry value");
            EndpointMap::new()
        }
    }
}

/// Registry file in a per-user directory, locked across processes
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStore {
    /// Store in the default per-user location
    pub fn new() -> Self {
        Self::in_dir(Self::default_dir())
    }

    /// Store in `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            path: dir.join(STORE_FILE),
            lock_path: dir.join(LOCK_FILE),
        }
    }

    /// The per-user runtime directory, which does not survive a logout or
    /// reboot; the cache directory when there is none
    pub fn default_dir() -> PathBuf {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
    }

    /// Path of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_error(&self, source: io::Error) -> Error {
        RegistryError::Store {
            path: self.path.display().to_string(),
            source,
        }
        .into()
    }

    fn update_blocking(&self, apply: MapUpdate) -> Result<EndpointMap> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| self.store_error(e))?;
        lock.lock_exclusive().map_err(|e| self.store_error(e))?;

        let result = self.transact(apply);

        if let Err(e) = FileExt::unlock(&lock) {
            tracing::debug!(error = %e, "Failed to release registry lock; it is released on close");
        }
        result
    }

    fn transact(&self, apply: MapUpdate) -> Result<EndpointMap> {
        let text = match File::open(&self.path) {
            Ok(mut file) => {
                let mut text = String::new();
                match file.read_to_string(&mut text) {
                    Ok(_) => text,
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        tracing::warn!(path = %self.path.display(), "Registry file is not UTF-8");
                        String::new()
                    }
                    Err(e) => return Err(self.store_error(e)),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(self.store_error(e)),
        };

        let mut map = decode_or_empty(&text, "local");
        if apply(&mut map) {
            self.write(&map.encode()).map_err(|e| self.store_error(e))?;
        }
        Ok(map)
    }

    fn write(&self, text: &str) -> io::Result<()> {
        let temp = self
            .path
            .with_extension(format!("{}.tmp", std::process::id()));
        {
            let mut file = File::create(&temp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryStore for LocalStore {
    async fn update(&self, apply: MapUpdate) -> Result<EndpointMap> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update_blocking(apply))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))?
    }
}

/// Registry held by the remote registry service
///
/// A transaction is a read request followed, if the map changed, by a
/// full replace. Transactions from this process are serialized; writers on
/// other machines are not, the service being a plain last-writer-wins store.
///
/// A map pruned down to nothing is not persisted: an empty body is a read
/// request on the wire. The service keeps the stale map until the next
/// non-empty write, and each reader prunes it again in the meantime.
#[derive(Debug)]
pub struct RemoteStore {
    connection: ServiceConnection,
    transaction: Mutex<()>,
}

impl RemoteStore {
    /// Wrap a service connection
    pub fn new(connection: ServiceConnection) -> Self {
        Self {
            connection,
            transaction: Mutex::new(()),
        }
    }

    /// The underlying connection
    pub fn connection(&self) -> &ServiceConnection {
        &self.connection
    }
}

#[async_trait]
impl RegistryStore for RemoteStore {
    async fn update(&self, apply: MapUpdate) -> Result<EndpointMap> {
        let _guard = self.transaction.lock().await;

        let text = self.connection.exchange("").await?;
        let mut map = decode_or_empty(&text, "remote");

        if apply(&mut map) {
            let encoded = map.encode();
            if encoded.is_empty() {
                // An empty body is a read request; the service keeps its
                // stale map until the next non-empty write, and readers
                // prune it again
                tracing::debug!("Registry became empty, nothing to replace");
            } else {
                self.connection.exchange(&encoded).await?;
            }
        }
        Ok(map)
    }

    fn is_remote(&self) -> bool {
        true
    }
}

/// Registry held in this process
#[derive(Debug, Default)]
pub struct MemoryStore {
    value: StdMutex<String>,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an encoded registry
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: StdMutex::new(value.into()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Current encoded value
    pub fn value(&self) -> String {
        self.value
            .lock()
            .map(|v| v.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Number of times the value was written
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn update(&self, apply: MapUpdate) -> Result<EndpointMap> {
        let mut value = self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut map = decode_or_empty(&value, "memory");
        if apply(&mut map) {
            *value = map.encode();
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(map)
    }
}
