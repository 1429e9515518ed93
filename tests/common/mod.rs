//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ipc_fanout::protocol::constants::MAX_REGISTRY_BODY_SIZE;
use ipc_fanout::protocol::io::{read_frame, write_frame};
use ipc_fanout::protocol::{Cipher, SecureTransform};
use ipc_fanout::registry::{PortTable, SystemPortTable};
use ipc_fanout::ReceiverConfig;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// First port of the allocation scan in tests, clear of well-known ports
pub const FIRST_TEST_PORT: u16 = 20000;

pub const PASSWORD: &str = "correct horse battery staple";
pub const SALT: &[u8] = &[0x59, 0x06, 0x59, 0x3e, 0x21, 0x4e, 0x55, 0x34, 0x96, 0x15];

/// Message type used across tests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tick {
    pub seq: u64,
    pub label: String,
}

impl Tick {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            label: format!("tick-{}", seq),
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receiver config advertising loopback
pub fn receiver_config() -> ReceiverConfig {
    ReceiverConfig::default().host(LOCALHOST)
}

/// A port that was just released and has no listener
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

/// System port table that also reports some fixed ports as in use
#[derive(Debug)]
pub struct ExtraPorts(pub HashSet<u16>);

impl ExtraPorts {
    pub fn new(ports: &[u16]) -> Arc<Self> {
        Arc::new(Self(ports.iter().copied().collect()))
    }
}

impl PortTable for ExtraPorts {
    fn used_ports(&self) -> io::Result<HashSet<u16>> {
        let mut used = SystemPortTable.used_ports()?;
        used.extend(&self.0);
        Ok(used)
    }
}

/// System port table that leaves some ports out
#[derive(Debug)]
pub struct HiddenPorts(pub HashSet<u16>);

impl HiddenPorts {
    pub fn new(ports: &[u16]) -> Arc<Self> {
        Arc::new(Self(ports.iter().copied().collect()))
    }
}

impl PortTable for HiddenPorts {
    fn used_ports(&self) -> io::Result<HashSet<u16>> {
        let mut used = SystemPortTable.used_ports()?;
        used.retain(|port| !self.0.contains(port));
        Ok(used)
    }
}

/// Minimal registry service: an empty body reads the map, anything else
/// replaces it; every reply carries the current map
pub struct RegistryService {
    pub addr: SocketAddr,
    value: Arc<Mutex<String>>,
}

impl RegistryService {
    pub async fn spawn(transform: SecureTransform) -> Self {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let value = Arc::new(Mutex::new(String::new()));

        let shared = value.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let transform = transform.clone();
                let value = shared.clone();

                tokio::spawn(async move {
                    while let Ok(request) =
                        read_frame(&mut stream, 4096, MAX_REGISTRY_BODY_SIZE).await
                    {
                        let Ok(body) = transform.open(&request) else {
                            break;
                        };

                        let reply = {
                            let mut value = value.lock().await;
                            if !body.is_empty() {
                                *value = body;
                            }
                            value.clone()
                        };

                        let sealed = transform.seal(&reply).unwrap();
                        if write_frame(&mut stream, 4096, &sealed).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self { addr, value }
    }

    pub async fn plain() -> Self {
        Self::spawn(SecureTransform::plain()).await
    }

    pub async fn encrypted() -> Self {
        Self::spawn(SecureTransform::encrypted(Cipher::new(PASSWORD, SALT).unwrap())).await
    }

    pub async fn value(&self) -> String {
        self.value.lock().await.clone()
    }

    pub async fn set_value(&self, value: impl Into<String>) {
        *self.value.lock().await = value.into();
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
