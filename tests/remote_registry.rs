//! Registry held by a remote registry service

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::*;
use ipc_fanout::{
    EndpointRegistry, Handle, JsonCodec, Payload, Receiver, RegistryConfig, SendEvent, Sender,
    SenderConfig, ServiceConfig,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn registry(service: SocketAddr, offset: u16, encrypted: bool) -> EndpointRegistry {
    let mut config = ServiceConfig::new(service).connect_timeout(Duration::from_secs(2));
    if encrypted {
        config = config.credentials(PASSWORD, SALT.to_vec());
    }
    EndpointRegistry::remote(config, RegistryConfig::default().first_port(FIRST_TEST_PORT + offset))
        .unwrap()
}

async fn round_trip(encrypted: bool, offset: u16) {
    init_tracing();
    let service = if encrypted {
        RegistryService::encrypted().await
    } else {
        RegistryService::plain().await
    };
    let handle = Handle::new(format!("remote_{}", offset)).unwrap();

    // Separate connections for the two roles, as on two machines
    let receiver_side = registry(service.addr, offset, encrypted);
    let sender_side = registry(service.addr, offset, encrypted);
    assert!(receiver_side.is_remote());

    let receiver = Receiver::bind(handle.clone(), &receiver_side, JsonCodec::<Tick>::new(), receiver_config())
        .await
        .unwrap();
    let mut messages = receiver.subscribe();

    assert_eq!(
        service.value().await,
        format!("remote_{}*127.0.0.1-{}+,", offset, receiver.endpoint().port())
    );
    assert_eq!(
        sender_side.receiver_endpoints(&handle).await.unwrap(),
        vec![receiver.endpoint()]
    );

    let (sender, mut events) = Sender::new(handle, sender_side, JsonCodec::<Tick>::new(), SenderConfig::default());
    sender.send(Payload::Object(Tick::new(42))).await.unwrap();

    let message = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(message.payload, Payload::Object(Tick::new(42)));

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        failed |= matches!(event, SendEvent::SendFailed { .. });
    }
    assert!(!failed);
}

#[tokio::test]
async fn test_remote_registry_plain() {
    round_trip(false, 2000).await;
}

#[tokio::test]
async fn test_remote_registry_encrypted() {
    round_trip(true, 2100).await;
}

#[tokio::test]
async fn test_wrong_password_fails_exchange() {
    let service = RegistryService::encrypted().await;
    let config = ServiceConfig::new(service.addr).credentials("not the password", SALT.to_vec());
    let registry = EndpointRegistry::remote(config, RegistryConfig::default()).unwrap();

    let handle = Handle::new("wrong_password").unwrap();
    assert!(registry.receiver_endpoints(&handle).await.is_err());
}

#[tokio::test]
async fn test_unreachable_service_fails_registration() {
    let service = SocketAddr::new(LOCALHOST, dead_port().await);
    let registry = registry(service, 2200, false);
    let handle = Handle::new("unreachable").unwrap();

    let err = Receiver::bind(handle.clone(), &registry, JsonCodec::<Tick>::new(), receiver_config())
        .await
        .unwrap_err();
    assert!(err.is_service_unreachable(), "unexpected error: {}", err);

    // A sender reports it as an event instead
    let (sender, mut events) = Sender::new(handle, registry, JsonCodec::<Tick>::new(), SenderConfig::default());
    sender.send(Payload::Object(Tick::new(1))).await.unwrap();
    match events.try_recv() {
        Ok(SendEvent::SendFailed { endpoint: None, error }) => assert!(error.is_service_unreachable()),
        other => panic!("expected SendFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_pruning_only_touches_local_hosts() {
    let service = RegistryService::plain().await;
    let dead = dead_port().await;
    service
        .set_value(format!("elsewhere*192.0.2.1-{dead}+,stale*127.0.0.1-{dead}+,"))
        .await;

    let registry = registry(service.addr, 2300, false);
    let stale = Handle::new("stale").unwrap();
    let elsewhere = Handle::new("elsewhere").unwrap();

    assert!(registry.receiver_endpoints(&stale).await.unwrap().is_empty());
    assert_eq!(
        registry.receiver_endpoints(&elsewhere).await.unwrap(),
        vec![SocketAddr::new([192, 0, 2, 1].into(), dead)]
    );
    assert_eq!(service.value().await, format!("elsewhere*192.0.2.1-{dead}+,"));
}

#[tokio::test]
async fn test_remote_map_pruned_to_empty_stays_on_service() {
    let service = RegistryService::plain().await;
    let dead = dead_port().await;
    let stale_value = format!("stale*127.0.0.1-{dead}+,");
    service.set_value(stale_value.clone()).await;

    let registry = registry(service.addr, 2400, false);
    let stale = Handle::new("stale").unwrap();

    // An empty replace would read as a request, so nothing is written
    assert!(registry.receiver_endpoints(&stale).await.unwrap().is_empty());
    assert_eq!(service.value().await, stale_value);

    // Every later reader prunes it again
    assert!(registry.snapshot().await.unwrap().is_empty());
}
