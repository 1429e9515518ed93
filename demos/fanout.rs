//! One sender, several receivers, one local registry
//!
//! Run with: cargo run --example fanout
//! Set RUST_LOG=ipc_fanout=debug to watch registration and delivery.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use ipc_fanout::{
    EndpointRegistry, Handle, JsonCodec, Payload, Receiver, ReceiverConfig, RegistryConfig,
    SendEvent, Sender, SenderConfig,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price_cents: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fanout=info".parse()?))
        .init();

    let store = std::env::temp_dir().join("ipc-fanout-demo");
    let registry = EndpointRegistry::local(RegistryConfig::default().first_port(30000).store_dir(&store));
    let handle = Handle::new("quotes")?;
    let config = ReceiverConfig::default().host(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let mut receivers = Vec::new();
    for id in 0..3 {
        let receiver = Receiver::bind(handle.clone(), &registry, JsonCodec::<Quote>::new(), config.clone()).await?;
        let mut messages = receiver.subscribe();
        tracing::info!(id, endpoint = %receiver.endpoint(), "Receiver started");

        tokio::spawn(async move {
            while let Ok(message) = messages.recv().await {
                if let Payload::Object(quote) = &message.payload {
                    tracing::info!(id, symbol = %quote.symbol, price_cents = quote.price_cents, "Quote received");
                }
            }
        });
        receivers.push(receiver);
    }

    let (sender, mut events) = Sender::new(
        handle,
        registry,
        JsonCodec::<Quote>::new(),
        SenderConfig::default().buffered(true),
    );

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SendEvent::AfterSend { targets } => {
                    tracing::info!(delivered = targets.len(), "Send complete");
                }
                SendEvent::SendFailed { endpoint, error } => {
                    tracing::warn!(endpoint = ?endpoint, error = %error, "Send failed");
                }
                SendEvent::BeforeSend { .. } => {}
            }
        }
    });

    for (i, price_cents) in [10_925u64, 10_931, 10_931, 10_940].into_iter().enumerate() {
        let quote = Quote {
            symbol: "EURUSD".into(),
            price_cents,
        };
        sender.send(Payload::Object(quote)).await?;
        tracing::info!(round = i, "Sent");

        // Stop one receiver halfway; the sender drops it on the next send
        if i == 1 {
            if let Some(receiver) = receivers.pop() {
                receiver.shutdown();
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    sender.close().await;
    Ok(())
}
