//! Register channel handlers on a router and drive them over the in-memory
//! loopback transport.
//!
//! Run with:
//!   cargo run --example router-demo

use std::sync::Arc;
use std::time::Duration;

use chanlink::client::{ClientBuilder, ConnectionState, Router};
use chanlink::schema::{ChannelSchema, MessageSchema};
use chanlink::transport::{memory, WireMessage};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let router = Arc::new(Router::new());
    router.json(
        "player/health",
        ChannelSchema::new("Health")
            .category("Player")
            .kind("slider")
            .subscribe(MessageSchema::object().property("hp", json!({"type": "integer"}))),
        |payload| println!("health set to {payload}"),
    )?;
    router.binary(
        "camera/frame",
        ChannelSchema::new("Frame").category("Camera").kind("binary"),
        |payload| println!("camera frame of {} bytes", payload.len()),
    )?;

    let (connector, mut server) = memory::channel();
    let client = ClientBuilder::new(connector)
        .token("demo")
        .schema_source(router.clone())
        .start();
    router.attach(&client);

    let mut peer = server.accept().await.ok_or("client never connected")?;
    for label in ["token", "metadata", "schema"] {
        if let Some(WireMessage::Text(text)) = peer.recv().await {
            println!("{label}: {text}");
        }
    }
    client.wait_for_state(ConnectionState::Connected).await?;

    peer.send_text(r#"{"channel":"player/health","payload":{"hp":42}}"#)?;
    let mut frame = vec![12u8];
    frame.extend_from_slice(b"camera/frame");
    frame.extend_from_slice(&[0u8; 64]);
    peer.send_binary(frame)?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.dispose().await;
    Ok(())
}
