//! Connect to an echo server, send one JSON and one binary message, print
//! what comes back.
//!
//! Run with:
//!   cargo run --features cli -- echo 127.0.0.1:9001
//!
//! In another terminal:
//!   cargo run --example echo-roundtrip -- ws://127.0.0.1:9001

use std::time::Duration;

use chanlink::client::{ClientBuilder, ConnectionState};
use chanlink::transport::WsConnector;
use serde_json::json;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001".to_string());

    let client = ClientBuilder::new(WsConnector::new(url.clone()))
        .token("demo-token")
        .metadata("example", "echo-roundtrip")
        .start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let json_tx = tx.clone();
    client.on_json_received(move |message| {
        let _ = json_tx.send(format!("json {} {}", message.channel, message.payload));
    });
    client.on_binary_received(move |frame| {
        let _ = tx.send(format!("binary {} {:?}", frame.channel(), frame.payload()));
    });
    client.on_error(|err| eprintln!("client error: {err}"));

    tokio::time::timeout(
        Duration::from_secs(5),
        client.wait_for_state(ConnectionState::Connected),
    )
    .await??;
    eprintln!("connected to {url}");

    client
        .send_json("demo/greeting", &json!({"hello": "world"}))
        .await?;
    client.send_binary("demo/bytes", &[1, 2, 3, 4]).await?;

    for _ in 0..2 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(line)) => println!("{line}"),
            _ => break,
        }
    }

    client.dispose().await;
    Ok(())
}
