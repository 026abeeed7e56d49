//! Auto-reconnecting duplex channel client.
//!
//! A [`Client`] keeps one physical connection open to a remote counterpart,
//! performs the token/metadata handshake after every connect, and exchanges
//! JSON and binary messages on named channels. Sends made while
//! disconnected are dropped: delivery is at most once.
//!
//! ```no_run
//! # async fn demo() -> chanlink_client::Result<()> {
//! use chanlink_client::{ClientBuilder, ConnectionState};
//! use chanlink_transport::WsConnector;
//! use serde_json::json;
//!
//! let client = ClientBuilder::new(WsConnector::new("ws://127.0.0.1:9001"))
//!     .token("secret")
//!     .metadata("device", "bench-1")
//!     .start();
//! client.on_json_received(|message| println!("{}: {}", message.channel, message.payload));
//! client.wait_for_state(ConnectionState::Connected).await?;
//! client.send_json("player/health", &json!({"hp": 10})).await?;
//! client.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
mod events;
mod outbound;
pub mod router;
mod run_loop;
pub mod source;
pub mod state;

#[cfg(feature = "websocket")]
pub use client::connect;
pub use client::{Client, ClientBuilder};
pub use config::{
    ClientConfig, HandshakeConfig, DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_RECONNECT_DELAY,
};
pub use connection::ConnectedHook;
pub use error::{ClientError, Result};
pub use events::SubscriptionId;
pub use outbound::Session;
pub use router::{Attachment, Router};
pub use source::SchemaSource;
pub use state::ConnectionState;
