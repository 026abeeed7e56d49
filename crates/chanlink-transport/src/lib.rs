//! Duplex frame transport abstraction.
//!
//! Provides a unified interface over message-oriented streaming connections:
//! - WebSocket (`ws://` / `wss://`, behind the `websocket` feature)
//! - In-memory loopback (tests, demos)
//!
//! This is the lowest layer of chanlink. Everything else builds on top of
//! the [`Connector`], [`FrameSink`] and [`FrameSource`] traits provided here.

mod chunk;
pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod ws;

pub use error::{Result, TransportError};
pub use traits::{Connector, FrameSink, FrameSource, MessageKind, ReceiveResult, WireMessage};

#[cfg(feature = "websocket")]
pub use ws::{WsConnector, WsSink, WsSource};
