//! Auto-reconnecting duplex client with named channels.
//!
//! chanlink keeps one streaming connection open to a remote counterpart and
//! multiplexes JSON and binary messages over it by channel name.
//!
//! # Crate Structure
//!
//! - [`transport`]: Duplex frame transport (WebSocket, in-memory loopback)
//! - [`frame`]: Channel framing and receive reassembly
//! - [`schema`]: Channel schema documents and optional inbound validation
//! - [`client`]: Reconnecting client, handshake, events, routing (behind `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use chanlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chanlink_frame::*;
}

/// Re-export schema types.
pub mod schema {
    pub use chanlink_schema::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use chanlink_client::*;
}
