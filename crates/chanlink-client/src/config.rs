use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chanlink_frame::{FrameConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SCRATCH_SIZE};

/// Default idle delay before reconnecting.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Default bound on one connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on closing a connection that is being discarded.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Idle delay between a disconnect and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Bound on one connect attempt. Expiry counts as a transport error.
    pub connect_timeout: Duration,
    /// Bound on closing a discarded connection. A close that stalls is
    /// abandoned and the connection dropped.
    pub close_timeout: Duration,
    /// Size of the fixed receive buffer.
    pub receive_buffer_size: usize,
    /// Largest message accepted when reassembling several reads.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            receive_buffer_size: DEFAULT_SCRATCH_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            scratch_size: self.receive_buffer_size,
            max_message_size: self.max_message_size,
        }
    }
}

/// Frames sent right after every physical connect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Opaque token, sent verbatim as the first text frame.
    /// Treated as credential material and never logged.
    pub token: String,
    /// Free-form metadata, sent as a JSON object in the second text frame.
    pub metadata: BTreeMap<String, String>,
}

impl HandshakeConfig {
    /// Create a handshake with a token and no metadata.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field(
                "token",
                &format_args!("<redacted:{} bytes>", self.token.len()),
            )
            .field("metadata", &self.metadata)
            .finish()
    }
}
