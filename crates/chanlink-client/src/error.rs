use std::time::Duration;

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] chanlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] chanlink_frame::FrameError),

    /// Schema error.
    #[error("schema error: {0}")]
    Schema(#[from] chanlink_schema::SchemaError),

    /// The handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connected hook returned an error.
    #[error("connected hook failed: {0}")]
    ConnectedHook(String),

    /// A connect attempt did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// No connection is open.
    #[error("not connected")]
    NotConnected,

    /// The client was disposed.
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// True for conditions that are part of normal control flow and are
    /// never published on the error event.
    pub fn is_internal(&self) -> bool {
        matches!(self, ClientError::NotConnected | ClientError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
