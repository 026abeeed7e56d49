/// Errors that can occur while building or applying channel schemas.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema document could not be loaded.
    #[error("failed to load schema document: {0}")]
    LoadFailed(String),

    /// A channel's message schema could not be compiled.
    #[error("failed to compile schema for channel '{channel}': {message}")]
    CompileFailed { channel: String, message: String },

    /// The payload failed schema validation.
    #[error("validation failed on channel '{channel}': {message}")]
    ValidationFailed { channel: String, message: String },

    /// The document is not valid JSON.
    #[error("schema document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The channel name is reserved for protocol use.
    #[error("channel '{0}' is reserved")]
    ReservedChannel(String),

    /// The channel name cannot be carried on the wire.
    #[error("invalid channel name: {0}")]
    InvalidChannel(#[from] chanlink_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
