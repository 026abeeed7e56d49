/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Binary frames carry the channel length in one byte.
    #[error("channel name too long ({len} bytes, max {max})")]
    ChannelNameTooLong { len: usize, max: usize },

    /// A text frame is not a JSON object with a string `channel`.
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A binary frame's channel name is not valid UTF-8.
    #[error("channel name is not valid UTF-8")]
    InvalidUtf8,

    /// A binary frame ends before its declared channel name does.
    #[error("truncated binary frame (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// A message grew past the configured limit while being reassembled.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The frame type changed before the message completed.
    #[error("frame type changed mid-message")]
    KindChanged,

    /// A caller-supplied payload slice lies outside the buffer.
    #[error("payload range {offset}+{len} out of bounds (buffer is {available} bytes)")]
    RangeOutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },
}

pub type Result<T> = std::result::Result<T, FrameError>;
