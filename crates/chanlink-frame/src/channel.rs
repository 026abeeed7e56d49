//! Channel naming rules.
//!
//! Channels are plain strings chosen by the application. Names under
//! `__internal/` are reserved for the protocol itself.

use crate::error::{FrameError, Result};

/// Maximum channel name length in UTF-8 bytes (binary frames use a 1-byte length).
pub const MAX_CHANNEL_NAME_LEN: usize = u8::MAX as usize;

/// Reserved channel carrying the schema document.
pub const INTERNAL_API: &str = "__internal/api";

const RESERVED_PREFIX: &str = "__internal/";

/// Returns true if the channel name is reserved for protocol use.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Check that a channel name fits the binary frame header.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(FrameError::ChannelNameTooLong {
            len: name.len(),
            max: MAX_CHANNEL_NAME_LEN,
        });
    }
    Ok(())
}
