//! Channel framing for chanlink.
//!
//! Every logical message carries a channel name and travels in one of two
//! frame kinds:
//! - text: a JSON object `{"channel": <string>, "payload": <any>}`
//! - binary: a 1-byte channel length, the UTF-8 channel name, then raw payload
//!
//! The [`ReceiveAssembler`] turns chunked physical reads back into complete
//! frames before they reach the codec.

pub mod assembler;
pub mod channel;
pub mod codec;
pub mod error;

pub use assembler::{
    FrameConfig, RawFrame, ReceiveAssembler, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SCRATCH_SIZE,
};
pub use channel::{is_reserved, validate_channel_name, INTERNAL_API, MAX_CHANNEL_NAME_LEN};
pub use codec::{
    decode, decode_binary, decode_text, encode_binary, encode_json, BinaryFrame, Decoded,
    FrameKind, JsonMessage, OwnedBinaryFrame,
};
pub use error::{FrameError, Result};
