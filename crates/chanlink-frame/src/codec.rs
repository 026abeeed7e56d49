use bytes::{BufMut, Bytes, BytesMut};
use serde::de::Error as _;
use serde::Serialize;
use serde_json::Value;

use crate::channel::validate_channel_name;
use crate::error::{FrameError, Result};

/// Frame type as seen by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// JSON text frame.
    Text,
    /// Channel-prefixed binary frame.
    Binary,
}

/// A structured message received on, or destined for, a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonMessage {
    /// Channel name.
    pub channel: String,
    /// Any JSON value.
    pub payload: Value,
}

impl JsonMessage {
    /// Create a new JSON message.
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    channel: &'a str,
    payload: &'a Value,
}

/// A decoded binary frame borrowing the receive buffer.
///
/// The payload is a view (`offset`, `len`) into [`BinaryFrame::buffer`], not a
/// copy. The buffer is reused for the next read, so the view is only valid for
/// as long as it is borrowed; use [`BinaryFrame::to_owned`] to keep the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryFrame<'a> {
    buffer: &'a [u8],
    channel: &'a str,
}

impl<'a> BinaryFrame<'a> {
    /// Channel name.
    pub fn channel(&self) -> &'a str {
        self.channel
    }

    /// Payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.offset()..]
    }

    /// Offset of the payload within [`BinaryFrame::buffer`].
    pub fn offset(&self) -> usize {
        1 + self.channel.len()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len() - self.offset()
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole frame as received, header included.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Copy the frame out of the receive buffer.
    pub fn to_owned(&self) -> OwnedBinaryFrame {
        OwnedBinaryFrame {
            channel: self.channel.to_string(),
            payload: Bytes::copy_from_slice(self.payload()),
        }
    }
}

/// A binary frame detached from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedBinaryFrame {
    /// Channel name.
    pub channel: String,
    /// Payload bytes.
    pub payload: Bytes,
}

/// Result of decoding one complete frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<'a> {
    /// Text frame carrying JSON.
    Json(JsonMessage),
    /// Binary frame borrowing the receive buffer.
    Binary(BinaryFrame<'a>),
}

/// Encode a JSON message as frame text.
///
/// Wire format: `{"channel":"<name>","payload":<value>}`.
pub fn encode_json(channel: &str, payload: &Value) -> Result<String> {
    let text = serde_json::to_string(&EnvelopeRef { channel, payload })?;
    Ok(text)
}

/// Encode a binary message into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────┬─────────────────┐
/// │ Length (1B)  │ Channel (UTF-8)  │ Payload         │
/// │ L            │ L bytes          │ remaining bytes │
/// └──────────────┴──────────────────┴─────────────────┘
/// ```
///
/// Fails without touching `dst` if the channel name exceeds 255 bytes.
pub fn encode_binary(channel: &str, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    validate_channel_name(channel)?;
    dst.reserve(1 + channel.len() + payload.len());
    dst.put_u8(channel.len() as u8);
    dst.put_slice(channel.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode a complete text frame.
///
/// The frame must be a JSON object with a string `channel`. A missing
/// `payload` decodes as `null`.
pub fn decode_text(frame: &[u8]) -> Result<JsonMessage> {
    let Value::Object(mut envelope) = serde_json::from_slice(frame)? else {
        return Err(serde_json::Error::custom("frame is not a JSON object").into());
    };
    let Some(Value::String(channel)) = envelope.remove("channel") else {
        return Err(serde_json::Error::custom("frame has no string `channel`").into());
    };
    let payload = envelope.remove("payload").unwrap_or(Value::Null);
    Ok(JsonMessage { channel, payload })
}

/// Decode a complete binary frame without copying the payload.
pub fn decode_binary(frame: &[u8]) -> Result<BinaryFrame<'_>> {
    let Some(&name_len) = frame.first() else {
        return Err(FrameError::Truncated {
            needed: 1,
            available: 0,
        });
    };

    let header_len = 1 + usize::from(name_len);
    if frame.len() < header_len {
        return Err(FrameError::Truncated {
            needed: header_len,
            available: frame.len(),
        });
    }

    let channel =
        std::str::from_utf8(&frame[1..header_len]).map_err(|_| FrameError::InvalidUtf8)?;
    Ok(BinaryFrame {
        buffer: frame,
        channel,
    })
}

/// Decode a complete frame of the given kind.
pub fn decode(kind: FrameKind, frame: &[u8]) -> Result<Decoded<'_>> {
    match kind {
        FrameKind::Text => decode_text(frame).map(Decoded::Json),
        FrameKind::Binary => decode_binary(frame).map(Decoded::Binary),
    }
}
