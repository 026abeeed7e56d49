use bytes::BytesMut;
use chanlink_transport::{MessageKind, ReceiveResult};

use crate::codec::FrameKind;
use crate::error::{FrameError, Result};

/// Default fixed receive buffer: 16 KiB.
pub const DEFAULT_SCRATCH_SIZE: usize = 16 * 1024;

/// Default maximum reassembled message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for the receive assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Size of the fixed buffer handed to each physical read.
    pub scratch_size: usize,
    /// Upper bound for a message reassembled from several reads.
    pub max_message_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            scratch_size: DEFAULT_SCRATCH_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// A complete frame, borrowed from the assembler's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// Frame type.
    pub kind: FrameKind,
    /// Frame bytes.
    pub bytes: &'a [u8],
    /// True if the frame spanned more than one physical read.
    pub reassembled: bool,
}

/// Turns a sequence of physical reads into complete frames.
///
/// Reads land in a fixed scratch buffer. A message that both starts and ends
/// within one read is handed out straight from that buffer. Otherwise every
/// piece, the first one included, is appended to a growable overflow buffer
/// until the end-of-message read arrives; the overflow buffer is emptied again
/// once the frame has been handed out.
#[derive(Debug)]
pub struct ReceiveAssembler {
    scratch: Box<[u8]>,
    overflow: BytesMut,
    partial: Option<FrameKind>,
    skipping: bool,
    max_message_size: usize,
}

impl ReceiveAssembler {
    /// Create an assembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create an assembler with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        let scratch_size = config.scratch_size.max(1);
        Self {
            scratch: vec![0u8; scratch_size].into_boxed_slice(),
            overflow: BytesMut::new(),
            partial: None,
            skipping: false,
            max_message_size: config.max_message_size.max(scratch_size),
        }
    }

    /// Buffer the next physical read should fill.
    pub fn scratch_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    /// True while a message is partially received.
    pub fn is_partial(&self) -> bool {
        self.partial.is_some() || self.skipping
    }

    /// Bytes currently held in the overflow buffer.
    pub fn buffered(&self) -> usize {
        self.overflow.len()
    }

    /// Drop any partially received message.
    pub fn reset(&mut self) {
        self.overflow.clear();
        self.partial = None;
        self.skipping = false;
    }

    /// Account for one physical read that filled `scratch_mut()[..read.count]`.
    ///
    /// When the read completes a message, `on_frame` is called with the whole
    /// frame and its result is returned. Returns `Ok(None)` while the message
    /// is still incomplete and for close reads.
    pub fn feed<R>(
        &mut self,
        read: ReceiveResult,
        on_frame: impl FnOnce(RawFrame<'_>) -> R,
    ) -> Result<Option<R>> {
        let kind = match read.kind {
            MessageKind::Text => FrameKind::Text,
            MessageKind::Binary => FrameKind::Binary,
            MessageKind::Close => {
                self.reset();
                return Ok(None);
            }
        };
        debug_assert!(
            read.count <= self.scratch.len(),
            "source reported {} bytes into a {}-byte buffer",
            read.count,
            self.scratch.len()
        );
        let count = read.count.min(self.scratch.len());

        if self.skipping {
            if read.end_of_message {
                self.skipping = false;
            }
            return Ok(None);
        }

        if let Some(partial) = self.partial {
            if partial != kind {
                self.reset();
                self.skipping = !read.end_of_message;
                return Err(FrameError::KindChanged);
            }
        } else if read.end_of_message {
            return Ok(Some(on_frame(RawFrame {
                kind,
                bytes: &self.scratch[..count],
                reassembled: false,
            })));
        }

        let size = self.overflow.len() + count;
        if size > self.max_message_size {
            self.reset();
            self.skipping = !read.end_of_message;
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        self.overflow.extend_from_slice(&self.scratch[..count]);
        if !read.end_of_message {
            self.partial = Some(kind);
            return Ok(None);
        }

        self.partial = None;
        let out = on_frame(RawFrame {
            kind,
            bytes: &self.overflow,
            reassembled: true,
        });
        self.overflow.clear();
        tracing::trace!(capacity = self.overflow.capacity(), "overflow buffer drained");
        Ok(Some(out))
    }
}

impl Default for ReceiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}
