use std::future::Future;

use bytes::Bytes;

use crate::error::Result;

/// Frame-type tag reported by a physical read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    Binary,
    /// The peer closed the connection (or the stream ended).
    Close,
}

/// Outcome of one physical read into a caller-supplied buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveResult {
    /// Bytes written into the buffer.
    pub count: usize,
    /// Frame type of the message these bytes belong to.
    pub kind: MessageKind,
    /// True when this read completes the message.
    pub end_of_message: bool,
}

impl ReceiveResult {
    /// A read reporting that the connection closed.
    pub fn close() -> Self {
        Self {
            count: 0,
            kind: MessageKind::Close,
            end_of_message: true,
        }
    }

    /// True if the connection reported close.
    pub fn is_close(&self) -> bool {
        self.kind == MessageKind::Close
    }
}

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl WireMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opens physical connections.
///
/// Every call to [`Connector::connect`] produces a brand-new connection; the
/// previous one is never reused.
pub trait Connector: Send + Sync + 'static {
    /// Write half of a connection.
    type Sink: FrameSink;
    /// Read half of a connection.
    type Source: FrameSource;

    /// Open a new connection.
    fn connect(&self) -> impl Future<Output = Result<(Self::Sink, Self::Source)>> + Send;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> String;
}

/// Write half of a physical connection.
///
/// A sink may be used concurrently with its [`FrameSource`], but not with
/// itself: callers serialize writes.
pub trait FrameSink: Send + 'static {
    /// Write one complete frame.
    fn send(&mut self, message: WireMessage) -> impl Future<Output = Result<()>> + Send;

    /// Close the connection (best effort).
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Read half of a physical connection.
///
/// Sources are `Sync` so the task owning one can hold shared borrows of it
/// across an await.
pub trait FrameSource: Send + Sync + 'static {
    /// Read the next chunk of the current message into `buf`.
    ///
    /// A message larger than `buf` is delivered across several reads; only
    /// the last one has `end_of_message` set.
    fn receive(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<ReceiveResult>> + Send;
}
