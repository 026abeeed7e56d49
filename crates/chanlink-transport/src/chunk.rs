use bytes::{Buf, Bytes};

use crate::traits::{MessageKind, ReceiveResult};

/// A received message (or message fragment) being handed out in
/// buffer-sized pieces.
#[derive(Debug)]
pub(crate) struct PendingMessage {
    kind: MessageKind,
    data: Bytes,
    last_fragment: bool,
}

impl PendingMessage {
    pub(crate) fn new(kind: MessageKind, data: Bytes, last_fragment: bool) -> Self {
        Self {
            kind,
            data,
            last_fragment,
        }
    }

    /// Copy as much as fits into `buf`.
    ///
    /// `end_of_message` is only reported once the last fragment is drained.
    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> ReceiveResult {
        let count = self.data.len().min(buf.len());
        buf[..count].copy_from_slice(&self.data[..count]);
        self.data.advance(count);
        ReceiveResult {
            count,
            kind: self.kind,
            end_of_message: self.last_fragment && self.data.is_empty(),
        }
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.data.is_empty()
    }
}
