//! In-memory loopback transport.
//!
//! [`channel`] returns a connector for the client side and a server that
//! yields one [`MemoryPeer`] per successful connect. Used by tests and demos
//! where a real socket would only add noise.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::chunk::PendingMessage;
use crate::error::{Result, TransportError};
use crate::traits::{Connector, FrameSink, FrameSource, MessageKind, ReceiveResult, WireMessage};

const ENDPOINT: &str = "memory://loopback";

/// Create a connected connector/server pair.
pub fn channel() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector {
        state: Arc::new(ConnectorState {
            accept_tx,
            attempts: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            written: Arc::new(AtomicUsize::new(0)),
        }),
    };
    (connector, MemoryServer { accept_rx })
}

#[derive(Debug)]
struct ConnectorState {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    written: Arc<AtomicUsize>,
}

/// Client side of the loopback. Clones share attempt and write counters.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<ConnectorState>,
}

impl MemoryConnector {
    /// Make the next `count` connect attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.state.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of connect attempts so far (including failed ones).
    pub fn connect_attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Number of frames written by all sinks created by this connector.
    pub fn frames_written(&self) -> usize {
        self.state.written.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Sink = MemorySink;
    type Source = MemorySource;

    async fn connect(&self) -> Result<(MemorySink, MemorySource)> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Refused("injected connect failure".to_string()));
        }

        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            inbound: to_server_rx,
            outbound: to_client_tx,
        };
        self.state
            .accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect {
                endpoint: ENDPOINT.to_string(),
                source: "memory server dropped".into(),
            })?;

        Ok((
            MemorySink {
                tx: Some(to_server_tx),
                written: Arc::clone(&self.state.written),
            },
            MemorySource {
                rx: to_client_rx,
                pending: None,
            },
        ))
    }

    fn endpoint(&self) -> String {
        ENDPOINT.to_string()
    }
}

/// Accepts loopback connections.
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next client connection.
    ///
    /// Returns `None` once every connector clone is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take an already-established connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

#[derive(Debug)]
enum Incoming {
    Fragment {
        kind: MessageKind,
        data: Bytes,
        last: bool,
    },
    Close,
}

/// Server end of one loopback connection.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<WireMessage>,
    outbound: mpsc::UnboundedSender<Incoming>,
}

impl MemoryPeer {
    /// Next frame written by the client, or `None` once its sink is closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.inbound.recv().await
    }

    /// Send a text frame to the client.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.push(MessageKind::Text, Bytes::copy_from_slice(text.as_bytes()), true)
    }

    /// Send a binary frame to the client.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.push(MessageKind::Binary, data.into(), true)
    }

    /// Send one message split into explicit fragments; only the last one
    /// completes the message.
    pub fn send_fragments(&self, kind: MessageKind, fragments: Vec<Bytes>) -> Result<()> {
        let count = fragments.len();
        for (index, fragment) in fragments.into_iter().enumerate() {
            self.push(kind, fragment, index + 1 == count)?;
        }
        Ok(())
    }

    /// Stop reading what the client writes. Its later writes fail while
    /// the client's read side stays open.
    pub fn close_inbound(&mut self) {
        self.inbound.close();
    }

    /// Close the connection from the server side.
    pub fn close(&self) -> Result<()> {
        self.outbound
            .send(Incoming::Close)
            .map_err(|_| TransportError::Closed)
    }

    fn push(&self, kind: MessageKind, data: Bytes, last: bool) -> Result<()> {
        self.outbound
            .send(Incoming::Fragment { kind, data, last })
            .map_err(|_| TransportError::Closed)
    }
}

/// Client write half of a loopback connection.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<WireMessage>>,
    written: Arc<AtomicUsize>,
}

impl FrameSink for MemorySink {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message).map_err(|_| TransportError::Closed)?;
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Client read half of a loopback connection.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Incoming>,
    pending: Option<PendingMessage>,
}

impl FrameSource for MemorySource {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<ReceiveResult> {
        if self.pending.is_none() {
            match self.rx.recv().await {
                Some(Incoming::Fragment { kind, data, last }) => {
                    self.pending = Some(PendingMessage::new(kind, data, last));
                }
                Some(Incoming::Close) | None => return Ok(ReceiveResult::close()),
            }
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(ReceiveResult::close());
        };
        let read = pending.read_into(buf);
        if pending.is_drained() {
            self.pending = None;
        }
        Ok(read)
    }
}
