use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use chanlink_frame::{encode_binary, encode_json, FrameError, INTERNAL_API};
use chanlink_schema::ApiDocument;
use chanlink_transport::{FrameSink, WireMessage};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::error::{ClientError, Result};

/// Write half of the current connection.
///
/// Every write goes through one async mutex, so frames from concurrent
/// senders never interleave. The run loop installs a fresh sink on each
/// connect and takes it back on teardown.
pub(crate) struct Outbound<S> {
    sink: Mutex<Option<S>>,
    faulted: AtomicBool,
    fault: Notify,
    close_timeout: Duration,
}

impl<S: FrameSink> Outbound<S> {
    pub(crate) fn new(close_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(None),
            faulted: AtomicBool::new(false),
            fault: Notify::new(),
            close_timeout,
        }
    }

    pub(crate) async fn install(&self, sink: S) {
        *self.sink.lock().await = Some(sink);
        self.faulted.store(false, Ordering::SeqCst);
    }

    pub(crate) async fn take(&self) -> Option<S> {
        self.sink.lock().await.take()
    }

    /// Take the sink and close it, giving up after the close timeout.
    /// Close errors are only logged.
    pub(crate) async fn close(&self) {
        let Some(mut sink) = self.take().await else {
            return;
        };
        match tokio::time::timeout(self.close_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(error = %err, "closing connection failed"),
            Err(_) => tracing::warn!(
                timeout = ?self.close_timeout,
                "closing connection timed out, dropping it"
            ),
        }
    }

    /// True once a write failed on the current sink.
    pub(crate) fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Resolve once a write fails on the current sink.
    pub(crate) async fn faulted(&self) {
        loop {
            let notified = self.fault.notified();
            if self.is_faulted() {
                return;
            }
            notified.await;
        }
    }

    /// Write without consulting the connection state.
    pub(crate) async fn write(&self, message: WireMessage) -> Result<()> {
        let mut guard = self.sink.lock().await;
        self.write_locked(&mut guard, message).await
    }

    /// Write only if `open()` still holds once the lock is held.
    ///
    /// Returns `Ok(false)` when the frame was dropped.
    pub(crate) async fn write_if(
        &self,
        message: WireMessage,
        open: impl FnOnce() -> bool,
    ) -> Result<bool> {
        let mut guard = self.sink.lock().await;
        if !open() {
            return Ok(false);
        }
        self.write_locked(&mut guard, message).await?;
        Ok(true)
    }

    async fn write_locked(&self, sink: &mut Option<S>, message: WireMessage) -> Result<()> {
        let sink = sink.as_mut().ok_or(ClientError::NotConnected)?;
        let len = message.len();
        match sink.send(message).await {
            Ok(()) => {
                tracing::trace!(len, "frame written");
                Ok(())
            }
            Err(err) => {
                self.faulted.store(true, Ordering::SeqCst);
                self.fault.notify_waiters();
                Err(err.into())
            }
        }
    }
}

pub(crate) fn json_message(channel: &str, payload: &Value) -> Result<WireMessage> {
    Ok(WireMessage::Text(encode_json(channel, payload)?))
}

pub(crate) fn binary_message(channel: &str, payload: &[u8]) -> Result<WireMessage> {
    let mut dst = BytesMut::with_capacity(1 + channel.len() + payload.len());
    encode_binary(channel, payload, &mut dst)?;
    Ok(WireMessage::Binary(dst.freeze()))
}

pub(crate) fn schema_message(document: &ApiDocument) -> Result<WireMessage> {
    let value = document.to_value().map_err(FrameError::from)?;
    json_message(INTERNAL_API, &value)
}

/// Writer handed to the connected hook.
///
/// Writes go straight to the connection that is completing its handshake,
/// before the client reports `Connected`. Errors are returned to the hook.
pub struct Session<S> {
    outbound: Arc<Outbound<S>>,
}

impl<S> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            outbound: Arc::clone(&self.outbound),
        }
    }
}

impl<S: FrameSink> Session<S> {
    pub(crate) fn new(outbound: Arc<Outbound<S>>) -> Self {
        Self { outbound }
    }

    /// Send a JSON message on `channel`.
    pub async fn send_json(&self, channel: &str, payload: &Value) -> Result<()> {
        self.outbound.write(json_message(channel, payload)?).await
    }

    /// Send a binary message on `channel`.
    pub async fn send_binary(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.outbound.write(binary_message(channel, payload)?).await
    }

    /// Send a schema document on the internal api channel.
    pub async fn send_schema(&self, document: &ApiDocument) -> Result<()> {
        self.outbound.write(schema_message(document)?).await
    }
}

#[cfg(test)]
mod tests {
    use chanlink_transport::memory;
    use chanlink_transport::Connector;
    use serde_json::json;

    use super::*;
    use crate::config::DEFAULT_CLOSE_TIMEOUT;

    /// Sink whose close never completes, like a half-open TCP peer.
    struct StalledSink;

    impl FrameSink for StalledSink {
        async fn send(&mut self, _message: WireMessage) -> chanlink_transport::Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> chanlink_transport::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_close_gives_up_after_timeout() {
        let outbound = Outbound::new(Duration::from_millis(500));
        outbound.install(StalledSink).await;

        let started = tokio::time::Instant::now();
        outbound.close().await;
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(outbound.take().await.is_none());
    }

    #[tokio::test]
    async fn failed_write_wakes_fault_waiter() {
        let (connector, mut server) = memory::channel();
        let (sink, _source) = connector.connect().await.unwrap();
        let peer = server.accept().await.unwrap();
        let outbound = Arc::new(Outbound::new(DEFAULT_CLOSE_TIMEOUT));
        outbound.install(sink).await;

        let waiter = tokio::spawn({
            let outbound = Arc::clone(&outbound);
            async move { outbound.faulted().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(peer);
        let _ = outbound.write(WireMessage::Text("x".into())).await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("fault waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn write_without_sink_is_not_connected() {
        let outbound = Outbound::<memory::MemorySink>::new(DEFAULT_CLOSE_TIMEOUT);
        let err = outbound
            .write(WireMessage::Text("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn failed_write_marks_faulted() {
        let (connector, mut server) = memory::channel();
        let (sink, _source) = connector.connect().await.unwrap();
        let peer = server.accept().await.unwrap();
        let outbound = Outbound::new(DEFAULT_CLOSE_TIMEOUT);
        outbound.install(sink).await;

        drop(peer);
        let err = outbound.write(WireMessage::Text("x".into())).await;
        assert!(matches!(err, Err(ClientError::Transport(_))));
        assert!(outbound.is_faulted());
    }

    #[tokio::test]
    async fn gate_checked_under_lock() {
        let (connector, mut server) = memory::channel();
        let (sink, _source) = connector.connect().await.unwrap();
        let mut peer = server.accept().await.unwrap();
        let outbound = Outbound::new(DEFAULT_CLOSE_TIMEOUT);
        outbound.install(sink).await;

        let dropped = outbound
            .write_if(WireMessage::Text("no".into()), || false)
            .await
            .unwrap();
        let sent = outbound
            .write_if(WireMessage::Text("yes".into()), || true)
            .await
            .unwrap();
        assert!(!dropped);
        assert!(sent);
        assert_eq!(peer.recv().await, Some(WireMessage::Text("yes".into())));
        assert_eq!(connector.frames_written(), 1);
    }

    #[test]
    fn oversized_channel_fails_before_write() {
        let channel = "c".repeat(256);
        assert!(matches!(
            binary_message(&channel, b"x"),
            Err(ClientError::Frame(FrameError::ChannelNameTooLong { .. }))
        ));
    }

    #[test]
    fn schema_goes_to_internal_channel() {
        let WireMessage::Text(text) = schema_message(&ApiDocument::new()).unwrap() else {
            panic!("schema must be a text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "channel": "__internal/api",
                "payload": {"debugMenuApi": "1.0.0", "channels": {}}
            })
        );
    }
}
