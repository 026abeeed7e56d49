use std::future::Future;
use std::sync::Arc;

use chanlink_transport::{Connector, FrameSource, ReceiveResult, WireMessage};
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, HandshakeConfig};
use crate::error::{ClientError, Result};
use crate::outbound::{schema_message, Outbound, Session};
use crate::source::SchemaSource;
use crate::state::ConnectionState;

/// Hook awaited after the handshake frames, before the state turns `Connected`.
pub type ConnectedHook<S> = Arc<dyn Fn(Session<S>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Run `future` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = future => result,
    }
}

/// Owner of the physical connection and of the connection state.
///
/// Only the run loop drives this type, so it is the single writer of the
/// state and the single reader of the connection.
pub(crate) struct ConnectionMachine<C: Connector> {
    connector: C,
    config: ClientConfig,
    handshake: HandshakeConfig,
    schema: Option<Arc<dyn SchemaSource>>,
    on_connected: Option<ConnectedHook<C::Sink>>,
    outbound: Arc<Outbound<C::Sink>>,
    source: Option<C::Source>,
    state: watch::Sender<ConnectionState>,
}

pub(crate) struct MachineParts<C: Connector> {
    pub(crate) connector: C,
    pub(crate) config: ClientConfig,
    pub(crate) handshake: HandshakeConfig,
    pub(crate) schema: Option<Arc<dyn SchemaSource>>,
    pub(crate) on_connected: Option<ConnectedHook<C::Sink>>,
    pub(crate) outbound: Arc<Outbound<C::Sink>>,
    pub(crate) state: watch::Sender<ConnectionState>,
}

impl<C: Connector> ConnectionMachine<C> {
    pub(crate) fn new(parts: MachineParts<C>) -> Self {
        Self {
            connector: parts.connector,
            config: parts.config,
            handshake: parts.handshake,
            schema: parts.schema,
            on_connected: parts.on_connected,
            outbound: parts.outbound,
            source: None,
            state: parts.state,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    fn transition(&self, next: ConnectionState) {
        let current = self.state();
        if current == next {
            return;
        }
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current} -> {next}"
        );
        self.state.send_replace(next);
        tracing::debug!(from = %current, to = %next, "connection state changed");
    }

    fn is_live(&self) -> bool {
        self.source.is_some() && !self.outbound.is_faulted() && self.state().is_connected()
    }

    /// Make sure a handshaken connection is open, reconnecting if needed.
    ///
    /// After a disconnect the machine idles for `reconnect_delay` before the
    /// next attempt. The very first attempt starts immediately.
    pub(crate) async fn ensure_connected(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.is_live() {
            return Ok(());
        }

        if self.state().is_connected() {
            tracing::info!(endpoint = %self.endpoint(), "connection lost");
            self.transition(ConnectionState::Disconnected);
        }

        if self.state() == ConnectionState::Disconnected {
            let delay = self.config.reconnect_delay;
            tracing::debug!(?delay, "waiting before reconnect");
            cancellable(cancel, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }

        self.reconnect(cancel).await
    }

    async fn reconnect(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.teardown(cancel).await?;
        self.transition(ConnectionState::Connecting);

        match self.open(cancel).await {
            Ok(()) => {
                self.transition(ConnectionState::Connected);
                tracing::info!(endpoint = %self.endpoint(), "connected");
                Ok(())
            }
            Err(ClientError::Cancelled) => Err(ClientError::Cancelled),
            Err(err) => {
                self.teardown(cancel).await?;
                self.transition(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    async fn open(&mut self, cancel: &CancellationToken) -> Result<()> {
        let timeout = self.config.connect_timeout;
        let (sink, source) = cancellable(cancel, async {
            match tokio::time::timeout(timeout, self.connector.connect()).await {
                Ok(result) => result.map_err(ClientError::from),
                Err(_) => Err(ClientError::Timeout(timeout)),
            }
        })
        .await?;

        self.outbound.install(sink).await;
        self.source = Some(source);
        self.transition(ConnectionState::PerformingHandshake);

        self.send_handshake(cancel).await?;

        if let Some(hook) = self.on_connected.clone() {
            let session = Session::new(Arc::clone(&self.outbound));
            cancellable(cancel, hook(session))
                .await
                .map_err(|err| match err {
                    ClientError::Cancelled => ClientError::Cancelled,
                    other => ClientError::ConnectedHook(other.to_string()),
                })?;
        }

        Ok(())
    }

    async fn send_handshake(&self, cancel: &CancellationToken) -> Result<()> {
        let metadata = serde_json::to_string(&self.handshake.metadata)
            .map_err(|err| ClientError::Handshake(format!("metadata: {err}")))?;

        cancellable(
            cancel,
            self.outbound
                .write(WireMessage::Text(self.handshake.token.clone())),
        )
        .await
        .map_err(|err| handshake_error("token", err))?;
        cancellable(cancel, self.outbound.write(WireMessage::Text(metadata)))
            .await
            .map_err(|err| handshake_error("metadata", err))?;

        if let Some(schema) = &self.schema {
            let message = schema_message(&schema.api_document())?;
            cancellable(cancel, self.outbound.write(message)).await?;
            tracing::debug!("schema document sent");
        }

        tracing::debug!(metadata_keys = self.handshake.metadata.len(), "handshake sent");
        Ok(())
    }

    /// Read the next chunk from the connection.
    ///
    /// A failed read or a close drops the connection and reports
    /// `Disconnected`. A close is returned as a normal read. A write failure
    /// on the same connection ends the read early with `NotConnected`; the
    /// failure itself was already reported by the sender.
    pub(crate) async fn receive(
        &mut self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<ReceiveResult> {
        let source = self.source.as_mut().ok_or(ClientError::NotConnected)?;
        let outbound = &self.outbound;
        let result = cancellable(cancel, async move {
            tokio::select! {
                read = source.receive(buf) => read.map_err(ClientError::from),
                () = outbound.faulted() => {
                    tracing::debug!("write failed, abandoning read");
                    Err(ClientError::NotConnected)
                }
            }
        })
        .await;

        match result {
            Ok(read) if read.is_close() => {
                tracing::info!(endpoint = %self.endpoint(), "connection closed by peer");
                self.source = None;
                self.transition(ConnectionState::Disconnected);
                Ok(read)
            }
            Ok(read) => Ok(read),
            Err(ClientError::Cancelled) => Err(ClientError::Cancelled),
            Err(err) => {
                self.source = None;
                self.transition(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Close and discard the current connection, if any.
    async fn teardown(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.source = None;
        let outbound = &self.outbound;
        cancellable(cancel, async move {
            outbound.close().await;
            Ok(())
        })
        .await
    }

    /// Publish the final state when the run loop exits.
    pub(crate) fn finish(&self) {
        match self.state() {
            ConnectionState::Waiting | ConnectionState::Disconnected => {}
            ConnectionState::Connected
            | ConnectionState::Connecting
            | ConnectionState::PerformingHandshake => {
                self.transition(ConnectionState::Disconnected);
            }
        }
    }
}

fn handshake_error(frame: &str, err: ClientError) -> ClientError {
    match err {
        ClientError::Cancelled => ClientError::Cancelled,
        other => ClientError::Handshake(format!("sending {frame} frame: {other}")),
    }
}
