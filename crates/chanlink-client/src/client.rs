use std::sync::{Arc, Mutex, PoisonError};

use chanlink_frame::{validate_channel_name, BinaryFrame, FrameError, JsonMessage};
use chanlink_schema::ApiDocument;
use chanlink_transport::{Connector, FrameSink, WireMessage};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, HandshakeConfig};
use crate::connection::{cancellable, ConnectedHook, ConnectionMachine, MachineParts};
use crate::error::{ClientError, Result};
use crate::events::{Events, SubscriptionId};
use crate::outbound::{binary_message, json_message, schema_message, Outbound, Session};
use crate::run_loop;
use crate::source::SchemaSource;
use crate::state::ConnectionState;

/// State shared between a [`Client`] handle and its run loop.
pub(crate) struct Shared<S> {
    pub(crate) outbound: Arc<Outbound<S>>,
    pub(crate) events: Arc<Events>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    schema: Option<Arc<dyn SchemaSource>>,
}

impl<S: FrameSink> Shared<S> {
    fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.state.borrow().is_connected()
            && !self.outbound.is_faulted()
    }

    /// Gate and write one frame. Delivery failures go to the error event.
    async fn send(&self, message: WireMessage) -> Result<()> {
        let len = message.len();
        let write = self.outbound.write_if(message, || self.is_open());
        match cancellable(&self.cancel, write).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(len, "not connected, outbound message dropped");
                Ok(())
            }
            Err(err) if err.is_internal() => Ok(()),
            Err(err) => {
                self.events.report(&err);
                Ok(())
            }
        }
    }

    pub(crate) async fn update_schema(&self, document: &ApiDocument) {
        match schema_message(document) {
            Ok(message) => {
                if let Err(err) = self.send(message).await {
                    self.events.report(&err);
                }
            }
            Err(err) => self.events.report(&err),
        }
    }
}

/// Builder for a [`Client`].
pub struct ClientBuilder<C: Connector> {
    connector: C,
    config: ClientConfig,
    handshake: HandshakeConfig,
    schema: Option<Arc<dyn SchemaSource>>,
    on_connected: Option<ConnectedHook<C::Sink>>,
}

impl<C: Connector> ClientBuilder<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            config: ClientConfig::default(),
            handshake: HandshakeConfig::default(),
            schema: None,
            on_connected: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Set the handshake token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.handshake.token = token.into();
        self
    }

    /// Add one handshake metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.handshake.metadata.insert(key.into(), value.into());
        self
    }

    /// Publish this source's document on the internal api channel after
    /// every handshake.
    pub fn schema_source(mut self, source: Arc<dyn SchemaSource>) -> Self {
        self.schema = Some(source);
        self
    }

    /// Run `hook` after the handshake frames on every new connection.
    ///
    /// The state turns `Connected` only once the hook resolves; an error
    /// drops the connection and schedules a retry.
    pub fn on_connected<F>(mut self, hook: F) -> Self
    where
        F: Fn(Session<C::Sink>) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(hook));
        self
    }

    /// Spawn the run loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self) -> Client<C> {
        let endpoint = self.connector.endpoint();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Waiting);
        let outbound = Arc::new(Outbound::new(self.config.close_timeout));
        let events = Arc::new(Events::new());
        let cancel = CancellationToken::new();

        let machine = ConnectionMachine::new(MachineParts {
            connector: self.connector,
            config: self.config,
            handshake: self.handshake,
            schema: self.schema.clone(),
            on_connected: self.on_connected,
            outbound: Arc::clone(&outbound),
            state: state_tx,
        });

        let task = tokio::spawn(run_loop::run(
            machine,
            Arc::clone(&events),
            cancel.clone(),
        ));
        tracing::info!(%endpoint, "client started");

        Client {
            shared: Arc::new(Shared {
                outbound,
                events,
                state: state_rx,
                cancel,
                schema: self.schema,
            }),
            task: Mutex::new(Some(task)),
            endpoint,
        }
    }
}

/// Handle to a running client.
///
/// Sends are safe to call from any task. Dropping the handle stops the run
/// loop; [`Client::dispose`] also waits for it and closes the connection.
pub struct Client<C: Connector> {
    shared: Arc<Shared<C::Sink>>,
    task: Mutex<Option<JoinHandle<()>>>,
    endpoint: String,
}

impl<C: Connector> Client<C> {
    pub fn builder(connector: C) -> ClientBuilder<C> {
        ClientBuilder::new(connector)
    }

    /// Endpoint description of the connector.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.clone()
    }

    /// Wait until the client reaches `target`.
    ///
    /// Fails with [`ClientError::Cancelled`] if the run loop stops first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut rx = self.shared.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Cancelled)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Subscribe to JSON messages.
    pub fn on_json_received<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&JsonMessage) + Send + Sync + 'static,
    {
        self.shared.events.subscribe_json(Arc::new(callback))
    }

    /// Subscribe to binary messages.
    ///
    /// The frame borrows the receive buffer and is only valid during the
    /// call; copy it with [`BinaryFrame::to_owned`] to keep it.
    pub fn on_binary_received<F>(&self, callback: F) -> SubscriptionId
    where
        F: for<'a> Fn(&BinaryFrame<'a>) + Send + Sync + 'static,
    {
        self.shared.events.subscribe_binary(Arc::new(callback))
    }

    /// Subscribe to errors reported by the run loop and by sends.
    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.shared.events.subscribe_error(Arc::new(callback))
    }

    /// Remove a subscription. Returns true if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Send a JSON message.
    ///
    /// Dropped silently while not connected. A failed write is reported on
    /// the error event. Only encoding errors are returned.
    pub async fn send_json(&self, channel: &str, payload: &Value) -> Result<()> {
        let message = json_message(channel, payload)?;
        self.shared.send(message).await
    }

    /// Send a binary message. Same delivery rules as [`Client::send_json`].
    ///
    /// Fails without writing if `channel` is longer than 255 bytes.
    pub async fn send_binary(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let message = binary_message(channel, payload)?;
        self.shared.send(message).await
    }

    /// Send `payload[offset..offset + len]` as a binary message.
    pub async fn send_binary_range(
        &self,
        channel: &str,
        payload: &[u8],
        offset: usize,
        len: usize,
    ) -> Result<()> {
        validate_channel_name(channel)?;
        let range = offset
            .checked_add(len)
            .filter(|end| *end <= payload.len())
            .map(|end| &payload[offset..end])
            .ok_or(FrameError::RangeOutOfBounds {
                offset,
                len,
                available: payload.len(),
            })?;
        self.send_binary(channel, range).await
    }

    /// Publish a schema document on the internal api channel.
    ///
    /// Never fails: every problem is reported on the error event.
    pub async fn update_schema(&self, document: &ApiDocument) {
        self.shared.update_schema(document).await;
    }

    /// Re-read the configured schema source and publish it.
    pub async fn refresh_schema(&self) {
        if let Some(source) = &self.shared.schema {
            let document = source.api_document();
            self.shared.update_schema(&document).await;
        }
    }

    /// Stop the run loop and close the connection.
    ///
    /// Idempotent. Afterwards every send is a no-op.
    pub async fn dispose(&self) {
        self.shared.cancel.cancel();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "run loop task failed");
            }
            tracing::info!(endpoint = %self.endpoint, "client disposed");
        }

        self.shared.outbound.close().await;
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<C::Sink>> {
        &self.shared
    }
}

impl<C: Connector> Drop for Client<C> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl<C: Connector> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .field("subscribers", &self.shared.events.subscriber_count())
            .finish()
    }
}

/// Start a WebSocket client for `url` with `token` as the handshake token.
#[cfg(feature = "websocket")]
pub fn connect(
    url: impl Into<String>,
    token: impl Into<String>,
) -> Client<chanlink_transport::WsConnector> {
    ClientBuilder::new(chanlink_transport::WsConnector::new(url))
        .token(token)
        .start()
}
