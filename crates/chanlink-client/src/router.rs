//! Explicit channel registration table.
//!
//! A [`Router`] maps channel names to handlers and to the schema published
//! for them. Attach it to a [`Client`] to receive its messages, and pass it
//! as the client's schema source so the remote learns the channel set after
//! every handshake.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chanlink_frame::{BinaryFrame, JsonMessage};
use chanlink_schema::{ApiDocument, ChannelSchema, RegistryConfig, SchemaRegistry};
use chanlink_transport::{Connector, FrameSink};
use serde_json::Value;

use crate::client::{Client, Shared};
use crate::error::Result;
use crate::events::SubscriptionId;
use crate::source::SchemaSource;

type JsonHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type BinaryHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;
type ChangeListener = Arc<dyn Fn(ApiDocument) + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Json(JsonHandler),
    Binary(BinaryHandler),
}

struct Table {
    registry: SchemaRegistry,
    handlers: HashMap<String, Handler>,
}

/// Channel name to handler and schema.
pub struct Router {
    table: RwLock<Table>,
    listeners: RwLock<Vec<ChangeListener>>,
}

/// Subscriptions created by [`Router::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub json: SubscriptionId,
    pub binary: SubscriptionId,
}

impl Router {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a router whose registry uses `config`.
    ///
    /// With `validate_inbound`, JSON payloads are checked against the
    /// channel's `subscribe` schema before reaching the handler.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            table: RwLock::new(Table {
                registry: SchemaRegistry::with_config(config),
                handlers: HashMap::new(),
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Route JSON messages on `channel` to `handler`.
    pub fn json<F>(&self, channel: &str, schema: ChannelSchema, handler: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.insert(channel, schema, Handler::Json(Arc::new(handler)))
    }

    /// Route binary messages on `channel` to `handler`.
    ///
    /// The payload borrows the receive buffer and is only valid during the call.
    pub fn binary<F>(&self, channel: &str, schema: ChannelSchema, handler: F) -> Result<()>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.insert(channel, schema, Handler::Binary(Arc::new(handler)))
    }

    fn insert(&self, channel: &str, schema: ChannelSchema, handler: Handler) -> Result<()> {
        {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            table.registry.register(channel, schema)?;
            table.handlers.insert(channel.to_string(), handler);
        }
        tracing::debug!(channel, "route registered");
        self.changed();
        Ok(())
    }

    /// Unregister a channel. Returns true if it was routed.
    pub fn remove(&self, channel: &str) -> bool {
        let removed = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            table.registry.remove(channel);
            table.handlers.remove(channel).is_some()
        };
        if removed {
            self.changed();
        }
        removed
    }

    /// Routed channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.read().registry.channels()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.read().handlers.contains_key(channel)
    }

    /// Hand a JSON message to its handler.
    ///
    /// Returns `Ok(false)` when no JSON route exists for the channel.
    pub fn dispatch_json(&self, message: &JsonMessage) -> Result<bool> {
        let handler = {
            let table = self.read();
            match table.handlers.get(&message.channel) {
                Some(Handler::Json(handler)) => {
                    table.registry.validate(&message.channel, &message.payload)?;
                    Arc::clone(handler)
                }
                _ => {
                    tracing::debug!(channel = %message.channel, "no json route, message ignored");
                    return Ok(false);
                }
            }
        };
        handler(&message.payload);
        Ok(true)
    }

    /// Hand a binary message to its handler.
    ///
    /// Returns false when no binary route exists for the channel.
    pub fn dispatch_binary(&self, frame: &BinaryFrame<'_>) -> bool {
        let handler = match self.read().handlers.get(frame.channel()) {
            Some(Handler::Binary(handler)) => Arc::clone(handler),
            _ => {
                tracing::debug!(channel = frame.channel(), "no binary route, message ignored");
                return false;
            }
        };
        handler(frame.payload());
        true
    }

    /// Subscribe this router to `client`'s messages.
    ///
    /// Validation failures are reported on the client's error event. Every
    /// later change to the routing table is published to the client as a
    /// fresh schema document.
    pub fn attach<C: Connector>(self: &Arc<Self>, client: &Client<C>) -> Attachment {
        let shared = client.shared();
        let events = Arc::downgrade(&shared.events);

        let router = Arc::clone(self);
        let json = client.on_json_received(move |message| {
            if let Err(err) = router.dispatch_json(message) {
                if let Some(events) = events.upgrade() {
                    events.report(&err);
                }
            }
        });

        let router = Arc::clone(self);
        let binary = client.on_binary_received(move |frame| {
            router.dispatch_binary(frame);
        });

        self.on_change(push_to(Arc::downgrade(shared)));
        Attachment { json, binary }
    }

    fn on_change(&self, listener: ChangeListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn changed(&self) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }
        let document = self.api_document();
        for listener in listeners {
            listener(document.clone());
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Listener that publishes each new document through `shared`.
///
/// Changes made outside a tokio runtime are only published on the next
/// handshake.
fn push_to<S: FrameSink>(shared: Weak<Shared<S>>) -> ChangeListener {
    Arc::new(move |document: ApiDocument| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    shared.update_schema(&document).await;
                });
            }
            Err(_) => tracing::debug!("no runtime, schema update deferred to next handshake"),
        }
    })
}

impl SchemaSource for Router {
    fn api_document(&self) -> ApiDocument {
        self.read().registry.document()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("channels", &self.channels())
            .finish()
    }
}
