use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version tag written as `debugMenuApi`.
pub const API_VERSION: &str = "1.0.0";

/// Schema document sent on the `__internal/api` channel.
///
/// ```json
/// { "debugMenuApi": "1.0.0",
///   "channels": { "<name>": { "name": …, "category": …, "type": …,
///                             "subscribe": {…}, "publish": {…} } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDocument {
    /// Document format version.
    #[serde(rename = "debugMenuApi")]
    pub version: String,
    /// Channel name → description.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelSchema>,
}

impl ApiDocument {
    /// An empty document at the current version.
    pub fn new() -> Self {
        Self {
            version: API_VERSION.to_string(),
            channels: BTreeMap::new(),
        }
    }

    /// Add or replace a channel description.
    pub fn with_channel(mut self, channel: impl Into<String>, schema: ChannelSchema) -> Self {
        self.channels.insert(channel.into(), schema);
        self
    }

    /// Serialize to a JSON value for the wire.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl Default for ApiDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Description of one channel.
///
/// Empty strings and absent message schemas are left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSchema {
    /// Display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Grouping used by the remote UI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    /// Free-form channel type tag.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Shape of messages the remote sends on this channel.
    #[serde(default, skip_serializing_if = "is_absent")]
    pub subscribe: Option<MessageSchema>,
    /// Shape of messages this side publishes on this channel.
    #[serde(default, skip_serializing_if = "is_absent")]
    pub publish: Option<MessageSchema>,
}

impl ChannelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn subscribe(mut self, schema: MessageSchema) -> Self {
        self.subscribe = Some(schema);
        self
    }

    pub fn publish(mut self, schema: MessageSchema) -> Self {
        self.publish = Some(schema);
        self
    }
}

/// A `{type, properties}` message shape (a JSON Schema subset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSchema {
    /// JSON Schema `type`.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// JSON Schema `properties`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl MessageSchema {
    /// An object schema with no properties yet.
    pub fn object() -> Self {
        Self {
            kind: "object".to_string(),
            properties: Map::new(),
        }
    }

    /// A schema with only a `type`.
    pub fn of_type(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: Map::new(),
        }
    }

    /// Add a property schema.
    pub fn property(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// True if neither field carries data.
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.properties.is_empty()
    }

    /// The equivalent JSON Schema value.
    pub fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        if !self.kind.is_empty() {
            schema.insert("type".to_string(), Value::String(self.kind.clone()));
        }
        if !self.properties.is_empty() {
            schema.insert(
                "properties".to_string(),
                Value::Object(self.properties.clone()),
            );
        }
        Value::Object(schema)
    }
}

fn is_absent(schema: &Option<MessageSchema>) -> bool {
    schema.as_ref().is_none_or(MessageSchema::is_empty)
}
