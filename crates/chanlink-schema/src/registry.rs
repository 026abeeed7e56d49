use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use chanlink_frame::{is_reserved, validate_channel_name};
use jsonschema::Validator;
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::document::{ApiDocument, ChannelSchema};
use crate::error::{Result, SchemaError};
use crate::validator::{compile, validate_value};

struct Entry {
    schema: ChannelSchema,
    validator: Option<Validator>,
}

/// Channel-keyed table of channel descriptions.
pub struct SchemaRegistry {
    channels: BTreeMap<String, Entry>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            channels: BTreeMap::new(),
            config,
        }
    }

    /// Register or replace a channel description.
    ///
    /// With `validate_inbound` set, the channel's `subscribe` schema is
    /// compiled here so a bad schema fails at registration time.
    pub fn register(&mut self, channel: &str, schema: ChannelSchema) -> Result<()> {
        if is_reserved(channel) {
            return Err(SchemaError::ReservedChannel(channel.to_string()));
        }
        validate_channel_name(channel)?;

        let validator = match (&schema.subscribe, self.config.validate_inbound) {
            (Some(subscribe), true) if !subscribe.is_empty() => {
                Some(compile(channel, subscribe, self.config.strict_mode)?)
            }
            _ => None,
        };

        tracing::debug!(channel, validated = validator.is_some(), "channel schema registered");
        self.channels
            .insert(channel.to_string(), Entry { schema, validator });
        Ok(())
    }

    /// Remove a channel. Returns true if it was registered.
    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    /// Look up a channel description.
    pub fn get(&self, channel: &str) -> Option<&ChannelSchema> {
        self.channels.get(channel).map(|entry| &entry.schema)
    }

    /// Check if a channel is registered.
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Registered channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Build the document published on `__internal/api`.
    pub fn document(&self) -> ApiDocument {
        let mut document = ApiDocument::new();
        for (channel, entry) in &self.channels {
            document
                .channels
                .insert(channel.clone(), entry.schema.clone());
        }
        document
    }

    /// Validate an inbound payload against its channel's `subscribe` schema.
    ///
    /// Channels without a compiled schema always pass.
    pub fn validate(&self, channel: &str, payload: &Value) -> Result<()> {
        match self
            .channels
            .get(channel)
            .and_then(|entry| entry.validator.as_ref())
        {
            Some(validator) => validate_value(channel, payload, validator),
            None => Ok(()),
        }
    }

    /// Build a registry from an existing document.
    pub fn from_document(document: &ApiDocument, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);
        for (channel, schema) in &document.channels {
            registry.register(channel, schema.clone())?;
        }
        Ok(registry)
    }

    /// Load a registry from a JSON document on disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with_config(path, RegistryConfig::default())
    }

    /// Load a registry from a JSON document on disk with explicit config.
    pub fn from_file_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|err| {
            SchemaError::LoadFailed(format!("failed opening {}: {err}", path.display()))
        })?;

        let max_bytes = config.max_document_size;
        let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| {
                SchemaError::LoadFailed(format!("failed reading {}: {err}", path.display()))
            })?;
        if content.len() > max_bytes {
            return Err(SchemaError::LoadFailed(format!(
                "document too large (max {max_bytes} bytes): {}",
                path.display()
            )));
        }

        let document = ApiDocument::from_json(&content)?;
        Self::from_document(&document, config)
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::MessageSchema;

    fn temp_file(tag: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "chanlink-schema-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let path = dir.join("api.json");
        std::fs::write(&path, content).expect("document should be writable");
        path
    }

    fn health() -> ChannelSchema {
        ChannelSchema::new("Health")
            .category("Player")
            .subscribe(MessageSchema::object().property("hp", json!({"type": "integer"})))
    }

    #[test]
    fn document_lists_registered_channels() {
        let mut registry = SchemaRegistry::new();
        registry.register("player/health", health()).unwrap();
        registry
            .register("camera/frame", ChannelSchema::new("Frame").kind("binary"))
            .unwrap();

        let document = registry.document();
        assert_eq!(document.version, "1.0.0");
        assert_eq!(
            document.channels.keys().collect::<Vec<_>>(),
            vec!["camera/frame", "player/health"]
        );
        assert_eq!(registry.channels(), vec!["camera/frame", "player/health"]);

        assert!(registry.remove("camera/frame"));
        assert!(!registry.remove("camera/frame"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_reserved_and_oversized_names() {
        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.register("__internal/api", ChannelSchema::default()),
            Err(SchemaError::ReservedChannel(_))
        ));
        assert!(matches!(
            registry.register(&"c".repeat(256), ChannelSchema::default()),
            Err(SchemaError::InvalidChannel(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn validation_is_opt_in() {
        let mut lenient = SchemaRegistry::new();
        lenient.register("player/health", health()).unwrap();
        assert!(lenient.validate("player/health", &json!({"hp": "x"})).is_ok());

        let mut checked = SchemaRegistry::with_config(RegistryConfig {
            validate_inbound: true,
            ..RegistryConfig::default()
        });
        checked.register("player/health", health()).unwrap();
        assert!(checked.validate("player/health", &json!({"hp": 5})).is_ok());
        assert!(matches!(
            checked.validate("player/health", &json!({"hp": "x"})),
            Err(SchemaError::ValidationFailed { .. })
        ));
        assert!(checked.validate("unknown", &json!("anything")).is_ok());
    }

    #[test]
    fn strict_mode_rejects_extra_fields() {
        let mut registry = SchemaRegistry::with_config(RegistryConfig {
            validate_inbound: true,
            strict_mode: true,
            ..RegistryConfig::default()
        });
        registry.register("player/health", health()).unwrap();

        assert!(registry
            .validate("player/health", &json!({"hp": 1, "extra": true}))
            .is_err());
    }

    #[test]
    fn loads_document_from_file() {
        let path = temp_file(
            "load",
            r#"{"debugMenuApi":"1.0.0","channels":{"light/on":{"name":"Light","type":"toggle"}}}"#,
        );
        let registry = SchemaRegistry::from_file(&path).unwrap();
        assert_eq!(registry.get("light/on").unwrap().kind, "toggle");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn rejects_oversized_document() {
        let path = temp_file("large", &format!("{{\"pad\":\"{}\"}}", "x".repeat(256)));
        let config = RegistryConfig {
            max_document_size: 64,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            SchemaRegistry::from_file_with_config(&path, config),
            Err(SchemaError::LoadFailed(_))
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err =
            SchemaRegistry::from_file(Path::new("/nonexistent/chanlink/api.json")).unwrap_err();
        assert!(matches!(err, SchemaError::LoadFailed(_)));
    }
}
