//! Channel schema documents for chanlink.
//!
//! The client publishes an [`ApiDocument`] on the reserved `__internal/api`
//! channel describing every registered channel. The [`SchemaRegistry`] keeps
//! that table and can optionally validate inbound JSON payloads against each
//! channel's `subscribe` schema.

pub mod config;
pub mod document;
pub mod error;
pub mod registry;
pub mod validator;

pub use config::RegistryConfig;
pub use document::{ApiDocument, ChannelSchema, MessageSchema, API_VERSION};
pub use error::{Result, SchemaError};
pub use registry::SchemaRegistry;
