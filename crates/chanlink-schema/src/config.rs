/// Controls schema registry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// When true, inbound JSON payloads are checked against the channel's
    /// `subscribe` schema.
    pub validate_inbound: bool,
    /// When true, object schemas reject properties they do not declare.
    pub strict_mode: bool,
    /// Maximum bytes read from a schema document on disk.
    pub max_document_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            validate_inbound: false,
            strict_mode: false,
            max_document_size: 1024 * 1024,
        }
    }
}
