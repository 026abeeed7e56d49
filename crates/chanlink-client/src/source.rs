use chanlink_schema::ApiDocument;

/// Supplies the schema document published after each handshake.
pub trait SchemaSource: Send + Sync + 'static {
    /// Current document describing the registered channels.
    fn api_document(&self) -> ApiDocument;
}

impl SchemaSource for ApiDocument {
    fn api_document(&self) -> ApiDocument {
        self.clone()
    }
}
