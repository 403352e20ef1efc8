//! Service configuration.

/// Largest accepted update request, in bytes.
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 8 * 1024;

/// Configuration for the shadow service.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Publish previous/current documents on `update/documents` after each
    /// accepted update.
    pub publish_documents: bool,
    /// Maximum size of an update request.
    pub max_document_size: usize,
}

impl BrokerConfig {
    /// Creates a new service configuration.
    pub fn new() -> Self {
        Self {
            publish_documents: true,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
        }
    }

    /// Enables or disables `update/documents` notifications.
    pub fn with_publish_documents(mut self, enabled: bool) -> Self {
        self.publish_documents = enabled;
        self
    }

    /// Sets the maximum update request size.
    pub fn with_max_document_size(mut self, size: usize) -> Self {
        self.max_document_size = size;
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new()
    }
}
