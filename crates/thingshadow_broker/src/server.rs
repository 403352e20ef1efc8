//! The shadow service.

use crate::config::BrokerConfig;
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::{ShadowDocument, ShadowStore};
use std::sync::Arc;
use thingshadow_protocol::{ShadowTopic, ShadowTopics, ThingName};

/// An in-memory device shadow service.
///
/// The service sees every client publish. Publishes to a thing's `get`,
/// `update` and `delete` topics are answered on the matching accepted or
/// rejected topic; everything else is ignored.
///
/// # Example
///
/// ```
/// use thingshadow_broker::{BrokerConfig, ShadowService};
///
/// let service = ShadowService::new(BrokerConfig::default());
/// let replies = service.handle_publish("$aws/things/lamp/shadow/get", b"{}");
///
/// assert_eq!(replies[0].0, "$aws/things/lamp/shadow/get/rejected");
/// ```
pub struct ShadowService {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl ShadowService {
    /// Creates a new shadow service.
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_store(config, Arc::new(ShadowStore::new()))
    }

    /// Creates a shadow service over an existing store.
    pub fn with_store(config: BrokerConfig, store: Arc<ShadowStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a client publish and returns the messages to publish in
    /// response, as `(topic, payload)` pairs.
    pub fn handle_publish(&self, topic: &str, payload: &[u8]) -> Vec<(String, Vec<u8>)> {
        let Some((thing, reserved)) = ShadowTopic::parse(topic) else {
            return Vec::new();
        };
        let Ok(thing) = ThingName::new(thing) else {
            return Vec::new();
        };

        let topics = ShadowTopics::new(thing);
        self.handler
            .handle(topics.thing_name().as_str(), reserved, payload)
            .into_iter()
            .map(|reply| (topics.topic(reply.topic), reply.body))
            .collect()
    }

    /// Returns a thing's stored shadow.
    pub fn shadow(&self, thing: &str) -> Option<ShadowDocument> {
        self.context.store.get(thing)
    }

    /// Returns the number of stored shadows.
    pub fn shadow_count(&self) -> usize {
        self.context.store.len()
    }

    /// Returns the service configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.context.config
    }
}
