//! In-process transport that routes publishes straight to a broker.
//!
//! Useful for testing and local development without a network.

use crate::error::{ShadowError, ShadowResult};
use crate::router::{MessageSink, SinkId, SubscriptionRouter};
use crate::transport::ShadowTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thingshadow_protocol::{validate_topic_filter, validate_topic_name, Shadow};

/// Trait for brokers that can handle loopback publishes.
///
/// Returns the messages the broker publishes in response, in order.
pub trait LoopbackBroker: Send + Sync + 'static {
    /// Handles a PUBLISH from the client.
    fn handle_publish(&self, topic: &str, payload: &[u8]) -> Vec<(String, Vec<u8>)>;
}

impl<B: LoopbackBroker> LoopbackBroker for Arc<B> {
    fn handle_publish(&self, topic: &str, payload: &[u8]) -> Vec<(String, Vec<u8>)> {
        (**self).handle_publish(topic, payload)
    }
}

/// A transport whose "network" is a direct call into a [`LoopbackBroker`].
///
/// A publish is first delivered to this client's own matching subscribers,
/// as an MQTT broker would, and then handed to the broker. Responses are
/// routed before `publish` returns.
pub struct LoopbackTransport<B: LoopbackBroker> {
    broker: B,
    router: SubscriptionRouter,
    connected: AtomicBool,
}

impl<B: LoopbackBroker> LoopbackTransport<B> {
    /// Creates a new loopback transport connected to the given broker.
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            router: SubscriptionRouter::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Returns the broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Returns the number of local sinks across all filters.
    pub fn total_sinks(&self) -> usize {
        self.router.total_sinks()
    }

    fn ensure_connected(&self) -> ShadowResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ShadowError::NotConnected)
        }
    }
}

impl<B: LoopbackBroker> ShadowTransport for LoopbackTransport<B> {
    async fn subscribe(&self, filter: &str, sink: MessageSink) -> ShadowResult<SinkId> {
        self.ensure_connected()?;
        validate_topic_filter(filter).map_err(|e| ShadowError::Subscribe {
            topic: filter.to_string(),
            reason: e.to_string(),
        })?;

        let (id, _) = self.router.attach(filter, sink);
        tracing::debug!(filter, "loopback subscribe");
        Ok(id)
    }

    async fn release(&self, filter: &str, id: SinkId) -> ShadowResult<()> {
        self.router.detach(filter, id);
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> ShadowResult<()> {
        self.ensure_connected()?;
        self.router.detach_all(filter);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Shadow) -> ShadowResult<()> {
        self.ensure_connected()?;
        validate_topic_name(topic).map_err(|e| ShadowError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        self.router.dispatch(topic, &payload);

        let responses = self.broker.handle_publish(topic, payload.as_bytes());
        tracing::debug!(topic, responses = responses.len(), "loopback publish");
        for (response_topic, body) in responses {
            self.router.dispatch(&response_topic, &Shadow::from(body));
        }
        Ok(())
    }

    async fn disconnect(&self) -> ShadowResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.router.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
