//! Transport layer abstraction for shadow sessions.

use crate::error::{ShadowError, ShadowResult};
use crate::router::{MessageSink, SinkId, SubscriptionRouter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use thingshadow_protocol::Shadow;

/// A shadow transport carries subscriptions and publishes to the broker.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (MQTT, loopback, mock for testing, etc.). Every method
/// resolves only once the transport has acknowledged the request; that
/// acknowledgement says nothing about how the shadow service will answer.
pub trait ShadowTransport: Send + Sync + 'static {
    /// Attaches a sink to a filter and subscribes upstream if needed.
    ///
    /// The sink is attached before the SUBSCRIBE goes out, so no message
    /// that arrives after the acknowledgement can be missed.
    fn subscribe(
        &self,
        filter: &str,
        sink: MessageSink,
    ) -> impl Future<Output = ShadowResult<SinkId>> + Send;

    /// Detaches one sink. Unsubscribes upstream if it was the last one.
    fn release(&self, filter: &str, id: SinkId) -> impl Future<Output = ShadowResult<()>> + Send;

    /// Detaches every sink on a filter and unsubscribes upstream.
    fn unsubscribe(&self, filter: &str) -> impl Future<Output = ShadowResult<()>> + Send;

    /// Publishes a payload to a topic.
    fn publish(&self, topic: &str, payload: Shadow)
        -> impl Future<Output = ShadowResult<()>> + Send;

    /// Closes the connection and every sink. Repeated calls succeed.
    fn disconnect(&self) -> impl Future<Output = ShadowResult<()>> + Send;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// A call recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// Upstream SUBSCRIBE.
    Subscribe(String),
    /// Upstream UNSUBSCRIBE.
    Unsubscribe(String),
    /// PUBLISH.
    Publish {
        /// Topic.
        topic: String,
        /// Payload.
        payload: Shadow,
    },
    /// DISCONNECT.
    Disconnect,
}

/// A mock transport for testing.
///
/// Publishes to a topic with scripted replies dispatch those replies to the
/// matching sinks before the publish returns, the way a fast broker would.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    router: SubscriptionRouter,
    calls: Mutex<Vec<TransportCall>>,
    upstream: Mutex<HashSet<String>>,
    replies: Mutex<HashMap<String, Vec<(String, Shadow)>>>,
    failing_subscribes: Mutex<HashSet<String>>,
    failing_publishes: Mutex<HashSet<String>>,
    failing_unsubscribes: Mutex<HashSet<String>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            router: SubscriptionRouter::new(),
            calls: Mutex::new(Vec::new()),
            upstream: Mutex::new(HashSet::new()),
            replies: Mutex::new(HashMap::new()),
            failing_subscribes: Mutex::new(HashSet::new()),
            failing_publishes: Mutex::new(HashSet::new()),
            failing_unsubscribes: Mutex::new(HashSet::new()),
        }
    }

    /// Scripts the messages delivered whenever `request_topic` is published.
    pub fn reply_on(&self, request_topic: impl Into<String>, replies: Vec<(String, Shadow)>) {
        self.replies.lock().insert(request_topic.into(), replies);
    }

    /// Makes subscribing to `filter` fail.
    pub fn fail_subscribe(&self, filter: impl Into<String>) {
        self.failing_subscribes.lock().insert(filter.into());
    }

    /// Makes publishing to `topic` fail.
    pub fn fail_publish(&self, topic: impl Into<String>) {
        self.failing_publishes.lock().insert(topic.into());
    }

    /// Makes unsubscribing from `filter` fail.
    pub fn fail_unsubscribe(&self, filter: impl Into<String>) {
        self.failing_unsubscribes.lock().insert(filter.into());
    }

    /// Delivers a message as if the broker had sent it.
    ///
    /// Returns how many sinks received it.
    pub fn deliver(&self, topic: &str, payload: impl Into<Shadow>) -> usize {
        self.router.dispatch(topic, &payload.into())
    }

    /// Drops every sink without unsubscribing.
    pub fn close_all_sinks(&self) {
        self.router.clear();
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Returns the payloads published to `topic`.
    pub fn published(&self, topic: &str) -> Vec<Shadow> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic: t, payload } if t == topic => {
                    Some(payload.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Returns the filters currently subscribed upstream, sorted.
    pub fn active_filters(&self) -> Vec<String> {
        let mut filters: Vec<_> = self.upstream.lock().iter().cloned().collect();
        filters.sort();
        filters
    }

    /// Returns the number of local sinks on a filter.
    pub fn sink_count(&self, filter: &str) -> usize {
        self.router.sink_count(filter)
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

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn unsubscribe_upstream(&self, filter: &str) -> ShadowResult<()> {
        self.record(TransportCall::Unsubscribe(filter.to_string()));
        if self.failing_unsubscribes.lock().contains(filter) {
            return Err(ShadowError::Unsubscribe {
                topic: filter.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.upstream.lock().remove(filter);
        Ok(())
    }
}

impl ShadowTransport for MockTransport {
    async fn subscribe(&self, filter: &str, sink: MessageSink) -> ShadowResult<SinkId> {
        self.ensure_connected()?;

        let (id, first) = self.router.attach(filter, sink);
        if !first {
            return Ok(id);
        }

        self.record(TransportCall::Subscribe(filter.to_string()));
        if self.failing_subscribes.lock().contains(filter) {
            self.router.detach(filter, id);
            return Err(ShadowError::Subscribe {
                topic: filter.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.upstream.lock().insert(filter.to_string());
        Ok(id)
    }

    async fn release(&self, filter: &str, id: SinkId) -> ShadowResult<()> {
        if self.router.detach(filter, id) && self.is_connected() {
            self.unsubscribe_upstream(filter)?;
        }
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> ShadowResult<()> {
        self.ensure_connected()?;
        self.router.detach_all(filter);
        self.unsubscribe_upstream(filter)
    }

    async fn publish(&self, topic: &str, payload: Shadow) -> ShadowResult<()> {
        self.ensure_connected()?;

        self.record(TransportCall::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        if self.failing_publishes.lock().contains(topic) {
            return Err(ShadowError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }

        // Clone out so the lock is not held while dispatching.
        let replies = self.replies.lock().get(topic).cloned().unwrap_or_default();
        for (reply_topic, reply) in replies {
            self.router.dispatch(&reply_topic, &reply);
        }
        Ok(())
    }

    async fn disconnect(&self) -> ShadowResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.record(TransportCall::Disconnect);
        }
        self.router.clear();
        self.upstream.lock().clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());

        transport.set_connected(true);
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());

        // Idempotent.
        transport.disconnect().await.unwrap();
        assert_eq!(transport.calls(), vec![TransportCall::Disconnect]);
    }

    #[tokio::test]
    async fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = transport.subscribe("a", tx).await;
        assert!(matches!(result, Err(ShadowError::NotConnected)));

        let result = transport.publish("a", Shadow::from("x")).await;
        assert!(matches!(result, Err(ShadowError::NotConnected)));
    }

    #[tokio::test]
    async fn shared_filter_subscribes_once() {
        let transport = MockTransport::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let a = transport.subscribe("a", tx1).await.unwrap();
        let b = transport.subscribe("a", tx2).await.unwrap();
        assert_eq!(transport.calls(), vec![TransportCall::Subscribe("a".into())]);

        transport.release("a", a).await.unwrap();
        assert_eq!(transport.active_filters(), vec!["a".to_string()]);

        transport.release("a", b).await.unwrap();
        assert!(transport.active_filters().is_empty());
        assert_eq!(transport.calls().last(), Some(&TransportCall::Unsubscribe("a".into())));
    }

    #[tokio::test]
    async fn scripted_replies_reach_subscribers() {
        let transport = MockTransport::new();
        transport.reply_on("req", vec![("resp".to_string(), Shadow::from("ok"))]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe("resp", tx).await.unwrap();
        transport.publish("req", Shadow::from("{}")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Shadow::from("ok"));
        assert_eq!(transport.published("req"), vec![Shadow::from("{}")]);
    }

    #[tokio::test]
    async fn failed_subscribe_leaves_no_sink() {
        let transport = MockTransport::new();
        transport.fail_subscribe("a");

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = transport.subscribe("a", tx).await;
        assert!(matches!(result, Err(ShadowError::Subscribe { .. })));
        assert_eq!(transport.sink_count("a"), 0);
        assert!(transport.active_filters().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_closes_every_sink() {
        let transport = MockTransport::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        transport.subscribe("a", tx1).await.unwrap();
        transport.subscribe("a", tx2).await.unwrap();

        transport.unsubscribe("a").await.unwrap();
        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_none());
        assert_eq!(transport.deliver("a", "late"), 0);
    }
}
