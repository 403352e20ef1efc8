//! Long-lived subscriptions.

use crate::error::ShadowResult;
use crate::router::SinkId;
use crate::transport::ShadowTransport;
use thingshadow_protocol::Shadow;
use tokio::sync::mpsc;

/// Every message published on a topic filter, in arrival order.
///
/// The stream is never torn down implicitly. It ends when the filter is
/// unsubscribed or the session disconnects; dropping it only stops local
/// delivery.
#[derive(Debug)]
pub struct ShadowStream {
    filter: String,
    id: SinkId,
    receiver: mpsc::UnboundedReceiver<Shadow>,
}

impl ShadowStream {
    /// Returns the filter this stream is subscribed to.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Returns the sink id of this stream.
    pub fn sink_id(&self) -> SinkId {
        self.id
    }

    /// Receives the next message. `None` means end-of-stream.
    pub async fn recv(&mut self) -> Option<Shadow> {
        self.receiver.recv().await
    }

    /// Receives a message if one is already queued.
    pub fn try_recv(&mut self) -> Result<Shadow, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Closes the receiving half; queued messages can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Streams for the update-accepted and update-rejected topics.
#[derive(Debug)]
pub struct ShadowChanges {
    /// Every accepted update.
    pub accepted: ShadowStream,
    /// Every rejected update.
    pub rejected: ShadowStream,
}

/// Subscribes once and hands the caller the resulting stream.
#[derive(Debug, Clone)]
pub struct DurableSubscription {
    filter: String,
}

impl DurableSubscription {
    /// Creates a subscription for a topic filter.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
        }
    }

    /// Subscribes and returns the stream.
    pub async fn open<T: ShadowTransport>(self, transport: &T) -> ShadowResult<ShadowStream> {
        let (sink, receiver) = mpsc::unbounded_channel();
        let id = transport.subscribe(&self.filter, sink).await?;
        tracing::debug!(filter = %self.filter, "durable subscription opened");

        Ok(ShadowStream {
            filter: self.filter,
            id,
            receiver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn stream_receives_every_message_in_order() {
        let transport = MockTransport::new();
        let mut stream = DurableSubscription::new("$aws/things/t/fancy")
            .open(&transport)
            .await
            .unwrap();

        for i in 0..5 {
            transport.deliver("$aws/things/t/fancy", i.to_string());
        }
        for i in 0..5 {
            assert_eq!(stream.recv().await.unwrap(), Shadow::from(i.to_string()));
        }
        assert_eq!(stream.filter(), "$aws/things/t/fancy");
    }

    #[tokio::test]
    async fn stream_ends_on_unsubscribe() {
        let transport = MockTransport::new();
        let mut stream = DurableSubscription::new("a").open(&transport).await.unwrap();
        transport.deliver("a", "last");

        transport.unsubscribe("a").await.unwrap();
        assert_eq!(stream.recv().await.unwrap(), Shadow::from("last"));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn stream_is_not_torn_down_implicitly() {
        let transport = MockTransport::new();
        let stream = DurableSubscription::new("a").open(&transport).await.unwrap();
        drop(stream);

        // The broker subscription stays until unsubscribed.
        assert_eq!(transport.active_filters(), vec!["a".to_string()]);
        assert_eq!(transport.deliver("a", "x"), 0);
    }
}
