//! Request/response over a pair of accepted/rejected subscriptions.
//!
//! The shadow service answers a request on one of two topics and carries no
//! request id, so the answer is matched to the most recent request on that
//! topic pair. Both outcome subscriptions exist before the trigger is
//! published, and both are released on every exit path.

use crate::cancel::CancelToken;
use crate::error::{ShadowError, ShadowResult};
use crate::router::SinkId;
use crate::transport::ShadowTransport;
use std::sync::Arc;
use std::time::Duration;
use thingshadow_protocol::{Shadow, ShadowOperation};
use tokio::sync::mpsc;

/// How a correlated request resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelatedOutcome {
    /// A message arrived on the accepted topic.
    Accepted(Shadow),
    /// A message arrived on the rejected topic.
    Rejected(Shadow),
    /// Both sinks closed without delivering anything.
    ChannelClosed,
    /// Nothing arrived before the deadline.
    DeadlineExceeded(Duration),
    /// The cancel token fired first.
    Cancelled,
}

impl CorrelatedOutcome {
    /// Converts the outcome into a result for `operation`.
    ///
    /// Only `Accepted` is a success; `topic` names the accepted topic in
    /// closed-channel errors.
    pub fn into_result(self, operation: ShadowOperation, topic: &str) -> ShadowResult<Shadow> {
        match self {
            CorrelatedOutcome::Accepted(payload) => Ok(payload),
            CorrelatedOutcome::Rejected(payload) => Err(ShadowError::Rejected { operation, payload }),
            CorrelatedOutcome::ChannelClosed => Err(ShadowError::ChannelClosed {
                topic: topic.to_string(),
            }),
            CorrelatedOutcome::DeadlineExceeded(timeout) => {
                Err(ShadowError::DeadlineExceeded { operation, timeout })
            }
            CorrelatedOutcome::Cancelled => Err(ShadowError::Cancelled),
        }
    }
}

/// A single correlated request.
#[derive(Debug, Clone)]
pub struct CorrelatedRequest {
    /// Topic the trigger is published to.
    pub request_topic: String,
    /// Topic carrying the success answer.
    pub accepted_topic: String,
    /// Topic carrying the failure answer.
    pub rejected_topic: String,
    /// Trigger payload.
    pub payload: Shadow,
    /// Optional bound on the wait for an answer.
    pub timeout: Option<Duration>,
}

impl CorrelatedRequest {
    /// Creates a request without a deadline.
    pub fn new(
        request_topic: impl Into<String>,
        accepted_topic: impl Into<String>,
        rejected_topic: impl Into<String>,
        payload: Shadow,
    ) -> Self {
        Self {
            request_topic: request_topic.into(),
            accepted_topic: accepted_topic.into(),
            rejected_topic: rejected_topic.into(),
            payload,
            timeout: None,
        }
    }

    /// Bounds the wait for an answer.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the request to completion.
    ///
    /// Transport failures are returned as errors; every answer, including a
    /// rejection, is an `Ok` outcome.
    pub async fn execute<T: ShadowTransport>(
        self,
        transport: &Arc<T>,
        cancel: Option<&CancelToken>,
    ) -> ShadowResult<CorrelatedOutcome> {
        let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
        let (rejected_tx, mut rejected_rx) = mpsc::unbounded_channel();
        let mut guard = OutcomeGuard::new(Arc::clone(transport));

        let id = transport.subscribe(&self.accepted_topic, accepted_tx).await?;
        guard.track(&self.accepted_topic, id);

        let result = transport.subscribe(&self.rejected_topic, rejected_tx).await;
        let id = match result {
            Ok(id) => id,
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };
        guard.track(&self.rejected_topic, id);

        tracing::debug!(topic = %self.request_topic, "publishing correlated request");
        if let Err(e) = transport.publish(&self.request_topic, self.payload).await {
            guard.release().await;
            return Err(e);
        }

        let outcome = wait_for_outcome(
            &mut accepted_rx,
            &mut rejected_rx,
            self.timeout,
            cancel,
        )
        .await;

        guard.release().await;
        tracing::debug!(topic = %self.request_topic, ?outcome, "correlated request resolved");
        Ok(outcome)
    }
}

async fn wait_for_outcome(
    accepted: &mut mpsc::UnboundedReceiver<Shadow>,
    rejected: &mut mpsc::UnboundedReceiver<Shadow>,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> CorrelatedOutcome {
    let mut accepted_open = true;
    let mut rejected_open = true;

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline, cancelled);

    loop {
        if !accepted_open && !rejected_open {
            return CorrelatedOutcome::ChannelClosed;
        }

        tokio::select! {
            biased;

            _ = &mut cancelled => return CorrelatedOutcome::Cancelled,
            message = accepted.recv(), if accepted_open => match message {
                Some(payload) => return CorrelatedOutcome::Accepted(payload),
                None => accepted_open = false,
            },
            message = rejected.recv(), if rejected_open => match message {
                Some(payload) => return CorrelatedOutcome::Rejected(payload),
                None => rejected_open = false,
            },
            _ = &mut deadline => {
                // `timeout` is always Some when the deadline fires.
                return CorrelatedOutcome::DeadlineExceeded(timeout.unwrap_or_default());
            }
        }
    }
}

/// Releases the sinks of one correlated request.
///
/// If the request future is dropped mid-flight, the release is spawned on
/// the current runtime instead.
struct OutcomeGuard<T: ShadowTransport> {
    transport: Arc<T>,
    held: Vec<(String, SinkId)>,
}

impl<T: ShadowTransport> OutcomeGuard<T> {
    fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            held: Vec::with_capacity(2),
        }
    }

    fn track(&mut self, filter: &str, id: SinkId) {
        self.held.push((filter.to_string(), id));
    }

    async fn release(&mut self) {
        for (filter, id) in std::mem::take(&mut self.held) {
            if let Err(e) = self.transport.release(&filter, id).await {
                tracing::warn!(%filter, error = %e, "failed to release correlated subscription");
            }
        }
    }
}

impl<T: ShadowTransport> Drop for OutcomeGuard<T> {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }

        let held = std::mem::take(&mut self.held);
        let transport = Arc::clone(&self.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for (filter, id) in held {
                        if let Err(e) = transport.release(&filter, id).await {
                            tracing::warn!(%filter, error = %e, "failed to release correlated subscription");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    count = held.len(),
                    "correlated request dropped outside a runtime; subscriptions not released"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportCall};

    const REQUEST: &str = "$aws/things/t/shadow/get";
    const ACCEPTED: &str = "$aws/things/t/shadow/get/accepted";
    const REJECTED: &str = "$aws/things/t/shadow/get/rejected";

    fn request() -> CorrelatedRequest {
        CorrelatedRequest::new(REQUEST, ACCEPTED, REJECTED, Shadow::empty_request())
    }

    #[tokio::test]
    async fn accepted_answer_wins() {
        let transport = Arc::new(MockTransport::new());
        transport.reply_on(REQUEST, vec![(ACCEPTED.to_string(), Shadow::from("doc"))]);

        let outcome = request().execute(&transport, None).await.unwrap();
        assert_eq!(outcome, CorrelatedOutcome::Accepted(Shadow::from("doc")));
        assert_eq!(transport.total_sinks(), 0);
        assert!(transport.active_filters().is_empty());
    }

    #[tokio::test]
    async fn rejected_answer_is_an_outcome() {
        let transport = Arc::new(MockTransport::new());
        transport.reply_on(REQUEST, vec![(REJECTED.to_string(), Shadow::from("nope"))]);

        let outcome = request().execute(&transport, None).await.unwrap();
        assert_eq!(outcome, CorrelatedOutcome::Rejected(Shadow::from("nope")));
        assert_eq!(transport.total_sinks(), 0);
    }

    #[tokio::test]
    async fn subscribes_before_publishing() {
        let transport = Arc::new(MockTransport::new());
        transport.reply_on(REQUEST, vec![(ACCEPTED.to_string(), Shadow::from("{}"))]);

        request().execute(&transport, None).await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0], TransportCall::Subscribe(ACCEPTED.into()));
        assert_eq!(calls[1], TransportCall::Subscribe(REJECTED.into()));
        assert_eq!(
            calls[2],
            TransportCall::Publish {
                topic: REQUEST.into(),
                payload: Shadow::empty_request(),
            }
        );
        assert!(calls[3..].contains(&TransportCall::Unsubscribe(ACCEPTED.into())));
        assert!(calls[3..].contains(&TransportCall::Unsubscribe(REJECTED.into())));
    }

    #[tokio::test]
    async fn closed_sinks_resolve_as_channel_closed() {
        let transport = Arc::new(MockTransport::new());
        let task = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { request().execute(&transport, None).await })
        };

        while transport.total_sinks() < 2 {
            tokio::task::yield_now().await;
        }
        transport.close_all_sinks();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, CorrelatedOutcome::ChannelClosed);
        assert!(matches!(
            outcome.into_result(ShadowOperation::Get, ACCEPTED),
            Err(ShadowError::ChannelClosed { .. })
        ));
    }

    #[tokio::test]
    async fn deadline_releases_subscriptions() {
        let transport = Arc::new(MockTransport::new());

        let outcome = request()
            .with_timeout(Some(Duration::from_millis(20)))
            .execute(&transport, None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CorrelatedOutcome::DeadlineExceeded(Duration::from_millis(20))
        );
        assert_eq!(transport.total_sinks(), 0);
        assert!(transport.active_filters().is_empty());
    }

    #[tokio::test]
    async fn cancel_releases_subscriptions() {
        let transport = Arc::new(MockTransport::new());
        let token = CancelToken::new();

        let task = {
            let transport = Arc::clone(&transport);
            let token = token.clone();
            tokio::spawn(async move { request().execute(&transport, Some(&token)).await })
        };

        while transport.published(REQUEST).is_empty() {
            tokio::task::yield_now().await;
        }
        token.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, CorrelatedOutcome::Cancelled);
        assert_eq!(transport.total_sinks(), 0);
    }

    #[tokio::test]
    async fn publish_failure_releases_subscriptions() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_publish(REQUEST);

        let result = request().execute(&transport, None).await;
        assert!(matches!(result, Err(ShadowError::Publish { .. })));
        assert_eq!(transport.total_sinks(), 0);
        assert!(transport.active_filters().is_empty());
    }

    #[tokio::test]
    async fn second_subscribe_failure_releases_first() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_subscribe(REJECTED);

        let result = request().execute(&transport, None).await;
        assert!(matches!(result, Err(ShadowError::Subscribe { .. })));
        assert!(transport.published(REQUEST).is_empty());
        assert_eq!(transport.total_sinks(), 0);
        assert!(transport.active_filters().is_empty());
    }

    #[tokio::test]
    async fn release_failure_does_not_mask_outcome() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_unsubscribe(ACCEPTED);
        transport.reply_on(REQUEST, vec![(ACCEPTED.to_string(), Shadow::from("doc"))]);

        let outcome = request().execute(&transport, None).await.unwrap();
        assert_eq!(outcome, CorrelatedOutcome::Accepted(Shadow::from("doc")));
        assert_eq!(transport.total_sinks(), 0);
    }

    #[tokio::test]
    async fn dropped_request_releases_in_background() {
        let transport = Arc::new(MockTransport::new());
        let task = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { request().execute(&transport, None).await })
        };

        while transport.published(REQUEST).is_empty() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        for _ in 0..100 {
            if transport.total_sinks() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.total_sinks(), 0);
    }

    #[tokio::test]
    async fn unrelated_sinks_survive_release() {
        let transport = Arc::new(MockTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(ACCEPTED, tx).await.unwrap();
        transport.reply_on(REQUEST, vec![(ACCEPTED.to_string(), Shadow::from("doc"))]);

        request().execute(&transport, None).await.unwrap();

        assert_eq!(transport.sink_count(ACCEPTED), 1);
        assert_eq!(transport.active_filters(), vec![ACCEPTED.to_string()]);
        assert_eq!(rx.recv().await.unwrap(), Shadow::from("doc"));
    }
}
