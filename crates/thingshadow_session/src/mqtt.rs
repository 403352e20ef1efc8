//! MQTT transport over mutual TLS.
//!
//! A dispatch task owns the rumqttc event loop. It routes inbound PUBLISH
//! packets to subscriber sinks and matches SUBACK, PUBACK and UNSUBACK to
//! the callers waiting on them.
//!
//! rumqttc assigns packet ids inside the event loop, so callers cannot know
//! theirs up front. Requests of one kind are sent in FIFO order under a
//! lock; the n-th outgoing SUBSCRIBE therefore belongs to the n-th queued
//! subscriber, and from then on its packet id identifies the waiter.
//!
//! When the connection drops, rumqttc keeps unsent requests and unacked
//! QoS 1 publishes and replays them after reconnecting. Their waiters stay
//! where they are so the replayed packets line up with them again; only
//! in-flight SUBSCRIBE and UNSUBSCRIBE packets, which are not replayed, are
//! failed.

use crate::config::{Qos, SessionConfig};
use crate::error::{ShadowError, ShadowResult};
use crate::router::{MessageSink, SinkId, SubscriptionRouter};
use crate::transport::ShadowTransport;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thingshadow_protocol::Shadow;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
        }
    }
}

/// Kind of acknowledged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AckKind {
    Subscribe,
    Publish,
    Unsubscribe,
}

type AckResult = Result<(), String>;

#[derive(Debug, Default)]
struct AckState {
    queued: HashMap<AckKind, VecDeque<oneshot::Sender<AckResult>>>,
    inflight: HashMap<(AckKind, u16), oneshot::Sender<AckResult>>,
}

/// Correlates acknowledgements with waiting callers.
#[derive(Debug, Default)]
struct AckTracker {
    state: Mutex<AckState>,
}

impl AckTracker {
    /// Queues a waiter for the next outgoing packet of `kind`.
    fn enqueue(&self, kind: AckKind) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().queued.entry(kind).or_default().push_back(tx);
        rx
    }

    /// Removes the most recently queued waiter of `kind`.
    fn cancel_last(&self, kind: AckKind) {
        if let Some(queue) = self.state.lock().queued.get_mut(&kind) {
            queue.pop_back();
        }
    }

    /// Records that a packet of `kind` went out with `pkid`.
    fn on_outgoing(&self, kind: AckKind, pkid: u16) {
        let mut state = self.state.lock();

        // Retransmission of a publish that is still waiting for its PUBACK.
        if pkid != 0 && state.inflight.contains_key(&(kind, pkid)) {
            return;
        }

        let Some(waiter) = state.queued.get_mut(&kind).and_then(VecDeque::pop_front) else {
            return;
        };

        // QoS 0 publishes have no id and no acknowledgement.
        if pkid == 0 {
            let _ = waiter.send(Ok(()));
        } else {
            state.inflight.insert((kind, pkid), waiter);
        }
    }

    /// Completes the waiter for an acknowledged packet.
    fn complete(&self, kind: AckKind, pkid: u16, result: AckResult) {
        if let Some(waiter) = self.state.lock().inflight.remove(&(kind, pkid)) {
            let _ = waiter.send(result);
        }
    }

    /// Fails the waiters whose packets will not be replayed after reconnect.
    ///
    /// Queued requests and in-flight publishes are resent by the event loop
    /// and keep their waiters.
    fn on_connection_lost(&self, reason: &str) {
        let mut state = self.state.lock();
        let lost: Vec<_> = state
            .inflight
            .keys()
            .filter(|(kind, _)| *kind != AckKind::Publish)
            .copied()
            .collect();
        for key in lost {
            if let Some(waiter) = state.inflight.remove(&key) {
                let _ = waiter.send(Err(reason.to_string()));
            }
        }
    }

    /// Fails every queued and in-flight waiter.
    fn fail_all(&self, reason: &str) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let queued = state.queued.drain().flat_map(|(_, queue)| queue);
        let inflight = state.inflight.drain().map(|(_, waiter)| waiter);
        for waiter in queued.chain(inflight).collect::<Vec<_>>() {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        let state = self.state.lock();
        state.queued.values().map(VecDeque::len).sum::<usize>() + state.inflight.len()
    }
}

/// SUBACK outcome, published once the first subscriber's packet is answered.
type SubackState = watch::Receiver<Option<AckResult>>;

struct PendingSubscribe {
    result: watch::Sender<Option<AckResult>>,
    /// Sinks attached while the SUBSCRIBE was unanswered.
    joined: Vec<SinkId>,
}

/// Filters whose SUBSCRIBE is still waiting for its SUBACK.
///
/// Callers attaching to such a filter share the first caller's outcome
/// instead of succeeding on attach.
#[derive(Default)]
struct PendingSubscribes {
    filters: Mutex<HashMap<String, PendingSubscribe>>,
}

impl PendingSubscribes {
    fn open(&self, filter: &str) {
        let (result, _) = watch::channel(None);
        self.filters.lock().insert(
            filter.to_string(),
            PendingSubscribe {
                result,
                joined: Vec::new(),
            },
        );
    }

    fn join(&self, filter: &str, id: SinkId) -> Option<SubackState> {
        let mut filters = self.filters.lock();
        let pending = filters.get_mut(filter)?;
        pending.joined.push(id);
        Some(pending.result.subscribe())
    }

    fn leave(&self, filter: &str, id: SinkId) {
        if let Some(pending) = self.filters.lock().get_mut(filter) {
            pending.joined.retain(|joined| *joined != id);
        }
    }

    /// Publishes the outcome and returns the sinks that joined meanwhile.
    fn resolve(&self, filter: &str, result: AckResult) -> Vec<SinkId> {
        let Some(pending) = self.filters.lock().remove(filter) else {
            return Vec::new();
        };
        pending.result.send_replace(Some(result));
        pending.joined
    }

    fn joined(&self, filter: &str) -> Vec<SinkId> {
        self.filters
            .lock()
            .get(filter)
            .map(|pending| pending.joined.clone())
            .unwrap_or_default()
    }
}

/// State shared between the transport and its dispatch task.
struct Shared {
    client: AsyncClient,
    qos: QoS,
    router: SubscriptionRouter,
    acks: AckTracker,
    subacks: PendingSubscribes,
    /// Held while queuing a waiter and handing the packet to the client.
    request_lock: tokio::sync::Mutex<()>,
    connected: AtomicBool,
    closing: AtomicBool,
}

impl Shared {
    fn new(client: AsyncClient, qos: QoS) -> Arc<Self> {
        Arc::new(Self {
            client,
            qos,
            router: SubscriptionRouter::new(),
            acks: AckTracker::default(),
            subacks: PendingSubscribes::default(),
            request_lock: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        })
    }

    /// Detaches every sink waiting on a failed SUBSCRIBE, then wakes them.
    ///
    /// Callers hold `request_lock`, so nobody attaches in between.
    fn abandon_subscribe(&self, filter: &str, first: SinkId, reason: &str) {
        for id in std::iter::once(first).chain(self.subacks.joined(filter)) {
            self.router.detach(filter, id);
        }
        self.subacks.resolve(filter, Err(reason.to_string()));
    }
}

/// Fails a first subscriber's pending SUBSCRIBE if its caller goes away.
struct SubscribeGuard {
    shared: Arc<Shared>,
    filter: String,
    id: SinkId,
    armed: bool,
}

impl SubscribeGuard {
    fn new(shared: &Arc<Shared>, filter: &str, id: SinkId) -> Self {
        shared.subacks.open(filter);
        Self {
            shared: Arc::clone(shared),
            filter: filter.to_string(),
            id,
            armed: true,
        }
    }

    fn succeed(mut self) {
        self.armed = false;
        self.shared.subacks.resolve(&self.filter, Ok(()));
    }

    /// Must be called with `request_lock` held.
    fn fail(mut self, reason: &str) {
        self.armed = false;
        self.shared.abandon_subscribe(&self.filter, self.id, reason);
    }
}

impl Drop for SubscribeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let filter = std::mem::take(&mut self.filter);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _request = shared.request_lock.lock().await;
                    shared.abandon_subscribe(&filter, id, "subscribe abandoned");
                });
            }
            Err(_) => shared.abandon_subscribe(&filter, id, "subscribe abandoned"),
        }
    }
}

/// How a subscribe call learns about its SUBACK.
enum SubscribeAck {
    /// This call sent the SUBSCRIBE.
    Own(oneshot::Receiver<AckResult>, SubscribeGuard),
    /// Another call's SUBSCRIBE for the same filter is unanswered.
    Shared(SubackState),
}

/// A [`ShadowTransport`] backed by an MQTT connection.
pub struct MqttTransport {
    shared: Arc<Shared>,
    ack_timeout: Duration,
    disconnect_grace: Duration,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Connects and waits for CONNACK.
    pub async fn connect(config: &SessionConfig) -> ShadowResult<Self> {
        let tls = config.tls.client_config()?;

        let mut options = MqttOptions::new(
            config.thing_name.as_str(),
            config.endpoint.as_str(),
            config.port,
        );
        options
            .set_keep_alive(config.keep_alive)
            .set_clean_session(config.clean_session)
            .set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(tls)));

        let (client, mut eventloop) = AsyncClient::new(options, config.request_capacity);

        tracing::debug!(broker = %config.broker_url(), "connecting");
        match tokio::time::timeout(config.connect_timeout, wait_for_connack(&mut eventloop)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ShadowError::Connection(format!(
                    "no CONNACK from {} within {:?}",
                    config.broker_url(),
                    config.connect_timeout
                )))
            }
        }

        let shared = Shared::new(client, config.qos.into());
        let dispatch = tokio::spawn(run_dispatch(
            eventloop,
            Arc::clone(&shared),
            config.reconnect_interval,
        ));

        Ok(Self {
            shared,
            ack_timeout: config.ack_timeout,
            disconnect_grace: config.disconnect_grace,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    fn ensure_connected(&self) -> ShadowResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ShadowError::NotConnected)
        }
    }

    async fn wait_ack(
        &self,
        topic: &str,
        ack: oneshot::Receiver<AckResult>,
        refused: impl FnOnce(String) -> ShadowError,
    ) -> ShadowResult<()> {
        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(refused(reason)),
            Ok(Err(_)) => Err(ShadowError::Connection(format!(
                "connection closed before {topic} was acknowledged"
            ))),
            Err(_) => Err(ShadowError::AckTimeout {
                topic: topic.to_string(),
                timeout: self.ack_timeout,
            }),
        }
    }

    /// Waits for the SUBACK of a SUBSCRIBE another caller sent.
    async fn wait_shared_suback(
        &self,
        filter: &str,
        id: SinkId,
        mut state: SubackState,
    ) -> ShadowResult<SinkId> {
        let outcome = match tokio::time::timeout(self.ack_timeout, state.wait_for(Option::is_some))
            .await
        {
            Ok(Ok(current)) => current.clone(),
            Ok(Err(_)) => Some(Err("subscribe abandoned".to_string())),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(())) => Ok(id),
            // The first subscriber already detached this sink.
            Some(Err(reason)) => Err(ShadowError::Subscribe {
                topic: filter.to_string(),
                reason,
            }),
            None => {
                let _request = self.shared.request_lock.lock().await;
                self.shared.subacks.leave(filter, id);
                self.shared.router.detach(filter, id);
                Err(ShadowError::AckTimeout {
                    topic: filter.to_string(),
                    timeout: self.ack_timeout,
                })
            }
        }
    }

    async fn send_unsubscribe(&self, filter: &str) -> ShadowResult<oneshot::Receiver<AckResult>> {
        let shared = &self.shared;
        let ack = shared.acks.enqueue(AckKind::Unsubscribe);
        if let Err(e) = shared.client.unsubscribe(filter).await {
            shared.acks.cancel_last(AckKind::Unsubscribe);
            return Err(ShadowError::Unsubscribe {
                topic: filter.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(ack)
    }

    async fn finish_unsubscribe(
        &self,
        filter: &str,
        ack: oneshot::Receiver<AckResult>,
    ) -> ShadowResult<()> {
        self.wait_ack(filter, ack, |reason| ShadowError::Unsubscribe {
            topic: filter.to_string(),
            reason,
        })
        .await?;
        tracing::debug!(filter, "unsubscribed");
        Ok(())
    }
}

impl ShadowTransport for MqttTransport {
    async fn subscribe(&self, filter: &str, sink: MessageSink) -> ShadowResult<SinkId> {
        self.ensure_connected()?;
        let shared = &self.shared;

        let (id, ack) = {
            let _request = shared.request_lock.lock().await;
            let (id, first) = shared.router.attach(filter, sink);
            if first {
                let guard = SubscribeGuard::new(shared, filter, id);
                let ack = shared.acks.enqueue(AckKind::Subscribe);
                if let Err(e) = shared.client.subscribe(filter, shared.qos).await {
                    shared.acks.cancel_last(AckKind::Subscribe);
                    let reason = e.to_string();
                    guard.fail(&reason);
                    return Err(ShadowError::Subscribe {
                        topic: filter.to_string(),
                        reason,
                    });
                }
                (id, SubscribeAck::Own(ack, guard))
            } else {
                match shared.subacks.join(filter, id) {
                    Some(state) => (id, SubscribeAck::Shared(state)),
                    None => return Ok(id),
                }
            }
        };

        let (ack, guard) = match ack {
            SubscribeAck::Own(ack, guard) => (ack, guard),
            SubscribeAck::Shared(state) => return self.wait_shared_suback(filter, id, state).await,
        };

        let result = self
            .wait_ack(filter, ack, |reason| ShadowError::Subscribe {
                topic: filter.to_string(),
                reason,
            })
            .await;
        match result {
            Ok(()) => {
                guard.succeed();
                tracing::debug!(filter, "subscribed");
                Ok(id)
            }
            Err(e) => {
                let _request = shared.request_lock.lock().await;
                guard.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn release(&self, filter: &str, id: SinkId) -> ShadowResult<()> {
        let ack = {
            let _request = self.shared.request_lock.lock().await;
            if !self.shared.router.detach(filter, id) || !self.is_connected() {
                return Ok(());
            }
            self.send_unsubscribe(filter).await?
        };
        self.finish_unsubscribe(filter, ack).await
    }

    async fn unsubscribe(&self, filter: &str) -> ShadowResult<()> {
        self.ensure_connected()?;
        let ack = {
            let _request = self.shared.request_lock.lock().await;
            let closed = self.shared.router.detach_all(filter);
            tracing::debug!(filter, sinks = closed, "closing subscription");
            self.send_unsubscribe(filter).await?
        };
        self.finish_unsubscribe(filter, ack).await
    }

    async fn publish(&self, topic: &str, payload: Shadow) -> ShadowResult<()> {
        self.ensure_connected()?;
        let shared = &self.shared;
        let len = payload.len();

        let ack = {
            let _request = shared.request_lock.lock().await;
            let ack = shared.acks.enqueue(AckKind::Publish);
            let sent = shared
                .client
                .publish_bytes(topic, shared.qos, false, payload.into_bytes())
                .await;
            if let Err(e) = sent {
                shared.acks.cancel_last(AckKind::Publish);
                return Err(ShadowError::Publish {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
            ack
        };

        self.wait_ack(topic, ack, |reason| ShadowError::Publish {
            topic: topic.to_string(),
            reason,
        })
        .await?;
        tracing::debug!(topic, bytes = len, "published");
        Ok(())
    }

    async fn disconnect(&self) -> ShadowResult<()> {
        let shared = &self.shared;
        if shared.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = shared.client.disconnect().await {
            tracing::warn!(error = %e, "failed to send DISCONNECT");
        }

        let dispatch = self.dispatch.lock().take();
        if let Some(mut dispatch) = dispatch {
            if tokio::time::timeout(self.disconnect_grace, &mut dispatch)
                .await
                .is_err()
            {
                dispatch.abort();
            }
        }

        shared.connected.store(false, Ordering::SeqCst);
        shared.router.clear();
        shared.acks.fail_all("disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && !self.shared.closing.load(Ordering::SeqCst)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(dispatch) = self.dispatch.lock().take() {
            dispatch.abort();
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> ShadowResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ShadowError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(ShadowError::Connection(e.to_string())),
        }
    }
}

async fn run_dispatch(mut eventloop: EventLoop, shared: Arc<Shared>, reconnect_interval: Duration) {
    loop {
        match eventloop.poll().await {
            Ok(event) => {
                if !handle_event(&shared, event) {
                    break;
                }
            }
            Err(e) => {
                if shared.closing.load(Ordering::SeqCst) {
                    break;
                }
                connection_lost(&shared, &e.to_string());
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.acks.fail_all("dispatch stopped");
    tracing::debug!("dispatch task stopped");
}

fn connection_lost(shared: &Shared, reason: &str) {
    if shared.connected.swap(false, Ordering::SeqCst) {
        tracing::warn!(error = reason, "connection lost, reconnecting");
    }
    shared.acks.on_connection_lost(reason);
}

/// Applies one event-loop event. Returns false once the loop should stop.
fn handle_event(shared: &Arc<Shared>, event: Event) -> bool {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            let delivered = shared
                .router
                .dispatch(&publish.topic, &Shadow::new(publish.payload));
            tracing::trace!(topic = %publish.topic, delivered, "message received");
        }
        Event::Incoming(Packet::SubAck(ack)) => {
            let refused = ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure));
            let result = if refused {
                Err("broker refused subscription".to_string())
            } else {
                Ok(())
            };
            shared.acks.complete(AckKind::Subscribe, ack.pkid, result);
        }
        Event::Incoming(Packet::PubAck(ack)) => {
            shared.acks.complete(AckKind::Publish, ack.pkid, Ok(()));
        }
        Event::Incoming(Packet::UnsubAck(ack)) => {
            shared.acks.complete(AckKind::Unsubscribe, ack.pkid, Ok(()));
        }
        Event::Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                shared.connected.store(true, Ordering::SeqCst);
                tracing::info!("reconnected");
                tokio::spawn(resubscribe(Arc::clone(shared)));
            }
        }
        Event::Outgoing(Outgoing::Subscribe(pkid)) => {
            shared.acks.on_outgoing(AckKind::Subscribe, pkid);
        }
        Event::Outgoing(Outgoing::Publish(pkid)) => {
            shared.acks.on_outgoing(AckKind::Publish, pkid);
        }
        Event::Outgoing(Outgoing::Unsubscribe(pkid)) => {
            shared.acks.on_outgoing(AckKind::Unsubscribe, pkid);
        }
        Event::Outgoing(Outgoing::Disconnect) if shared.closing.load(Ordering::SeqCst) => {
            return false;
        }
        _ => {}
    }
    true
}

/// Restores every routed filter after the broker dropped our session.
async fn resubscribe(shared: Arc<Shared>) {
    let _request = shared.request_lock.lock().await;
    for filter in shared.router.filters() {
        // Nobody waits on these; the SUBACK completes a dropped receiver.
        let _ack = shared.acks.enqueue(AckKind::Subscribe);
        if let Err(e) = shared.client.subscribe(filter.as_str(), shared.qos).await {
            shared.acks.cancel_last(AckKind::Subscribe);
            tracing::warn!(%filter, error = %e, "failed to restore subscription");
        }
    }
}
