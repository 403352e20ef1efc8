//! The shadow session.

use crate::cancel::CancelToken;
use crate::config::{SessionConfig, SessionOptions};
use crate::correlated::CorrelatedRequest;
use crate::durable::{DurableSubscription, ShadowChanges, ShadowStream};
use crate::error::{ShadowError, ShadowResult};
use crate::mqtt::MqttTransport;
use crate::transport::ShadowTransport;
use std::sync::Arc;
use thingshadow_protocol::{Shadow, ShadowOperation, ShadowTopic, ShadowTopics, ThingName};
use tokio::sync::Mutex;

/// A device's view of its shadow on the broker.
///
/// The session owns the transport for the thing it was created with. Get and
/// delete are correlated requests; updates and custom publishes complete
/// once the transport acknowledges them.
pub struct ShadowSession<T: ShadowTransport> {
    topics: ShadowTopics,
    transport: Arc<T>,
    options: SessionOptions,
    config: Option<SessionConfig>,
    /// Serializes correlated requests on the same topic pair.
    get_lock: Mutex<()>,
    delete_lock: Mutex<()>,
}

impl ShadowSession<MqttTransport> {
    /// Connects to the broker over mutual TLS.
    ///
    /// Resolves once the broker has accepted the connection.
    pub async fn connect(config: SessionConfig) -> ShadowResult<Self> {
        let transport = MqttTransport::connect(&config).await?;
        tracing::info!(
            thing = %config.thing_name,
            broker = %config.broker_url(),
            "shadow session connected"
        );

        let mut session = Self::with_transport(
            config.thing_name.clone(),
            transport,
            config.options.clone(),
        );
        session.config = Some(config);
        Ok(session)
    }
}

impl<T: ShadowTransport> ShadowSession<T> {
    /// Creates a session over an existing transport.
    pub fn with_transport(thing: ThingName, transport: T, options: SessionOptions) -> Self {
        Self::with_shared_transport(thing, Arc::new(transport), options)
    }

    /// Creates a session over a transport shared with the caller.
    pub fn with_shared_transport(
        thing: ThingName,
        transport: Arc<T>,
        options: SessionOptions,
    ) -> Self {
        Self {
            topics: ShadowTopics::new(thing),
            transport,
            options,
            config: None,
            get_lock: Mutex::new(()),
            delete_lock: Mutex::new(()),
        }
    }

    /// Returns the thing name.
    pub fn thing_name(&self) -> &ThingName {
        self.topics.thing_name()
    }

    /// Returns the topic derivation for this thing.
    pub fn topics(&self) -> &ShadowTopics {
        &self.topics
    }

    /// Returns the session options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns the connection configuration, if the session was connected
    /// with [`ShadowSession::connect`].
    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Checks if the session is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Disconnects from the broker. Every open stream ends.
    ///
    /// Calling this more than once is a no-op.
    pub async fn disconnect(&self) -> ShadowResult<()> {
        let was_connected = self.transport.is_connected();
        self.transport.disconnect().await?;
        if was_connected {
            tracing::info!(thing = %self.thing_name(), "shadow session disconnected");
        }
        Ok(())
    }

    /// Fetches the current shadow document.
    ///
    /// A rejection (for example, no shadow exists) is returned as
    /// [`ShadowError::Rejected`] carrying the service's payload.
    pub async fn get_shadow(&self) -> ShadowResult<Shadow> {
        self.correlated(ShadowOperation::Get, None).await
    }

    /// Like [`ShadowSession::get_shadow`], but stops waiting once `cancel`
    /// fires.
    pub async fn get_shadow_with(&self, cancel: &CancelToken) -> ShadowResult<Shadow> {
        self.correlated(ShadowOperation::Get, Some(cancel)).await
    }

    /// Deletes the shadow document and returns the service's answer.
    pub async fn delete_shadow(&self) -> ShadowResult<Shadow> {
        self.correlated(ShadowOperation::Delete, None).await
    }

    /// Like [`ShadowSession::delete_shadow`], but stops waiting once
    /// `cancel` fires.
    pub async fn delete_shadow_with(&self, cancel: &CancelToken) -> ShadowResult<Shadow> {
        self.correlated(ShadowOperation::Delete, Some(cancel)).await
    }

    /// Publishes a partial document to the update topic.
    ///
    /// The service answers asynchronously on the streams returned by
    /// [`ShadowSession::subscribe_to_shadow_changes`].
    pub async fn update_shadow(&self, payload: impl Into<Shadow>) -> ShadowResult<()> {
        let topic = self.topics.request(ShadowOperation::Update);
        self.transport.publish(&topic, payload.into()).await
    }

    /// Publishes to the update/documents topic.
    pub async fn update_shadow_document(&self, payload: impl Into<Shadow>) -> ShadowResult<()> {
        let topic = self.topics.topic(ShadowTopic::UpdateDocuments);
        self.transport.publish(&topic, payload.into()).await
    }

    /// Subscribes to every accepted and rejected update.
    pub async fn subscribe_to_shadow_changes(&self) -> ShadowResult<ShadowChanges> {
        let accepted_topic = self.topics.accepted(ShadowOperation::Update);
        let rejected_topic = self.topics.rejected(ShadowOperation::Update);

        let accepted = DurableSubscription::new(accepted_topic)
            .open(self.transport.as_ref())
            .await?;

        let rejected = match DurableSubscription::new(rejected_topic)
            .open(self.transport.as_ref())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                if let Err(release) = self
                    .transport
                    .release(accepted.filter(), accepted.sink_id())
                    .await
                {
                    tracing::warn!(error = %release, "failed to release update/accepted");
                }
                return Err(e);
            }
        };

        Ok(ShadowChanges { accepted, rejected })
    }

    /// Subscribes to a custom topic below this thing.
    ///
    /// `+` and `#` are accepted when they occupy a whole level. Suffixes
    /// under `shadow/get` and `shadow/delete` are refused.
    pub async fn subscribe_to_topic(&self, suffix: &str) -> ShadowResult<ShadowStream> {
        let filter = self.topics.custom_filter(suffix)?;
        DurableSubscription::new(filter)
            .open(self.transport.as_ref())
            .await
    }

    /// Publishes to a custom topic below this thing.
    pub async fn publish_to_topic(&self, payload: impl Into<Shadow>, suffix: &str) -> ShadowResult<()> {
        let topic = self.topics.custom(suffix)?;
        self.transport.publish(&topic, payload.into()).await
    }

    /// Unsubscribes from a custom topic.
    ///
    /// Every stream on that topic ends, including streams opened by other
    /// callers. Streams from [`ShadowSession::subscribe_to_shadow_changes`]
    /// end too when given `shadow/update/accepted` or
    /// `shadow/update/rejected`; get and delete answers are out of reach.
    pub async fn unsubscribe_from_topic(&self, suffix: &str) -> ShadowResult<()> {
        let filter = self.topics.custom_filter(suffix)?;
        self.transport.unsubscribe(&filter).await
    }

    async fn correlated(
        &self,
        operation: ShadowOperation,
        cancel: Option<&CancelToken>,
    ) -> ShadowResult<Shadow> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(ShadowError::Cancelled);
        }

        let lock = match operation {
            ShadowOperation::Delete => &self.delete_lock,
            _ => &self.get_lock,
        };
        let _serial = lock.lock().await;

        let accepted = self.topics.accepted(operation);
        let outcome = CorrelatedRequest::new(
            self.topics.request(operation),
            accepted.clone(),
            self.topics.rejected(operation),
            Shadow::empty_request(),
        )
        .with_timeout(self.options.request_timeout)
        .execute(&self.transport, cancel)
        .await?;

        outcome.into_result(operation, &accepted)
    }
}

impl<T: ShadowTransport> std::fmt::Debug for ShadowSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowSession")
            .field("thing", self.thing_name())
            .field("connected", &self.is_connected())
            .finish()
    }
}
