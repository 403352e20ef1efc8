//! Integration tests for shadow sessions and the reference service.

use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thingshadow_broker::{BrokerConfig, ShadowService};
use thingshadow_session::{
    CancelToken, LoopbackBroker, LoopbackTransport, SessionOptions, Shadow, ShadowError,
    ShadowOperation, ShadowSession, ThingName,
};

/// A broker that routes publishes to an in-memory shadow service.
struct InMemoryBroker {
    service: Arc<ShadowService>,
}

impl InMemoryBroker {
    fn new(service: Arc<ShadowService>) -> Self {
        Self { service }
    }
}

impl LoopbackBroker for InMemoryBroker {
    fn handle_publish(&self, topic: &str, payload: &[u8]) -> Vec<(String, Vec<u8>)> {
        self.service.handle_publish(topic, payload)
    }
}

/// A broker that never answers.
struct SilentBroker;

impl LoopbackBroker for SilentBroker {
    fn handle_publish(&self, _topic: &str, _payload: &[u8]) -> Vec<(String, Vec<u8>)> {
        Vec::new()
    }
}

type Session = ShadowSession<LoopbackTransport<InMemoryBroker>>;

fn thing() -> ThingName {
    ThingName::new("test").unwrap()
}

fn session_with(service: Arc<ShadowService>) -> Session {
    ShadowSession::with_transport(
        thing(),
        LoopbackTransport::new(InMemoryBroker::new(service)),
        SessionOptions::new().with_request_timeout(Duration::from_secs(5)),
    )
}

fn session() -> (Session, Arc<ShadowService>) {
    let service = Arc::new(ShadowService::new(BrokerConfig::default()));
    (session_with(Arc::clone(&service)), service)
}

fn json(shadow: &Shadow) -> Value {
    serde_json::from_slice(shadow.as_bytes()).unwrap()
}

#[tokio::test]
async fn update_then_get_round_trip() {
    let (session, service) = session();
    let mut changes = session.subscribe_to_shadow_changes().await.unwrap();

    let payload = r#"{"state": {"reported": {"value": 42}}}"#;
    session.update_shadow(payload).await.unwrap();

    let accepted = changes.accepted.recv().await.unwrap();
    assert_eq!(accepted, Shadow::from(payload));

    let shadow = session.get_shadow().await.unwrap();
    assert_eq!(json(&shadow)["state"]["reported"]["value"], 42);
    assert_eq!(service.shadow("test").unwrap().version, 1);
}

#[tokio::test]
async fn invalid_json_lands_on_rejected_stream() {
    let (session, _service) = session();
    let mut changes = session.subscribe_to_shadow_changes().await.unwrap();

    // The publish itself succeeds; the service answers on update/rejected.
    session.update_shadow("invalid JSON").await.unwrap();

    let rejected = changes.rejected.recv().await.unwrap();
    assert_eq!(json(&rejected)["code"], 400);
    assert!(changes.accepted.try_recv().is_err());
}

#[tokio::test]
async fn get_without_shadow_is_rejected() {
    let (session, _service) = session();

    let err = session.get_shadow().await.unwrap_err();
    match err {
        ShadowError::Rejected { operation, payload } => {
            assert_eq!(operation, ShadowOperation::Get);
            assert_eq!(json(&payload)["code"], 404);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.transport().total_sinks(), 0);
}

#[tokio::test]
async fn delete_lifecycle() {
    let (session, service) = session();
    session
        .update_shadow(r#"{"state":{"desired":{"on":true}}}"#)
        .await
        .unwrap();

    let deleted = session.delete_shadow().await.unwrap();
    assert_eq!(json(&deleted)["version"], 1);
    assert_eq!(service.shadow_count(), 0);

    let err = session.delete_shadow().await.unwrap_err();
    assert_eq!(json(err.rejection().unwrap())["code"], 404);
}

#[tokio::test]
async fn concurrent_get_and_delete_do_not_cross() {
    let (session, _service) = session();
    session
        .update_shadow(r#"{"state":{"reported":{"value":7}}}"#)
        .await
        .unwrap();

    let (got, deleted) = tokio::join!(session.get_shadow(), session.delete_shadow());

    // Each call sees only answers on its own topic pair.
    let deleted = deleted.unwrap();
    assert!(json(&deleted).get("state").is_none());
    match got {
        Ok(shadow) => assert_eq!(json(&shadow)["state"]["reported"]["value"], 7),
        Err(ShadowError::Rejected { operation, payload }) => {
            assert_eq!(operation, ShadowOperation::Get);
            assert_eq!(json(&payload)["code"], 404);
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.transport().total_sinks(), 0);
}

#[tokio::test]
async fn concurrent_gets_all_resolve() {
    let (session, _service) = session();
    session
        .update_shadow(r#"{"state":{"reported":{"value":1}}}"#)
        .await
        .unwrap();
    let session = Arc::new(session);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.get_shadow().await })
        })
        .collect();

    for task in tasks {
        let shadow = task.await.unwrap().unwrap();
        assert_eq!(json(&shadow)["version"], 1);
    }
    assert_eq!(session.transport().total_sinks(), 0);
}

#[tokio::test]
async fn update_document_reaches_subscribers() {
    let service = Arc::new(ShadowService::new(
        BrokerConfig::default().with_publish_documents(false),
    ));
    let session = session_with(service);
    let mut documents = session
        .subscribe_to_topic("shadow/update/documents")
        .await
        .unwrap();

    let document = r#"{"state": {"reported": {"value": 1700000000}}}"#;
    session.update_shadow_document(document).await.unwrap();

    assert_eq!(documents.recv().await.unwrap(), Shadow::from(document));
}

#[tokio::test]
async fn service_publishes_documents_after_update() {
    let (session, _service) = session();
    let mut documents = session
        .subscribe_to_topic("shadow/update/documents")
        .await
        .unwrap();

    session
        .update_shadow(r#"{"state":{"reported":{"value":3}}}"#)
        .await
        .unwrap();

    let doc = json(&documents.recv().await.unwrap());
    assert_eq!(doc["current"]["state"]["reported"]["value"], 3);
    assert!(doc["previous"].is_null());
}

#[tokio::test]
async fn custom_topic_round_trip() {
    let (session, _service) = session();
    let mut fancy = session.subscribe_to_topic("fancy").await.unwrap();

    let payload = Shadow::from(r#"{"state":{"reported":{"yo":true}}}"#);
    session.publish_to_topic(payload.clone(), "fancy").await.unwrap();

    assert_eq!(fancy.recv().await.unwrap(), payload);
}

#[tokio::test]
async fn unsubscribe_ends_every_stream_on_topic() {
    let (session, _service) = session();
    let mut first = session.subscribe_to_topic("fancy").await.unwrap();
    let mut second = session.subscribe_to_topic("fancy").await.unwrap();

    session.unsubscribe_from_topic("fancy").await.unwrap();
    session.publish_to_topic("late", "fancy").await.unwrap();

    assert!(first.recv().await.is_none());
    assert!(second.recv().await.is_none());
}

#[tokio::test]
async fn silent_service_hits_deadline() {
    let session = ShadowSession::with_transport(
        thing(),
        LoopbackTransport::new(SilentBroker),
        SessionOptions::new().with_request_timeout(Duration::from_millis(50)),
    );

    let err = session.delete_shadow().await.unwrap_err();
    assert!(matches!(
        err,
        ShadowError::DeadlineExceeded {
            operation: ShadowOperation::Delete,
            ..
        }
    ));
    assert_eq!(session.transport().total_sinks(), 0);
}

#[tokio::test]
async fn cancel_stops_waiting() {
    let session = Arc::new(ShadowSession::with_transport(
        thing(),
        LoopbackTransport::new(SilentBroker),
        SessionOptions::new().without_request_timeout(),
    ));
    let token = CancelToken::new();

    let task = {
        let session = Arc::clone(&session);
        let token = token.clone();
        tokio::spawn(async move { session.get_shadow_with(&token).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ShadowError::Cancelled)));
    assert_eq!(session.transport().total_sinks(), 0);
}

#[tokio::test]
async fn disconnect_ends_streams() {
    let (session, _service) = session();
    let mut changes = session.subscribe_to_shadow_changes().await.unwrap();

    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();

    assert!(!session.is_connected());
    assert!(changes.accepted.recv().await.is_none());
    assert!(changes.rejected.recv().await.is_none());
    assert!(matches!(
        session.update_shadow("{}").await,
        Err(ShadowError::NotConnected)
    ));
}

proptest! {
    #[test]
    fn custom_payloads_are_delivered_verbatim(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (session, _service) = session();
            let mut stream = session.subscribe_to_topic("raw").await.unwrap();

            session.publish_to_topic(bytes.clone(), "raw").await.unwrap();
            let received = stream.recv().await.unwrap();
            assert_eq!(received.as_bytes(), bytes.as_slice());
        });
    }

    #[test]
    fn accepted_updates_echo_the_request(value in "[a-zA-Z0-9 ]{0,64}", n in any::<i64>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let request = serde_json::json!({
            "state": {"reported": {"text": value, "n": n}}
        })
        .to_string();

        runtime.block_on(async {
            let (session, _service) = session();
            let mut changes = session.subscribe_to_shadow_changes().await.unwrap();

            session.update_shadow(request.clone()).await.unwrap();
            let accepted = changes.accepted.recv().await.unwrap();
            assert_eq!(accepted.as_bytes(), request.as_bytes());
        });
    }
}
