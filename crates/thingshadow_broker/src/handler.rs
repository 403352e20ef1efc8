//! Request handlers for the reserved shadow topics.

use crate::config::BrokerConfig;
use crate::error::{BrokerResult, Rejection};
use crate::store::{SectionPatch, ShadowDocument, ShadowStore};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thingshadow_protocol::{ShadowOperation, ShadowTopic};

/// A message the service publishes in response to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reserved topic, relative to the requesting thing.
    pub topic: ShadowTopic,
    /// JSON body.
    pub body: Vec<u8>,
}

/// Context for request handling.
pub struct HandlerContext {
    /// Service configuration.
    pub config: BrokerConfig,
    /// Shadow documents (shared across all handlers).
    pub store: Arc<ShadowStore>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: BrokerConfig, store: Arc<ShadowStore>) -> Self {
        Self { config, store }
    }
}

/// Handler for shadow requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument<'a> {
    state: Value,
    version: u64,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_token: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteDocument<'a> {
    version: u64,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_token: Option<&'a str>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a publish to one of the request topics.
    ///
    /// Returns nothing for topics the service does not answer.
    pub fn handle(&self, thing: &str, topic: ShadowTopic, payload: &[u8]) -> Vec<Reply> {
        let operation = match topic {
            ShadowTopic::Get => ShadowOperation::Get,
            ShadowTopic::Update => ShadowOperation::Update,
            ShadowTopic::Delete => ShadowOperation::Delete,
            _ => return Vec::new(),
        };

        let client_token = client_token(payload);
        let timestamp = unix_timestamp();

        let result = match operation {
            ShadowOperation::Get => self.handle_get(thing, client_token.as_deref(), timestamp),
            ShadowOperation::Update => {
                self.handle_update(thing, payload, client_token.as_deref(), timestamp)
            }
            ShadowOperation::Delete => {
                self.handle_delete(thing, client_token.as_deref(), timestamp)
            }
        };

        match result {
            Ok(replies) => replies,
            Err(rejection) => {
                tracing::debug!(thing, %operation, code = rejection.code(), "request rejected");
                vec![Reply {
                    topic: operation.rejected_topic(),
                    body: rejection.to_document(client_token.as_deref(), timestamp),
                }]
            }
        }
    }

    /// Handles a get request.
    pub fn handle_get(
        &self,
        thing: &str,
        client_token: Option<&str>,
        timestamp: u64,
    ) -> BrokerResult<Vec<Reply>> {
        let document = self
            .context
            .store
            .get(thing)
            .ok_or_else(|| Rejection::NotFound(thing.to_string()))?;

        Ok(vec![Reply {
            topic: ShadowTopic::GetAccepted,
            body: state_document(&document, client_token, timestamp),
        }])
    }

    /// Handles an update request.
    ///
    /// The accepted reply echoes the request unchanged.
    pub fn handle_update(
        &self,
        thing: &str,
        payload: &[u8],
        client_token: Option<&str>,
        timestamp: u64,
    ) -> BrokerResult<Vec<Reply>> {
        let max = self.context.config.max_document_size;
        if payload.len() > max {
            return Err(Rejection::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        let request: Value = serde_json::from_slice(payload)
            .map_err(|_| Rejection::BadRequest("Invalid JSON".into()))?;
        let Some(state) = request.get("state") else {
            return Err(Rejection::BadRequest("Missing required node: state".into()));
        };
        let Value::Object(state) = state else {
            return Err(Rejection::BadRequest("State node must be an object".into()));
        };

        let desired = SectionPatch::parse("desired", state.get("desired"))?;
        let reported = SectionPatch::parse("reported", state.get("reported"))?;
        if desired == SectionPatch::Keep && reported == SectionPatch::Keep {
            return Err(Rejection::BadRequest("State contains an invalid node".into()));
        }

        let expected_version = match request.get("version") {
            None => None,
            Some(version) => Some(version.as_u64().ok_or_else(|| {
                Rejection::BadRequest("Invalid version: must be a non-negative integer".into())
            })?),
        };

        let (previous, current) =
            self.context
                .store
                .update(thing, &desired, &reported, expected_version)?;
        tracing::debug!(thing, version = current.version, "shadow updated");

        let mut replies = vec![Reply {
            topic: ShadowTopic::UpdateAccepted,
            body: payload.to_vec(),
        }];

        if self.context.config.publish_documents {
            let previous = previous.map(|doc| json!({"state": doc.state(), "version": doc.version}));
            let documents = json!({
                "previous": previous,
                "current": {"state": current.state(), "version": current.version},
                "timestamp": timestamp,
            });
            replies.push(Reply {
                topic: ShadowTopic::UpdateDocuments,
                body: documents.to_string().into_bytes(),
            });
        }

        Ok(replies)
    }

    /// Handles a delete request.
    pub fn handle_delete(
        &self,
        thing: &str,
        client_token: Option<&str>,
        timestamp: u64,
    ) -> BrokerResult<Vec<Reply>> {
        let removed = self.context.store.delete(thing)?;
        tracing::debug!(thing, version = removed.version, "shadow deleted");

        let document = DeleteDocument {
            version: removed.version,
            timestamp,
            client_token,
        };
        Ok(vec![Reply {
            topic: ShadowTopic::DeleteAccepted,
            body: serde_json::to_vec(&document).unwrap_or_default(),
        }])
    }
}

fn state_document(document: &ShadowDocument, client_token: Option<&str>, timestamp: u64) -> Vec<u8> {
    let body = StateDocument {
        state: document.state(),
        version: document.version,
        timestamp,
        client_token,
    };
    serde_json::to_vec(&body).unwrap_or_default()
}

/// Extracts `clientToken` from a JSON request, if there is one.
fn client_token(payload: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    value.get("clientToken")?.as_str().map(str::to_string)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
