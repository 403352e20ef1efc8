//! # thingshadow session
//!
//! Device shadow client over MQTT with mutual TLS.
//!
//! This crate provides:
//! - `ShadowSession` for get/update/delete and change notifications
//! - Correlated requests over accepted/rejected topic pairs
//! - Durable subscriptions to reserved and custom topics
//! - A transport abstraction with MQTT, loopback and mock implementations
//! - Certificate loading for mutual TLS
//!
//! ## Architecture
//!
//! The shadow service answers requests on topics, not on the request
//! itself. A get is therefore three steps:
//! 1. Subscribe to `get/accepted` and `get/rejected`
//! 2. Publish `{}` to `get`
//! 3. Wait for the first message on either topic, then unsubscribe both
//!
//! ## Key Invariants
//!
//! - Outcome subscriptions exist before the trigger is published
//! - Outcome subscriptions are released on every exit path
//! - Payloads are passed through byte for byte
//! - Dispatch never blocks on a slow consumer

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod correlated;
mod durable;
mod error;
mod loopback;
mod mqtt;
mod router;
mod session;
mod tls;
mod transport;

pub use cancel::CancelToken;
pub use config::{Qos, SessionConfig, SessionOptions, DEFAULT_PORT};
pub use correlated::{CorrelatedOutcome, CorrelatedRequest};
pub use durable::{DurableSubscription, ShadowChanges, ShadowStream};
pub use error::{ShadowError, ShadowResult};
pub use loopback::{LoopbackBroker, LoopbackTransport};
pub use mqtt::MqttTransport;
pub use router::{MessageSink, SinkId, SubscriptionRouter};
pub use session::ShadowSession;
pub use tls::{load_certs, load_private_key, TlsMaterial};
pub use transport::{MockTransport, ShadowTransport, TransportCall};

pub use thingshadow_protocol::{Shadow, ShadowOperation, ShadowTopic, ShadowTopics, ThingName};
