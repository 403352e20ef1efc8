//! # thingshadow broker
//!
//! In-memory reference implementation of the device shadow service.
//!
//! This crate provides:
//! - Get, update and delete handling on the reserved shadow topics
//! - Accepted/rejected replies with the service's document shapes
//! - Deep merge of `desired`/`reported`, `null` removal and deltas
//! - Optimistic versioning and `update/documents` notifications
//!
//! # Architecture
//!
//! The service is transport-agnostic: it consumes a client publish and
//! returns the messages the broker would publish in response. Tests wire
//! it behind an in-process transport; nothing here opens a socket.
//!
//! # Rejections
//!
//! Rejections use HTTP-like codes:
//! - 400 for malformed requests (including invalid JSON)
//! - 404 when no shadow exists
//! - 409 on a version conflict
//! - 413 when the request exceeds the configured size

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::{BrokerConfig, DEFAULT_MAX_DOCUMENT_SIZE};
pub use error::{BrokerResult, Rejection};
pub use handler::{HandlerContext, Reply, RequestHandler};
pub use server::ShadowService;
pub use store::{SectionPatch, ShadowDocument, ShadowStore};
