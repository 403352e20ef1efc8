//! Error types for shadow sessions.

use std::path::PathBuf;
use std::time::Duration;
use thingshadow_protocol::{Shadow, ShadowOperation, TopicError};
use thiserror::Error;

/// Result type for shadow operations.
pub type ShadowResult<T> = Result<T, ShadowError>;

/// Errors that can occur during shadow operations.
#[derive(Error, Debug)]
pub enum ShadowError {
    /// Certificate, key or CA bundle could not be loaded.
    #[error("failed to load {}: {reason}", path.display())]
    Certificate {
        /// File that failed to load.
        path: PathBuf,
        /// Why it failed.
        reason: String,
    },

    /// TLS configuration was rejected.
    #[error("tls error: {0}")]
    Tls(String),

    /// Connecting to the broker failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Subscribing to a topic failed.
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe {
        /// Topic or filter.
        topic: String,
        /// Transport error message.
        reason: String,
    },

    /// Publishing to a topic failed.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Topic.
        topic: String,
        /// Transport error message.
        reason: String,
    },

    /// Unsubscribing from a topic failed.
    #[error("unsubscribe from {topic} failed: {reason}")]
    Unsubscribe {
        /// Topic or filter.
        topic: String,
        /// Transport error message.
        reason: String,
    },

    /// The transport did not acknowledge a request in time.
    #[error("no acknowledgement for {topic} within {timeout:?}")]
    AckTimeout {
        /// Topic of the unacknowledged request.
        topic: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The shadow service rejected the request.
    ///
    /// This is a normal, successfully delivered answer: the payload is the
    /// rejection document exactly as the service sent it.
    #[error("shadow {operation} rejected: {payload}")]
    Rejected {
        /// Operation that was rejected.
        operation: ShadowOperation,
        /// Rejection document.
        payload: Shadow,
    },

    /// A sink closed before delivering a message.
    #[error("channel for {topic} closed before a message arrived")]
    ChannelClosed {
        /// Topic whose sink closed.
        topic: String,
    },

    /// No accepted or rejected answer arrived before the deadline.
    #[error("shadow {operation} got no answer within {timeout:?}")]
    DeadlineExceeded {
        /// Operation that timed out.
        operation: ShadowOperation,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// The session has been disconnected.
    #[error("not connected to broker")]
    NotConnected,

    /// Topic derivation or validation failed.
    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
}

impl ShadowError {
    /// Returns true if repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShadowError::Connection(_)
                | ShadowError::AckTimeout { .. }
                | ShadowError::ChannelClosed { .. }
                | ShadowError::DeadlineExceeded { .. }
        )
    }

    /// Returns the rejection document if this is a semantic rejection.
    pub fn rejection(&self) -> Option<&Shadow> {
        match self {
            ShadowError::Rejected { payload, .. } => Some(payload),
            _ => None,
        }
    }
}
