//! Error types for credential exchange.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for credential operations.
pub type CredentialsResult<T> = Result<T, CredentialsError>;

/// Errors that can occur while fetching credentials.
#[derive(Error, Debug)]
pub enum CredentialsError {
    /// Certificate, key or CA bundle could not be loaded.
    #[error("failed to load {}: {reason}", path.display())]
    Certificate {
        /// File that failed to load.
        path: PathBuf,
        /// Why it failed.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Client(String),

    /// The request could not be sent or its body not read.
    #[error("credentials request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a status other than 200.
    #[error("credentials request failed with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body was not a credentials document.
    #[error("failed to decode credentials: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CredentialsError {
    /// Returns true if repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CredentialsError::Request(e) => e.is_timeout() || e.is_connect(),
            CredentialsError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let throttled = CredentialsError::Status {
            status: 429,
            body: String::new(),
        };
        let forbidden = CredentialsError::Status {
            status: 403,
            body: "forbidden".into(),
        };
        assert!(throttled.is_retryable());
        assert!(!forbidden.is_retryable());
        assert_eq!(
            forbidden.to_string(),
            "credentials request failed with status 403: forbidden"
        );
    }

    #[test]
    fn certificate_error_names_path() {
        let err = CredentialsError::Certificate {
            path: PathBuf::from("/etc/device/cert.pem"),
            reason: "not found".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("/etc/device/cert.pem"));
    }
}
