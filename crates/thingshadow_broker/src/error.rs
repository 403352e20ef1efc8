//! Rejections returned by the shadow service.

use serde::Serialize;
use thiserror::Error;

/// Result type for shadow service operations.
pub type BrokerResult<T> = Result<T, Rejection>;

/// Why the service rejected a request.
///
/// Each variant maps onto the HTTP-like code carried in the rejection
/// document published on the `.../rejected` topic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// The thing has no shadow.
    #[error("No shadow exists with name: '{0}'")]
    NotFound(String),

    /// The request named a version other than the current one.
    #[error("Version conflict")]
    VersionConflict {
        /// Current version.
        current: u64,
        /// Version named in the request.
        requested: u64,
    },

    /// The request exceeds the configured document size.
    #[error("The payload exceeds the maximum size allowed")]
    PayloadTooLarge {
        /// Request size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl Rejection {
    /// Returns the HTTP-like status code.
    pub fn code(&self) -> u16 {
        match self {
            Rejection::BadRequest(_) => 400,
            Rejection::NotFound(_) => 404,
            Rejection::VersionConflict { .. } => 409,
            Rejection::PayloadTooLarge { .. } => 413,
        }
    }

    /// Builds the rejection document.
    pub fn to_document(&self, client_token: Option<&str>, timestamp: u64) -> Vec<u8> {
        let document = RejectionDocument {
            code: self.code(),
            message: self.to_string(),
            timestamp,
            client_token,
        };
        // Serializing a struct of plain fields cannot fail.
        serde_json::to_vec(&document).unwrap_or_default()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectionDocument<'a> {
    code: u16,
    message: String,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_token: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn codes() {
        assert_eq!(Rejection::BadRequest("Invalid JSON".into()).code(), 400);
        assert_eq!(Rejection::NotFound("t".into()).code(), 404);
        assert_eq!(
            Rejection::VersionConflict {
                current: 2,
                requested: 1
            }
            .code(),
            409
        );
        assert_eq!(Rejection::PayloadTooLarge { size: 9, max: 8 }.code(), 413);
    }

    #[test]
    fn document_shape() {
        let doc = Rejection::NotFound("test".into()).to_document(Some("abc"), 1700000000);
        let value: Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(
            value,
            json!({
                "code": 404,
                "message": "No shadow exists with name: 'test'",
                "timestamp": 1700000000,
                "clientToken": "abc",
            })
        );
    }

    #[test]
    fn document_without_client_token() {
        let doc = Rejection::BadRequest("Invalid JSON".into()).to_document(None, 1);
        let value: Value = serde_json::from_slice(&doc).unwrap();
        assert!(value.get("clientToken").is_none());
        assert_eq!(value["code"], 400);
    }
}
