//! Opaque shadow payloads.

use bytes::Bytes;
use std::fmt;

/// Trigger payload for get and delete requests.
const EMPTY_REQUEST: &[u8] = b"{}";

/// A shadow payload.
///
/// The bytes are passed through verbatim: nothing in the session layer
/// parses, validates or rewrites them. By convention the shadow service
/// speaks UTF-8 JSON, but custom topics may carry arbitrary bytes.
///
/// Cloning is cheap; the buffer is reference counted and immutable, so a
/// received payload can never be overwritten by the transport after hand-off.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Shadow(Bytes);

impl Shadow {
    /// Creates a payload from any byte source.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Copies a borrowed byte slice into a new payload.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// The `{}` document sent to trigger get and delete requests.
    pub fn empty_request() -> Self {
        Self(Bytes::from_static(EMPTY_REQUEST))
    }

    /// Returns the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the payload and returns the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Copies the payload into a `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Returns the payload as UTF-8 if it is valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl fmt::Display for Shadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Shadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => f.debug_tuple("Shadow").field(&text).finish(),
            None => f.debug_tuple("Shadow").field(&self.0).finish(),
        }
    }
}

impl From<Bytes> for Shadow {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Shadow {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<String> for Shadow {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&'static str> for Shadow {
    fn from(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Shadow {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl From<Shadow> for Bytes {
    fn from(shadow: Shadow) -> Self {
        shadow.0
    }
}

impl From<Shadow> for Vec<u8> {
    fn from(shadow: Shadow) -> Self {
        shadow.0.to_vec()
    }
}

impl AsRef<[u8]> for Shadow {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
