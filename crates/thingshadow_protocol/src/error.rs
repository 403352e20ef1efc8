//! Error types for topic and identifier validation.

use thiserror::Error;

/// Result type for topic operations.
pub type TopicResult<T> = Result<T, TopicError>;

/// Errors raised while deriving or validating topics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// Thing name is empty.
    #[error("thing name must not be empty")]
    EmptyThingName,

    /// Thing name exceeds the maximum length.
    #[error("thing name is {len} bytes, maximum is {max}")]
    ThingNameTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Thing name contains a character that is not allowed in a topic level.
    #[error("thing name contains invalid character {ch:?}")]
    InvalidThingName {
        /// Offending character.
        ch: char,
    },

    /// Custom topic suffix is empty after normalization.
    #[error("custom topic suffix must not be empty")]
    EmptySuffix,

    /// Custom topic suffix tries to leave the thing namespace.
    #[error("custom topic suffix {0:?} escapes the thing namespace")]
    EscapingSuffix(String),

    /// Custom topic suffix addresses a topic owned by correlated requests.
    #[error("custom topic suffix {0:?} is reserved for shadow get and delete requests")]
    ReservedSuffix(String),

    /// Topic name contains a wildcard.
    #[error("topic name {0:?} must not contain wildcards")]
    WildcardInName(String),

    /// Topic filter uses a wildcard incorrectly.
    #[error("invalid topic filter {filter:?}: {reason}")]
    InvalidFilter {
        /// The rejected filter.
        filter: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Topic contains a NUL character.
    #[error("topic {0:?} contains a NUL character")]
    NulCharacter(String),
}
