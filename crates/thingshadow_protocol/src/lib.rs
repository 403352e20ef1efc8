//! # thingshadow protocol
//!
//! Topic namespace and payload types for device shadows.
//!
//! This crate provides:
//! - `ThingName` for validated device identifiers
//! - `Shadow` for opaque shadow payloads
//! - `ShadowTopic` for the closed set of reserved shadow topics
//! - `ShadowTopics` for per-thing topic derivation, including custom topics
//! - MQTT topic name/filter validation and filter matching
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod filter;
mod shadow;
mod thing;
mod topic;

pub use error::{TopicError, TopicResult};
pub use filter::{topic_matches, validate_topic_filter, validate_topic_name};
pub use shadow::Shadow;
pub use thing::{ThingName, MAX_THING_NAME_LEN};
pub use topic::{ShadowOperation, ShadowTopic, ShadowTopics, THINGS_PREFIX};
