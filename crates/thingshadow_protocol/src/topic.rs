//! Shadow topic namespace.
//!
//! Every reserved shadow topic lives under
//! `$aws/things/<thing>/shadow/<suffix>`, where the suffix comes from the
//! closed [`ShadowTopic`] set. Custom topics share the thing prefix but take
//! a caller-supplied suffix.

use crate::error::{TopicError, TopicResult};
use crate::filter::{validate_topic_filter, validate_topic_name};
use crate::thing::ThingName;

/// Prefix shared by every per-thing topic.
pub const THINGS_PREFIX: &str = "$aws/things";

/// Shadow level between the thing name and the reserved suffix.
const SHADOW_LEVEL: &str = "shadow";

/// A shadow operation that is requested by publishing to a reserved topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowOperation {
    /// Read the current shadow document.
    Get,
    /// Merge a partial document into the shadow.
    Update,
    /// Remove the shadow document.
    Delete,
}

impl ShadowOperation {
    /// Returns the operation name as it appears in topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowOperation::Get => "get",
            ShadowOperation::Update => "update",
            ShadowOperation::Delete => "delete",
        }
    }

    /// Topic the request is published to.
    pub fn request_topic(&self) -> ShadowTopic {
        match self {
            ShadowOperation::Get => ShadowTopic::Get,
            ShadowOperation::Update => ShadowTopic::Update,
            ShadowOperation::Delete => ShadowTopic::Delete,
        }
    }

    /// Topic the service answers on when the request succeeds.
    pub fn accepted_topic(&self) -> ShadowTopic {
        match self {
            ShadowOperation::Get => ShadowTopic::GetAccepted,
            ShadowOperation::Update => ShadowTopic::UpdateAccepted,
            ShadowOperation::Delete => ShadowTopic::DeleteAccepted,
        }
    }

    /// Topic the service answers on when the request is rejected.
    pub fn rejected_topic(&self) -> ShadowTopic {
        match self {
            ShadowOperation::Get => ShadowTopic::GetRejected,
            ShadowOperation::Update => ShadowTopic::UpdateRejected,
            ShadowOperation::Delete => ShadowTopic::DeleteRejected,
        }
    }
}

impl std::fmt::Display for ShadowOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of reserved shadow topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowTopic {
    /// `shadow/get`
    Get,
    /// `shadow/get/accepted`
    GetAccepted,
    /// `shadow/get/rejected`
    GetRejected,
    /// `shadow/update`
    Update,
    /// `shadow/update/accepted`
    UpdateAccepted,
    /// `shadow/update/rejected`
    UpdateRejected,
    /// `shadow/update/documents`
    UpdateDocuments,
    /// `shadow/delete`
    Delete,
    /// `shadow/delete/accepted`
    DeleteAccepted,
    /// `shadow/delete/rejected`
    DeleteRejected,
}

impl ShadowTopic {
    /// Every reserved topic, in declaration order.
    pub const ALL: [ShadowTopic; 10] = [
        ShadowTopic::Get,
        ShadowTopic::GetAccepted,
        ShadowTopic::GetRejected,
        ShadowTopic::Update,
        ShadowTopic::UpdateAccepted,
        ShadowTopic::UpdateRejected,
        ShadowTopic::UpdateDocuments,
        ShadowTopic::Delete,
        ShadowTopic::DeleteAccepted,
        ShadowTopic::DeleteRejected,
    ];

    /// Suffix below `$aws/things/<thing>/shadow/`.
    pub fn suffix(&self) -> &'static str {
        match self {
            ShadowTopic::Get => "get",
            ShadowTopic::GetAccepted => "get/accepted",
            ShadowTopic::GetRejected => "get/rejected",
            ShadowTopic::Update => "update",
            ShadowTopic::UpdateAccepted => "update/accepted",
            ShadowTopic::UpdateRejected => "update/rejected",
            ShadowTopic::UpdateDocuments => "update/documents",
            ShadowTopic::Delete => "delete",
            ShadowTopic::DeleteAccepted => "delete/accepted",
            ShadowTopic::DeleteRejected => "delete/rejected",
        }
    }

    /// Looks up a reserved topic by suffix.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.suffix() == suffix)
    }

    /// Splits a full topic into its thing name and reserved topic.
    ///
    /// Returns `None` for custom topics and anything outside the namespace.
    pub fn parse(topic: &str) -> Option<(&str, ShadowTopic)> {
        let rest = topic.strip_prefix(THINGS_PREFIX)?.strip_prefix('/')?;
        let (thing, rest) = rest.split_once('/')?;
        let suffix = rest.strip_prefix(SHADOW_LEVEL)?.strip_prefix('/')?;
        if thing.is_empty() {
            return None;
        }
        Self::from_suffix(suffix).map(|t| (thing, t))
    }

    /// Returns the operation this topic belongs to, if any.
    pub fn operation(&self) -> Option<ShadowOperation> {
        match self {
            ShadowTopic::Get | ShadowTopic::GetAccepted | ShadowTopic::GetRejected => {
                Some(ShadowOperation::Get)
            }
            ShadowTopic::Update | ShadowTopic::UpdateAccepted | ShadowTopic::UpdateRejected => {
                Some(ShadowOperation::Update)
            }
            ShadowTopic::Delete | ShadowTopic::DeleteAccepted | ShadowTopic::DeleteRejected => {
                Some(ShadowOperation::Delete)
            }
            ShadowTopic::UpdateDocuments => None,
        }
    }
}

/// Topic derivation for a single thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    thing: ThingName,
    /// `$aws/things/<thing>`
    base: String,
}

impl ShadowTopics {
    /// Creates topic derivation for a thing.
    pub fn new(thing: ThingName) -> Self {
        let base = format!("{}/{}", THINGS_PREFIX, thing);
        Self { thing, base }
    }

    /// Returns the thing name.
    pub fn thing_name(&self) -> &ThingName {
        &self.thing
    }

    /// Returns the full name of a reserved shadow topic.
    pub fn topic(&self, topic: ShadowTopic) -> String {
        format!("{}/{}/{}", self.base, SHADOW_LEVEL, topic.suffix())
    }

    /// Returns the request topic for an operation.
    pub fn request(&self, operation: ShadowOperation) -> String {
        self.topic(operation.request_topic())
    }

    /// Returns the accepted topic for an operation.
    pub fn accepted(&self, operation: ShadowOperation) -> String {
        self.topic(operation.accepted_topic())
    }

    /// Returns the rejected topic for an operation.
    pub fn rejected(&self, operation: ShadowOperation) -> String {
        self.topic(operation.rejected_topic())
    }

    /// Derives a custom topic name suitable for publishing.
    ///
    /// The suffix is joined below `$aws/things/<thing>/` with duplicate,
    /// leading and trailing separators collapsed. Wildcards are rejected, as
    /// is anything below `shadow/get` or `shadow/delete`: those topics carry
    /// the answers to in-flight get and delete requests.
    pub fn custom(&self, suffix: &str) -> TopicResult<String> {
        let topic = self.join(suffix)?;
        validate_topic_name(&topic)?;
        Ok(topic)
    }

    /// Derives a custom topic filter suitable for subscribing.
    ///
    /// Like [`ShadowTopics::custom`], but `+` and `#` are accepted when they
    /// occupy a whole level.
    pub fn custom_filter(&self, suffix: &str) -> TopicResult<String> {
        let filter = self.join(suffix)?;
        validate_topic_filter(&filter)?;
        Ok(filter)
    }

    fn join(&self, suffix: &str) -> TopicResult<String> {
        let mut levels = Vec::new();
        for level in suffix.split('/') {
            match level {
                "" | "." => continue,
                ".." => return Err(TopicError::EscapingSuffix(suffix.to_string())),
                level => levels.push(level),
            }
        }

        if levels.is_empty() {
            return Err(TopicError::EmptySuffix);
        }

        if let [SHADOW_LEVEL, operation, ..] = levels.as_slice() {
            let reserved = [ShadowOperation::Get, ShadowOperation::Delete];
            if reserved.iter().any(|op| op.as_str() == *operation) {
                return Err(TopicError::ReservedSuffix(suffix.to_string()));
            }
        }

        Ok(format!("{}/{}", self.base, levels.join("/")))
    }
}
