//! Thing names.

use crate::error::{TopicError, TopicResult};
use std::fmt;

/// Maximum length of a thing name in bytes.
pub const MAX_THING_NAME_LEN: usize = 128;

/// The name of a device registered with the broker.
///
/// A thing name is used verbatim both as the MQTT client identifier and as a
/// single level of every shadow topic, so it may not contain topic
/// separators, wildcards or NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThingName(String);

impl ThingName {
    /// Validates and wraps a thing name.
    pub fn new(name: impl Into<String>) -> TopicResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(TopicError::EmptyThingName);
        }
        if name.len() > MAX_THING_NAME_LEN {
            return Err(TopicError::ThingNameTooLong {
                len: name.len(),
                max: MAX_THING_NAME_LEN,
            });
        }
        if let Some(ch) = name
            .chars()
            .find(|c| matches!(c, '/' | '+' | '#' | '\0'))
        {
            return Err(TopicError::InvalidThingName { ch });
        }

        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ThingName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ThingName {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ThingName {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ThingName {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_names() {
        for name in ["test", "sensor-01", "gateway_7:eu", "a"] {
            assert_eq!(ThingName::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(ThingName::new(""), Err(TopicError::EmptyThingName));
    }

    #[test]
    fn rejects_topic_metacharacters() {
        assert_eq!(
            ThingName::new("a/b"),
            Err(TopicError::InvalidThingName { ch: '/' })
        );
        assert_eq!(
            ThingName::new("a+"),
            Err(TopicError::InvalidThingName { ch: '+' })
        );
        assert_eq!(
            ThingName::new("#"),
            Err(TopicError::InvalidThingName { ch: '#' })
        );
    }

    #[test]
    fn rejects_overlong() {
        let name = "x".repeat(MAX_THING_NAME_LEN + 1);
        assert!(matches!(
            ThingName::new(name),
            Err(TopicError::ThingNameTooLong { len: 129, max: 128 })
        ));
        assert!(ThingName::new("x".repeat(MAX_THING_NAME_LEN)).is_ok());
    }

    #[test]
    fn parses_from_str() {
        let name: ThingName = "device".parse().unwrap();
        assert_eq!(name.to_string(), "device");
    }
}
