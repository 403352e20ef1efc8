//! MQTT topic name and filter rules (MQTT 3.1.1, section 4.7).

use crate::error::{TopicError, TopicResult};

/// Maximum encoded length of a topic in bytes.
const MAX_TOPIC_LEN: usize = 65_535;

/// Validates a topic name used for publishing.
pub fn validate_topic_name(topic: &str) -> TopicResult<()> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInName(topic.to_string()));
    }
    Ok(())
}

/// Validates a topic filter used for subscribing.
///
/// `+` must occupy a whole level; `#` must occupy a whole level and be the
/// last one.
pub fn validate_topic_filter(filter: &str) -> TopicResult<()> {
    check_common(filter)?;

    let invalid = |reason| TopicError::InvalidFilter {
        filter: filter.to_string(),
        reason,
    };

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') {
            if level != "#" {
                return Err(invalid("multi-level wildcard must occupy a whole level"));
            }
            if levels.peek().is_some() {
                return Err(invalid("multi-level wildcard must be last"));
            }
        }
        if level.contains('+') && level != "+" {
            return Err(invalid("single-level wildcard must occupy a whole level"));
        }
    }

    Ok(())
}

fn check_common(topic: &str) -> TopicResult<()> {
    if topic.is_empty() {
        return Err(TopicError::InvalidFilter {
            filter: String::new(),
            reason: "topic must not be empty",
        });
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::InvalidFilter {
            filter: topic.chars().take(64).collect(),
            reason: "topic exceeds 65535 bytes",
        });
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter(topic.to_string()));
    }
    Ok(())
}

/// Returns true if `topic` is matched by `filter`.
///
/// Wildcards in the first level never match topics beginning with `$`, so
/// `#` does not capture `$aws/...` traffic.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // `#` also matches the parent level: `a/#` matches `a`.
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_rules() {
        assert!(validate_topic_name("$aws/things/t/shadow/get").is_ok());
        assert!(validate_topic_name("a//b").is_ok());
        assert!(matches!(
            validate_topic_name("a/+/b"),
            Err(TopicError::WildcardInName(_))
        ));
        assert!(matches!(
            validate_topic_name("a\0b"),
            Err(TopicError::NulCharacter(_))
        ));
        assert!(validate_topic_name("").is_err());
    }

    #[test]
    fn topic_filter_rules() {
        for ok in ["a/b", "+", "#", "a/+/c", "a/#", "+/+/#", "$aws/things/+/shadow/#"] {
            assert!(validate_topic_filter(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["a/#/c", "a#", "a/b+", "+a/b", "##"] {
            assert!(validate_topic_filter(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn exact_match() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/+/c", "a//c"));
        assert!(!topic_matches("a/+/c", "a/b/d/c"));
        assert!(topic_matches("+/+", "a/b"));
        assert!(!topic_matches("+", "a/b"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/#", "b/c"));
    }

    #[test]
    fn dollar_topics_need_literal_first_level() {
        assert!(!topic_matches("#", "$aws/things/t/shadow/get"));
        assert!(!topic_matches("+/things/t/shadow/get", "$aws/things/t/shadow/get"));
        assert!(topic_matches("$aws/things/+/shadow/#", "$aws/things/t/shadow/get/accepted"));
    }
}
