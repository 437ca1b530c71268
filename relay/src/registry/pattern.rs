//! Validated topic patterns

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};
use crate::events::topic_matches;

/// A topic pattern accepted at subscribe time.
///
/// Segments are separated by `.`; a segment is either literal text or a
/// lone `*`. `*` on its own matches every topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern(String);

impl TopicPattern {
    /// Parse and validate a pattern
    pub fn parse(pattern: &str) -> RelayResult<Self> {
        if pattern.is_empty() {
            return Err(RelayError::invalid_pattern(pattern, "pattern is empty"));
        }
        if pattern.chars().any(char::is_whitespace) {
            return Err(RelayError::invalid_pattern(pattern, "contains whitespace"));
        }
        for segment in pattern.split('.') {
            if segment.is_empty() {
                return Err(RelayError::invalid_pattern(pattern, "empty segment"));
            }
            if segment != "*" && segment.contains('*') {
                return Err(RelayError::invalid_pattern(
                    pattern,
                    format!("partial wildcard in segment '{segment}'"),
                ));
            }
        }
        Ok(Self(pattern.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the pattern contains any wildcard segment
    pub fn is_wildcard(&self) -> bool {
        self.0.split('.').any(|segment| segment == "*")
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.0, topic)
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TopicPattern> for String {
    fn from(pattern: TopicPattern) -> Self {
        pattern.0
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_patterns() {
        for pattern in ["*", "task.*", "*.completed", "task.created", "a.*.c"] {
            assert!(TopicPattern::parse(pattern).is_ok(), "{pattern} should parse");
        }
        assert!(TopicPattern::parse("task.*").unwrap().is_wildcard());
        assert!(!TopicPattern::parse("task.created").unwrap().is_wildcard());
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        for pattern in ["", "task.", ".task", "task..created", "task.*ed", "ta*", "task created"] {
            let err = TopicPattern::parse(pattern).unwrap_err();
            assert!(
                matches!(err, RelayError::InvalidPattern { .. }),
                "{pattern} should be rejected"
            );
        }
    }

    #[test]
    fn test_pattern_serde_validates() {
        let parsed: TopicPattern = serde_json::from_str("\"task.*\"").unwrap();
        assert!(parsed.matches("task.created"));
        assert!(serde_json::from_str::<TopicPattern>("\"task.*ed\"").is_err());
    }
}
