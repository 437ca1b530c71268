//! Relay error types
//!
//! Admission failures and delivery failures are routine outcomes and are
//! reported through return values and counters, not through [`RelayError`].
//! Errors here are caller mistakes (bad patterns, unknown ids) or
//! configuration problems.

use thiserror::Error;

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors surfaced by the relay core
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Subscription requires at least one topic pattern")]
    EmptyPatterns,

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("Invalid relay configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse relay configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Create an invalid-pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by caller input rather than the environment
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. } | Self::EmptyPatterns | Self::UnknownSubscription(_)
        )
    }
}
