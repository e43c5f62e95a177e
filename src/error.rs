//! Crate-level error type.

use crate::application::ports::StoreError;
use crate::domain::request::ValidationError;
use crate::infrastructure::config::ConfigError;

/// Error returned by the quota service.
///
/// The three variants never blur into each other: a caller can always tell
/// "you sent something wrong" from "the store could not answer" from "the
/// service was never correctly configured".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// Malformed input, rejected before touching the store
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    /// The event store could not complete the operation
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    /// Startup configuration is invalid
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl QuotaError {
    /// True if repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            QuotaError::StoreUnavailable(e) => e.is_retryable(),
            QuotaError::Validation(_) | QuotaError::Configuration(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryability() {
        assert!(!QuotaError::from(ValidationError::EmptyAgency).is_retryable());
        assert!(QuotaError::from(StoreError::Timeout {
            operation: "count_granted",
            elapsed: Duration::from_millis(5),
        })
        .is_retryable());
        assert!(!QuotaError::from(ConfigError::MissingStoreTarget).is_retryable());
    }

    #[test]
    fn test_display_names_layer() {
        let err = QuotaError::from(ValidationError::MissingPriorityFlag);
        assert_eq!(
            err.to_string(),
            "invalid request: field 'wants_priority' is required"
        );
    }
}
