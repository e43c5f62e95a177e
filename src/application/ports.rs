//! Ports (interfaces) for the application layer.
//!
//! The admission engine and the reaper only know these traits. Infrastructure
//! adapters implement them: `SystemClock` and `MockClock` for [`Clock`],
//! `MemoryEventStore` and `RedisEventStore` for [`EventStore`].

use crate::domain::{
    agency::AgencyName,
    event::{NewEvent, StoredEvent},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Port for obtaining the current wall-clock time.
///
/// UTC is the only reference clock in the crate. Stores stamp `created_at`
/// from the same clock the engine computes windows with.
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Error returned by an [`EventStore`] operation.
///
/// `Connection`, `Timeout` and `CircuitOpen` mean the store gave no answer;
/// callers must surface those as retryable, never guess.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The medium could not be reached or rejected the command
    #[error("event store unavailable during {operation}: {message}")]
    Connection {
        operation: &'static str,
        message: String,
    },
    /// The operation did not finish in time
    #[error("event store timed out during {operation} after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },
    /// Calls are short-circuited after repeated failures
    #[error("event store circuit open, {operation} not attempted")]
    CircuitOpen { operation: &'static str },
    /// A stored record could not be decoded
    #[error("stored event could not be decoded: {0}")]
    Corrupted(String),
    /// The external reference is already recorded on another event
    #[error("external reference {0:?} is already recorded")]
    DuplicateReference(String),
}

impl StoreError {
    /// Wrap an adapter error for `operation`.
    pub fn connection(operation: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Connection {
            operation,
            message: error.to_string(),
        }
    }

    /// True if the store gave no answer and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::DuplicateReference(_) | Self::Corrupted(_))
    }
}

/// Port for the durable collection of granted events.
///
/// Implementations must make each operation individually atomic. Counting and
/// appending are *not* atomic together; the engine serializes them per agency.
#[async_trait]
pub trait EventStore: Send + Sync + Debug {
    /// Count granted events for `agency` with `created_at >= since`.
    async fn count_granted(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// True if a granted event carries `external_ref`.
    async fn exists_by_external_ref(&self, external_ref: &str) -> Result<bool, StoreError>;

    /// Persist one granted event, assigning `id` and `created_at`.
    ///
    /// `created_at` never goes backwards for a given agency.
    ///
    /// # Errors
    /// `StoreError::DuplicateReference` if the event's external reference is
    /// already recorded; any other variant if the medium failed.
    async fn append(&self, event: NewEvent) -> Result<StoredEvent, StoreError>;

    /// Remove all events with `created_at < horizon`, returning how many.
    async fn delete_older_than(&self, horizon: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Total number of stored events.
    async fn count_all(&self) -> Result<u64, StoreError>;

    /// Events for `agency` with `created_at >= since`, oldest first.
    async fn list_since(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Remove every event for `agency`, returning how many.
    async fn delete_agency(&self, agency: &AgencyName) -> Result<u64, StoreError>;

    /// Remove the oldest events until at most `max_records` remain.
    async fn trim_to(&self, max_records: u64) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T> EventStore for Arc<T>
where
    T: EventStore + ?Sized,
{
    async fn count_granted(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        (**self).count_granted(agency, since).await
    }

    async fn exists_by_external_ref(&self, external_ref: &str) -> Result<bool, StoreError> {
        (**self).exists_by_external_ref(external_ref).await
    }

    async fn append(&self, event: NewEvent) -> Result<StoredEvent, StoreError> {
        (**self).append(event).await
    }

    async fn delete_older_than(&self, horizon: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).delete_older_than(horizon).await
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        (**self).count_all().await
    }

    async fn list_since(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).list_since(agency, since).await
    }

    async fn delete_agency(&self, agency: &AgencyName) -> Result<u64, StoreError> {
        (**self).delete_agency(agency).await
    }

    async fn trim_to(&self, max_records: u64) -> Result<u64, StoreError> {
        (**self).trim_to(max_records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::connection("append", "refused").is_retryable());
        assert!(StoreError::Timeout {
            operation: "count_granted",
            elapsed: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(StoreError::CircuitOpen { operation: "append" }.is_retryable());
        assert!(!StoreError::DuplicateReference("r".into()).is_retryable());
        assert!(!StoreError::Corrupted("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = StoreError::connection("count_all", "connection refused");
        assert_eq!(
            err.to_string(),
            "event store unavailable during count_all: connection refused"
        );
    }
}
