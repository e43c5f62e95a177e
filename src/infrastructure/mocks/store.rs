//! Fault-injecting store wrapper.

use crate::application::ports::{EventStore, StoreError};
use crate::domain::{
    agency::AgencyName,
    event::{NewEvent, StoredEvent},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Wraps an [`EventStore`] and can make every call slow or failing.
///
/// Each call is counted before any injected delay or failure, so tests can
/// assert that a path never reached the store.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl<S> FlakyStore<S>
where
    S: EventStore,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make subsequent calls fail with `StoreError::Connection`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long before every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self
            .delay
            .lock()
            .expect("FlakyStore mutex poisoned - a test thread panicked while holding the lock") =
            delay;
    }

    /// Number of store calls attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn before(&self, operation: &'static str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .delay
            .lock()
            .expect("FlakyStore mutex poisoned - a test thread panicked while holding the lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::connection(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl<S> EventStore for FlakyStore<S>
where
    S: EventStore,
{
    async fn count_granted(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.before("count_granted").await?;
        self.inner.count_granted(agency, since).await
    }

    async fn exists_by_external_ref(&self, external_ref: &str) -> Result<bool, StoreError> {
        self.before("exists_by_external_ref").await?;
        self.inner.exists_by_external_ref(external_ref).await
    }

    async fn append(&self, event: NewEvent) -> Result<StoredEvent, StoreError> {
        self.before("append").await?;
        self.inner.append(event).await
    }

    async fn delete_older_than(&self, horizon: DateTime<Utc>) -> Result<u64, StoreError> {
        self.before("delete_older_than").await?;
        self.inner.delete_older_than(horizon).await
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        self.before("count_all").await?;
        self.inner.count_all().await
    }

    async fn list_since(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.before("list_since").await?;
        self.inner.list_since(agency, since).await
    }

    async fn delete_agency(&self, agency: &AgencyName) -> Result<u64, StoreError> {
        self.before("delete_agency").await?;
        self.inner.delete_agency(agency).await
    }

    async fn trim_to(&self, max_records: u64) -> Result<u64, StoreError> {
        self.before("trim_to").await?;
        self.inner.trim_to(max_records).await
    }
}
