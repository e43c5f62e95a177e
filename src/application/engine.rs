//! Admission engine.
//!
//! Decides whether a submission consumes one unit of an agency's weekly
//! quota. The evaluation order is fixed:
//!
//! 1. validate the submission (no store access on failure)
//! 2. compute the current window
//! 3. resolve the agency's limit
//! 4. count granted events in the window
//! 5. declined priority → `Skipped`
//! 6. known external reference → `Duplicate`
//! 7. limit reached → `Denied`
//! 8. append → `Granted`
//!
//! Steps 4–8 run under the agency's lock so concurrent admissions cannot
//! overshoot the limit.

use crate::application::guard::StoreGuard;
use crate::application::locks::AgencyLocks;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, EventStore, StoreError};
use crate::domain::{
    agency::AgencyName,
    event::{NewEvent, StoredEvent},
    limits::LimitRegistry,
    outcome::{AdmissionOutcome, QuotaStatus, StoreStatus},
    request::{SubmitRequest, Submission, ValidationError},
    window::Window,
};
use crate::error::QuotaError;
use std::sync::Arc;

/// Coordinates admission decisions against an event store.
pub struct AdmissionEngine<S>
where
    S: EventStore,
{
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    limits: Arc<LimitRegistry>,
    locks: AgencyLocks,
    guard: StoreGuard,
    metrics: Metrics,
}

impl<S> Clone for AdmissionEngine<S>
where
    S: EventStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            limits: Arc::clone(&self.limits),
            locks: self.locks.clone(),
            guard: self.guard.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> std::fmt::Debug for AdmissionEngine<S>
where
    S: EventStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("store", &self.store)
            .field("limits", &self.limits)
            .field("store_timeout", &self.guard.timeout())
            .finish_non_exhaustive()
    }
}

impl<S> AdmissionEngine<S>
where
    S: EventStore,
{
    /// Create a new engine.
    ///
    /// # Arguments
    /// * `store` - Event store adapter
    /// * `clock` - Source of "now"; must be the clock the store stamps with
    /// * `limits` - Immutable limit table
    /// * `locks` - Per-agency locks (shared with the reaper for pruning)
    /// * `guard` - Timeout and circuit breaker for store calls
    /// * `metrics` - Counters
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        limits: Arc<LimitRegistry>,
        locks: AgencyLocks,
        guard: StoreGuard,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            clock,
            limits,
            locks,
            guard,
            metrics,
        }
    }

    /// Evaluate a submission.
    ///
    /// # Errors
    /// - `QuotaError::Validation` for malformed input; the store is untouched.
    /// - `QuotaError::StoreUnavailable` if any store call fails or times out.
    ///   No outcome is guessed in that case.
    pub async fn submit(&self, request: SubmitRequest) -> Result<AdmissionOutcome, QuotaError> {
        let submission = match request.validate() {
            Ok(submission) => submission,
            Err(e) => {
                self.metrics.record_validation_failure();
                return Err(e.into());
            }
        };

        let outcome = self.admit(submission).await?;

        self.metrics.record_outcome(&outcome);
        tracing::debug!(
            agency = %outcome.agency(),
            outcome = outcome.kind(),
            total = outcome.total(),
            limit = outcome.limit(),
            "admission decided"
        );
        Ok(outcome)
    }

    async fn admit(&self, submission: Submission) -> Result<AdmissionOutcome, StoreError> {
        let Submission {
            agency,
            wants_priority,
            external_ref,
        } = submission;

        let _guard = self.locks.acquire(&agency).await;

        let window = Window::current(self.clock.now());
        let limit = self.limits.limit_for(&agency).get();

        let total = self
            .guard
            .call(
                "count_granted",
                self.store.count_granted(&agency, window.start()),
            )
            .await?;

        if !wants_priority {
            return Ok(AdmissionOutcome::Skipped {
                agency,
                total,
                limit,
            });
        }

        if let Some(reference) = external_ref.as_deref() {
            let seen = self
                .guard
                .call(
                    "exists_by_external_ref",
                    self.store.exists_by_external_ref(reference),
                )
                .await?;
            if seen {
                return Ok(AdmissionOutcome::Duplicate {
                    agency,
                    total,
                    limit,
                });
            }
        }

        if total >= u64::from(limit) {
            return Ok(AdmissionOutcome::Denied {
                agency,
                total,
                limit,
            });
        }

        let event = NewEvent::granted(agency.clone(), external_ref);
        match self.guard.call("append", self.store.append(event)).await {
            Ok(event) => Ok(AdmissionOutcome::Granted {
                agency,
                total: total + 1,
                limit,
                event,
            }),
            // Same reference granted concurrently under another agency's lock.
            Err(StoreError::DuplicateReference(_)) => Ok(AdmissionOutcome::Duplicate {
                agency,
                total,
                limit,
            }),
            Err(e) => Err(e),
        }
    }

    /// Current usage for `agency`.
    ///
    /// # Errors
    /// `Validation` for a blank agency, `StoreUnavailable` if counting fails.
    pub async fn query(&self, agency: &str) -> Result<QuotaStatus, QuotaError> {
        let agency = self.parse_agency(agency)?;
        let window = Window::current(self.clock.now());
        let limit = self.limits.limit_for(&agency).get();
        let total = self
            .guard
            .call(
                "count_granted",
                self.store.count_granted(&agency, window.start()),
            )
            .await?;
        Ok(QuotaStatus::new(agency, total, limit))
    }

    /// Stored event count and the current window start.
    pub async fn status(&self) -> Result<StoreStatus, QuotaError> {
        let window = Window::current(self.clock.now());
        let total_stored_events = self
            .guard
            .call("count_all", self.store.count_all())
            .await?;
        Ok(StoreStatus {
            total_stored_events,
            current_window_start: window.start(),
        })
    }

    /// Events granted to `agency` in the current window, oldest first.
    pub async fn history(&self, agency: &str) -> Result<Vec<StoredEvent>, QuotaError> {
        let agency = self.parse_agency(agency)?;
        let window = Window::current(self.clock.now());
        let events = self
            .guard
            .call("list_since", self.store.list_since(&agency, window.start()))
            .await?;
        Ok(events)
    }

    /// Administrative purge of every event for `agency`.
    ///
    /// Runs under the agency's lock so it cannot interleave with an admission.
    pub async fn purge_agency(&self, agency: &str) -> Result<u64, QuotaError> {
        let agency = self.parse_agency(agency)?;
        let _guard = self.locks.acquire(&agency).await;
        let removed = self
            .guard
            .call("delete_agency", self.store.delete_agency(&agency))
            .await?;
        tracing::info!(agency = %agency, removed, "agency events purged");
        Ok(removed)
    }

    fn parse_agency(&self, raw: &str) -> Result<AgencyName, QuotaError> {
        AgencyName::parse(raw).ok_or_else(|| {
            self.metrics.record_validation_failure();
            QuotaError::Validation(ValidationError::EmptyAgency)
        })
    }

    /// Get a reference to the limit table.
    pub fn limits(&self) -> &LimitRegistry {
        &self.limits
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get a reference to the per-agency locks.
    pub fn locks(&self) -> &AgencyLocks {
        &self.locks
    }

    /// Get a reference to the guarded call wrapper.
    pub fn guard(&self) -> &StoreGuard {
        &self.guard
    }
}
