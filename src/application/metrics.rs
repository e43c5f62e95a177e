//! Observability metrics for quota admission.
//!
//! Counters are updated on the admission path and by the reaper, and can be
//! read at any time without locking.

use crate::domain::outcome::AdmissionOutcome;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission and retention activity.
///
/// Cloning shares the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    granted: AtomicU64,
    denied: AtomicU64,
    duplicates: AtomicU64,
    skipped: AtomicU64,
    validation_failures: AtomicU64,
    store_failures: AtomicU64,
    events_reaped: AtomicU64,
    reap_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_outcome(&self, outcome: &AdmissionOutcome) {
        let counter = match outcome {
            AdmissionOutcome::Granted { .. } => &self.inner.granted,
            AdmissionOutcome::Denied { .. } => &self.inner.denied,
            AdmissionOutcome::Duplicate { .. } => &self.inner.duplicates,
            AdmissionOutcome::Skipped { .. } => &self.inner.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.inner
            .validation_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.inner.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reaped(&self, count: u64) {
        self.inner.events_reaped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_reap_failure(&self) {
        self.inner.reap_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn granted(&self) -> u64 {
        self.inner.granted.load(Ordering::Relaxed)
    }

    pub fn denied(&self) -> u64 {
        self.inner.denied.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.inner.duplicates.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    pub fn validation_failures(&self) -> u64 {
        self.inner.validation_failures.load(Ordering::Relaxed)
    }

    /// Store calls that failed, timed out or were short-circuited.
    pub fn store_failures(&self) -> u64 {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    pub fn events_reaped(&self) -> u64 {
        self.inner.events_reaped.load(Ordering::Relaxed)
    }

    pub fn reap_failures(&self) -> u64 {
        self.inner.reap_failures.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            granted: self.granted(),
            denied: self.denied(),
            duplicates: self.duplicates(),
            skipped: self.skipped(),
            validation_failures: self.validation_failures(),
            store_failures: self.store_failures(),
            events_reaped: self.events_reaped(),
            reap_failures: self.reap_failures(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub granted: u64,
    pub denied: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub validation_failures: u64,
    pub store_failures: u64,
    pub events_reaped: u64,
    pub reap_failures: u64,
}

impl MetricsSnapshot {
    /// Admissions that reached a decision.
    pub fn total_decisions(&self) -> u64 {
        self.granted + self.denied + self.duplicates + self.skipped
    }

    /// Fraction of priority requests (granted or denied) that were denied.
    ///
    /// Returns 0.0 when no priority request has been decided.
    pub fn denial_rate(&self) -> f64 {
        let contested = self.granted + self.denied;
        if contested == 0 {
            0.0
        } else {
            self.denied as f64 / contested as f64
        }
    }
}
