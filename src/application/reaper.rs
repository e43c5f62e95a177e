//! Retention reaper.
//!
//! Periodically deletes events older than the retention horizon and, when a
//! capacity cap is configured, the oldest events beyond it. Runs are
//! single-flight: a run requested while another is in progress returns
//! immediately without touching the store.
//!
//! Reaper failures are logged and counted; they never reach the admission
//! path.

use crate::application::guard::StoreGuard;
use crate::application::locks::AgencyLocks;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, EventStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Default age after which events are deleted.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Longest accepted retention (100 years).
pub const MAX_RETENTION: Duration = Duration::from_secs(36_500 * 24 * 60 * 60);

/// Error returned when reaper configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReaperConfigError {
    /// Retention must be positive
    #[error("retention period must be greater than 0")]
    ZeroRetention,
    /// Retention is longer than `MAX_RETENTION`
    #[error("retention period {0:?} is out of range")]
    RetentionOutOfRange(Duration),
    /// Reap interval must be positive
    #[error("reap interval must be greater than 0")]
    ZeroInterval,
    /// A capacity cap of zero would delete everything
    #[error("max_records must be greater than 0")]
    ZeroMaxRecords,
}

/// Configuration for retention reaping.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    retention: chrono::Duration,
    max_records: Option<u64>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::days(14),
            max_records: None,
        }
    }
}

impl ReaperConfig {
    /// Create a reaper config with the given retention period.
    ///
    /// # Errors
    /// `ZeroRetention` for a zero duration, `RetentionOutOfRange` if it
    /// exceeds [`MAX_RETENTION`].
    pub fn new(retention: Duration) -> Result<Self, ReaperConfigError> {
        if retention.is_zero() {
            return Err(ReaperConfigError::ZeroRetention);
        }
        if retention > MAX_RETENTION {
            return Err(ReaperConfigError::RetentionOutOfRange(retention));
        }
        let retention = chrono::Duration::from_std(retention)
            .map_err(|_| ReaperConfigError::RetentionOutOfRange(retention))?;
        Ok(Self {
            retention,
            max_records: None,
        })
    }

    /// Cap the total number of stored events.
    ///
    /// # Errors
    /// `ZeroMaxRecords` if `max_records` is zero.
    pub fn with_max_records(mut self, max_records: u64) -> Result<Self, ReaperConfigError> {
        if max_records == 0 {
            return Err(ReaperConfigError::ZeroMaxRecords);
        }
        self.max_records = Some(max_records);
        Ok(self)
    }

    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }

    pub fn max_records(&self) -> Option<u64> {
        self.max_records
    }

    /// Oldest `created_at` that survives a run at `now`.
    ///
    /// Saturates at the earliest representable instant, where nothing is
    /// old enough to delete.
    pub fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Result of one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// Events older than this were deleted
    pub horizon: DateTime<Utc>,
    /// Deleted for age
    pub expired: u64,
    /// Deleted to respect the capacity cap
    pub trimmed: u64,
}

impl ReapReport {
    pub fn total_deleted(&self) -> u64 {
        self.expired + self.trimmed
    }
}

/// Result of a run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Completed(ReapReport),
    /// Another run was in flight; nothing was done
    AlreadyRunning,
}

/// Deletes events past the retention horizon.
pub struct RetentionReaper<S>
where
    S: EventStore,
{
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
    guard: StoreGuard,
    locks: AgencyLocks,
    metrics: Metrics,
    in_flight: Mutex<()>,
}

impl<S> std::fmt::Debug for RetentionReaper<S>
where
    S: EventStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionReaper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> RetentionReaper<S>
where
    S: EventStore,
{
    /// Create a new reaper.
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        config: ReaperConfig,
        guard: StoreGuard,
        locks: AgencyLocks,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            guard,
            locks,
            metrics,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one reap at `now`.
    ///
    /// # Errors
    /// Returns the store error of the first failing step; the failure is also
    /// counted in the metrics.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReapOutcome, StoreError> {
        let Ok(_running) = self.in_flight.try_lock() else {
            tracing::debug!("retention reap already in flight, skipping");
            return Ok(ReapOutcome::AlreadyRunning);
        };

        match self.reap(now).await {
            Ok(report) => {
                self.metrics.record_reaped(report.total_deleted());
                let pruned = self.locks.prune_idle();
                tracing::info!(
                    horizon = %report.horizon,
                    expired = report.expired,
                    trimmed = report.trimmed,
                    idle_locks_pruned = pruned,
                    "retention reap completed"
                );
                Ok(ReapOutcome::Completed(report))
            }
            Err(e) => {
                self.metrics.record_reap_failure();
                tracing::warn!(error = %e, "retention reap failed");
                Err(e)
            }
        }
    }

    /// Run one reap at the clock's current time.
    pub async fn run_now(&self) -> Result<ReapOutcome, StoreError> {
        self.run_once(self.clock.now()).await
    }

    async fn reap(&self, now: DateTime<Utc>) -> Result<ReapReport, StoreError> {
        let horizon = self.config.horizon(now);
        let expired = self
            .guard
            .call("delete_older_than", self.store.delete_older_than(horizon))
            .await?;

        let trimmed = match self.config.max_records {
            Some(max_records) => {
                self.guard
                    .call("trim_to", self.store.trim_to(max_records))
                    .await?
            }
            None => 0,
        };

        Ok(ReapReport {
            horizon,
            expired,
            trimmed,
        })
    }

    /// Get the reaper configuration.
    /// Guard wrapping this reaper's store calls.
    pub fn guard(&self) -> &StoreGuard {
        &self.guard
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }
}

impl<S> RetentionReaper<S>
where
    S: EventStore + 'static,
{
    /// Start reaping periodically.
    ///
    /// The first run happens immediately, then one per `every`. Ticks missed
    /// while a slow run was in progress are skipped, not replayed.
    ///
    /// # Errors
    /// `ZeroInterval` if `every` is zero.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn start(
        self: Arc<Self>,
        every: Duration,
    ) -> Result<ReaperHandle, ReaperConfigError> {
        if every.is_zero() {
            return Err(ReaperConfigError::ZeroInterval);
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        // Failures are already logged and counted by run_once.
                        let _ = self.run_now().await;
                    }
                }
            }
            tracing::debug!("retention reaper stopped");
        });

        Ok(ReaperHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle,
        })
    }
}

/// Error returned when the background reaper fails to stop cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// The reaper task panicked or was aborted
    #[error("reaper task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Handle to a running background reaper.
///
/// Dropping the handle leaves the task running; call
/// [`shutdown`](Self::shutdown) to stop it.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the task after the current run (if any) finishes.
    ///
    /// # Errors
    /// `TaskFailed` if the task panicked.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The receiver is gone only if the task already ended.
            let _ = tx.send(());
        }
        self.join_handle.await?;
        Ok(())
    }

    /// True once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}
