//! Quota service facade.
//!
//! [`QuotaService`] is what an HTTP layer holds. It owns the admission
//! engine, the retention reaper and the reaper's background task. They share
//! the clock, the agency locks and the metrics. Each has its own circuit
//! breaker, so a struggling reap cannot shut off admissions.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::engine::AdmissionEngine;
use crate::application::guard::{StoreGuard, DEFAULT_STORE_TIMEOUT};
use crate::application::locks::AgencyLocks;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, EventStore};
use crate::application::reaper::{
    ReapOutcome, ReaperConfig, ReaperConfigError, ReaperHandle, RetentionReaper, ShutdownError,
    DEFAULT_RETENTION,
};
use crate::domain::{
    event::StoredEvent,
    limits::{LimitRegistry, LimitRegistryBuilder},
    outcome::{AdmissionOutcome, QuotaStatus, StoreStatus},
    request::SubmitRequest,
};
use crate::error::QuotaError;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::{ConfigError, QuotaConfig, DEFAULT_REAP_INTERVAL};
use crate::infrastructure::memory_store::MemoryEventStore;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Builder for constructing a [`QuotaService`].
///
/// Settings are validated when a `build*` method is called.
#[derive(Debug)]
pub struct QuotaServiceBuilder {
    limits: LimitRegistryBuilder,
    clock: Option<Arc<dyn Clock>>,
    store_timeout: Duration,
    retention: Duration,
    max_records: Option<u64>,
    reap_interval: Option<Duration>,
    breaker: CircuitBreakerConfig,
}

impl Default for QuotaServiceBuilder {
    fn default() -> Self {
        Self {
            limits: LimitRegistry::builder(),
            clock: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            retention: DEFAULT_RETENTION,
            max_records: None,
            reap_interval: Some(DEFAULT_REAP_INTERVAL),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl QuotaServiceBuilder {
    /// Start from environment-style configuration.
    ///
    /// The store target in `config` is not used here; it only matters to
    /// constructors that connect to a store.
    pub fn from_config(config: &QuotaConfig) -> Self {
        let mut builder = Self::default()
            .with_default_limit(config.default_limit)
            .with_agency_limits(
                config
                    .agency_limits
                    .iter()
                    .map(|(agency, limit)| (agency.clone(), *limit)),
            )
            .with_store_timeout(config.store_timeout)
            .with_retention(config.retention);
        builder.max_records = config.max_records;
        builder.reap_interval = config.reap_interval;
        builder
    }

    /// Set the limit for agencies without an explicit entry (default 2).
    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.limits = self.limits.with_default(limit);
        self
    }

    /// Set one agency's weekly limit.
    pub fn with_agency_limit(mut self, agency: impl Into<String>, limit: u32) -> Self {
        self.limits = self.limits.with_limit(agency, limit);
        self
    }

    /// Set many agencies' weekly limits.
    pub fn with_agency_limits<I, K>(mut self, limits: I) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
        K: Into<String>,
    {
        self.limits = self.limits.with_limits(limits);
        self
    }

    /// Set a custom clock (mainly for testing).
    ///
    /// When building with an external store, the store must stamp events
    /// from this same clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Upper bound for each store call (default 5s).
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Age after which events are reaped (default 14 days).
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Cap the number of stored events; the reaper deletes the oldest
    /// beyond it.
    pub fn with_max_records(mut self, max_records: u64) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// How often the background reaper runs (default 1 hour).
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = Some(interval);
        self
    }

    /// Do not spawn the background reaper; call
    /// [`QuotaService::reap_now`] instead.
    pub fn without_background_reaper(mut self) -> Self {
        self.reap_interval = None;
        self
    }

    /// Tune the store circuit breaker.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Build a service over the in-process store.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn build_in_memory(mut self) -> Result<QuotaService<MemoryEventStore>, ConfigError> {
        let clock = self
            .clock
            .get_or_insert_with(|| Arc::new(SystemClock::new()))
            .clone();
        self.build(MemoryEventStore::new(clock))
    }

    /// Build a service over `store`.
    ///
    /// Starts the background reaper unless it was disabled, which requires a
    /// running tokio runtime.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid or background
    /// reaping was requested outside a runtime.
    pub fn build<S>(self, store: S) -> Result<QuotaService<S>, ConfigError>
    where
        S: EventStore + 'static,
    {
        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroStoreTimeout);
        }
        let limits = Arc::new(self.limits.build()?);

        let mut reaper_config = ReaperConfig::new(self.retention)?;
        if let Some(max_records) = self.max_records {
            reaper_config = reaper_config.with_max_records(max_records)?;
        }
        if self.reap_interval.is_some_and(|every| every.is_zero()) {
            return Err(ReaperConfigError::ZeroInterval.into());
        }
        if self.reap_interval.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(ConfigError::NoRuntime);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let store = Arc::new(store);
        let metrics = Metrics::new();
        let locks = AgencyLocks::new();
        let guard = StoreGuard::new(
            Arc::new(CircuitBreaker::with_config(self.breaker.clone())),
            metrics.clone(),
            self.store_timeout,
        );
        let reaper_guard = StoreGuard::new(
            Arc::new(CircuitBreaker::with_config(self.breaker)),
            metrics.clone(),
            self.store_timeout,
        );

        let engine = AdmissionEngine::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&limits),
            locks.clone(),
            guard,
            metrics.clone(),
        );
        let reaper = Arc::new(RetentionReaper::new(
            store,
            clock,
            reaper_config,
            reaper_guard,
            locks,
            metrics,
        ));

        let reaper_handle = match self.reap_interval {
            Some(every) => Some(Arc::clone(&reaper).start(every)?),
            None => None,
        };

        tracing::info!(
            default_limit = limits.default_limit().get(),
            agency_limits = limits.len(),
            store_timeout_ms = u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX),
            reap_interval_secs = self.reap_interval.map(|d| d.as_secs()),
            "quota service started"
        );

        Ok(QuotaService {
            engine,
            reaper,
            reaper_handle: Arc::new(Mutex::new(reaper_handle)),
        })
    }
}

/// Weekly per-agency priority quota service.
///
/// Cheap to clone; clones share all state.
pub struct QuotaService<S>
where
    S: EventStore,
{
    engine: AdmissionEngine<S>,
    reaper: Arc<RetentionReaper<S>>,
    reaper_handle: Arc<Mutex<Option<ReaperHandle>>>,
}

impl<S> Clone for QuotaService<S>
where
    S: EventStore,
{
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            reaper: Arc::clone(&self.reaper),
            reaper_handle: Arc::clone(&self.reaper_handle),
        }
    }
}

impl<S> std::fmt::Debug for QuotaService<S>
where
    S: EventStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaService")
            .field("engine", &self.engine)
            .field("reaper", &self.reaper)
            .finish_non_exhaustive()
    }
}

impl QuotaService<MemoryEventStore> {
    /// Create a builder for configuring the service.
    ///
    /// Defaults:
    /// - Default weekly limit: 2, no per-agency entries
    /// - Store timeout: 5 seconds
    /// - Retention: 14 days, no capacity cap
    /// - Background reaper: every hour
    pub fn builder() -> QuotaServiceBuilder {
        QuotaServiceBuilder::default()
    }
}

#[cfg(feature = "redis-storage")]
impl QuotaService<crate::infrastructure::redis_store::RedisEventStore> {
    /// Connect to the Redis named by `config` and build a service over it.
    ///
    /// # Errors
    /// `MissingStoreTarget` without a URL, `StoreConnect` if Redis cannot be
    /// reached, or any other `ConfigError` from validation.
    pub async fn connect(config: &QuotaConfig) -> Result<Self, ConfigError> {
        use crate::infrastructure::redis_store::{RedisEventStore, RedisEventStoreConfig};

        config.validate()?;
        let url = config.require_store_target()?;
        let store = RedisEventStore::connect_with_config(
            url,
            RedisEventStoreConfig {
                key_prefix: config.key_prefix.clone(),
            },
        )
        .await
        .map_err(|e| ConfigError::StoreConnect(e.to_string()))?;

        QuotaServiceBuilder::from_config(config).build(store)
    }
}

impl<S> QuotaService<S>
where
    S: EventStore,
{
    /// Evaluate a submission. See [`AdmissionEngine::submit`].
    pub async fn submit(&self, request: SubmitRequest) -> Result<AdmissionOutcome, QuotaError> {
        self.engine.submit(request).await
    }

    /// Current usage for `agency`.
    pub async fn query(&self, agency: &str) -> Result<QuotaStatus, QuotaError> {
        self.engine.query(agency).await
    }

    /// Total stored events and the current window start.
    pub async fn status(&self) -> Result<StoreStatus, QuotaError> {
        self.engine.status().await
    }

    /// Events granted to `agency` this week, oldest first.
    pub async fn history(&self, agency: &str) -> Result<Vec<StoredEvent>, QuotaError> {
        self.engine.history(agency).await
    }

    /// Delete every event for `agency`.
    pub async fn purge_agency(&self, agency: &str) -> Result<u64, QuotaError> {
        self.engine.purge_agency(agency).await
    }

    /// Run the retention reaper now, outside its schedule.
    pub async fn reap_now(&self) -> Result<ReapOutcome, QuotaError> {
        Ok(self.reaper.run_now().await?)
    }

    pub fn metrics(&self) -> &Metrics {
        self.engine.metrics()
    }

    pub fn limits(&self) -> &LimitRegistry {
        self.engine.limits()
    }

    /// Get a reference to the circuit breaker guarding admission store calls.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        self.engine.guard().breaker()
    }

    /// The reaper's own circuit breaker.
    pub fn reaper_circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        self.reaper.guard().breaker()
    }

    pub fn engine(&self) -> &AdmissionEngine<S> {
        &self.engine
    }

    /// True while the background reaper task is running.
    pub fn is_reaping(&self) -> bool {
        self.reaper_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background reaper, if running. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the reaper task panicked.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        // Release the lock before awaiting.
        let handle = self
            .reaper_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.shutdown().await?;
            tracing::info!("quota service stopped");
        }
        Ok(())
    }
}
