//! Circuit breaker around event store calls.
//!
//! After `failure_threshold` consecutive store failures the breaker opens and
//! admissions fail fast with `StoreError::CircuitOpen` instead of queueing on
//! a dead store. After `recovery_timeout` one probe call is let through; its
//! result closes or reopens the breaker.
//!
//! The breaker only ever turns a call into an error. It never produces an
//! admission outcome on its own.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls go through
    Closed = 0,
    /// Store calls are rejected without being attempted
    Open = 1,
    /// A single probe call is in flight
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before a probe is allowed
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(10),
        }
    }
}

/// Lock-free circuit breaker.
///
/// The engine and the reaper each get their own, so reaper timeouts never
/// open the breaker in front of admissions.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    opened_at_nanos: AtomicU64,
    rejected: AtomicU64,
    config: CircuitBreakerConfig,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            opened_at_nanos: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            config,
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Decide whether a store call may be attempted.
    ///
    /// While open, returns `false` until the recovery timeout elapses; then
    /// exactly one caller wins the transition to half-open and gets `true`.
    /// Further callers are rejected until the probe reports back, so a caller
    /// that wins the probe must call `record_success` or `record_failure`.
    /// Prefer [`acquire`](Self::acquire), which reports an abandoned probe
    /// on drop.
    pub fn try_acquire(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`try_acquire`](Self::try_acquire), returning a permit for the
    /// call.
    pub fn acquire(&self) -> Option<CallPermit<'_>> {
        self.admit().map(|probe| CallPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    /// `Some(true)` for the half-open probe, `Some(false)` for a normal call.
    fn admit(&self) -> Option<bool> {
        match self.state() {
            CircuitState::Closed => Some(false),
            CircuitState::HalfOpen => self.reject(),
            CircuitState::Open => {
                if self.elapsed_since_open() < self.config.recovery_timeout {
                    return self.reject();
                }
                let won = self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if won {
                    Some(true)
                } else {
                    self.reject()
                }
            }
        }
    }

    /// Report a call that completed (successfully or with a definite answer).
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
    }

    /// Report a call that failed to reach the store.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let reopen = match self.state() {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= u64::from(self.config.failure_threshold),
            CircuitState::Open => false,
        };
        if reopen {
            self.open();
        }
    }

    /// Number of consecutive failures observed.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Calls rejected without reaching the store.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        self.record_success();
    }

    fn open(&self) {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.opened_at_nanos.store(nanos, Ordering::Release);
        self.state.store(CircuitState::Open as u8, Ordering::Release);
    }

    fn elapsed_since_open(&self) -> Duration {
        let opened_at = self.epoch + Duration::from_nanos(self.opened_at_nanos.load(Ordering::Acquire));
        Instant::now().saturating_duration_since(opened_at)
    }

    fn reject(&self) -> Option<bool> {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// A probe went away without an answer; wait out another recovery
    /// timeout before the next one.
    fn abandon_probe(&self) {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.opened_at_nanos.store(nanos, Ordering::Release);
        let _ = self.state.compare_exchange(
            CircuitState::HalfOpen as u8,
            CircuitState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Permission to make one store call.
///
/// Report the result with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail). A half-open probe permit dropped without a report
/// (the caller was cancelled) puts the breaker back to open.
#[derive(Debug)]
#[must_use = "an unreported probe permit reopens the breaker"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// True if this call decides whether the breaker closes.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.abandon_probe();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = CircuitBreaker::with_config(fast_config());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
        assert_eq!(cb.rejected(), 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::with_config(fast_config());
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 2);
    }

    #[test]
    fn test_single_probe_after_recovery_timeout() {
        let cb = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        thread::sleep(Duration::from_millis(20));

        assert!(cb.try_acquire(), "first caller probes");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_acquire(), "second caller waits for the probe");
    }

    #[test]
    fn test_probe_success_closes() {
        let cb = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let cb = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_concurrent_probe_race_has_one_winner() {
        let cb = Arc::new(CircuitBreaker::with_config(fast_config()));
        for _ in 0..3 {
            cb.record_failure();
        }
        thread::sleep(Duration::from_millis(20));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                thread::spawn(move || cb.try_acquire())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_dropped_half_open_permit_reopens() {
        let cb = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        thread::sleep(Duration::from_millis(20));

        let probe = cb.acquire().unwrap();
        assert!(probe.is_probe());
        drop(probe);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.acquire().is_none(), "recovery timeout restarts");

        thread::sleep(Duration::from_millis(20));
        let probe = cb.acquire().unwrap();
        assert!(probe.is_probe());
        probe.succeed();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_dropped_normal_permit_changes_nothing() {
        let cb = CircuitBreaker::with_config(fast_config());
        let permit = cb.acquire().unwrap();
        assert!(!permit.is_probe());
        drop(permit);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_reset() {
        let cb = CircuitBreaker::with_config(fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }
}
