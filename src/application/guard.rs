//! Bounded, breaker-guarded store calls.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::Metrics;
use crate::application::ports::StoreError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps every store call with a timeout and the circuit breaker.
#[derive(Debug, Clone)]
pub struct StoreGuard {
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
    timeout: Duration,
}

impl StoreGuard {
    pub fn new(breaker: Arc<CircuitBreaker>, metrics: Metrics, timeout: Duration) -> Self {
        Self {
            breaker,
            metrics,
            timeout,
        }
    }

    /// Run `call` unless the breaker is open, bounded by the timeout.
    ///
    /// A timeout becomes `StoreError::Timeout`. Answers that prove the store
    /// is reachable (`DuplicateReference`, `Corrupted`) do not count against
    /// the breaker. If this future is dropped mid-call while it holds the
    /// half-open probe, the breaker reopens rather than waiting forever for
    /// the answer.
    pub async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let Some(permit) = self.breaker.acquire() else {
            self.metrics.record_store_failure();
            tracing::debug!(operation, "event store circuit open, failing fast");
            return Err(StoreError::CircuitOpen { operation });
        };

        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                elapsed: self.timeout,
            }),
        };

        match &result {
            Ok(_) | Err(StoreError::DuplicateReference(_)) | Err(StoreError::Corrupted(_)) => {
                permit.succeed();
            }
            Err(e) => {
                permit.fail();
                self.metrics.record_store_failure();
                tracing::warn!(error = %e, operation, "event store call failed");
            }
        }

        result
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::{CircuitBreakerConfig, CircuitState};

    fn guard(timeout: Duration) -> StoreGuard {
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }));
        StoreGuard::new(breaker, Metrics::new(), timeout)
    }

    #[tokio::test]
    async fn test_passes_through_success() {
        let guard = guard(Duration::from_secs(1));
        let value = guard.call("count_all", async { Ok::<_, StoreError>(3) }).await;
        assert_eq!(value, Ok(3));
        assert_eq!(guard.metrics.store_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_store_error() {
        let guard = guard(Duration::from_millis(50));
        let result = guard
            .call("count_granted", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<u64, StoreError>(0)
            })
            .await;

        assert_eq!(
            result,
            Err(StoreError::Timeout {
                operation: "count_granted",
                elapsed: Duration::from_millis(50)
            })
        );
        assert_eq!(guard.metrics.store_failures(), 1);
    }

    #[tokio::test]
    async fn test_failures_open_breaker_and_fail_fast() {
        let guard = guard(Duration::from_secs(1));
        for _ in 0..2 {
            let _ = guard
                .call("append", async {
                    Err::<(), _>(StoreError::connection("append", "refused"))
                })
                .await;
        }
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        let result = guard.call("append", async { Ok::<_, StoreError>(()) }).await;
        assert_eq!(result, Err(StoreError::CircuitOpen { operation: "append" }));
        assert_eq!(guard.metrics.store_failures(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_half_open_call_reopens_breaker() {
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
        }));
        let guard = StoreGuard::new(breaker, Metrics::new(), Duration::from_secs(5));
        let _ = guard
            .call("count_granted", async {
                Err::<u64, _>(StoreError::connection("count_granted", "refused"))
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            guard.call("count_granted", std::future::pending::<Result<u64, StoreError>>()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = guard
            .call("count_granted", async { Ok::<_, StoreError>(1) })
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_duplicate_reference_does_not_trip_breaker() {
        let guard = guard(Duration::from_secs(1));
        for _ in 0..5 {
            let _ = guard
                .call("append", async {
                    Err::<(), _>(StoreError::DuplicateReference("r".into()))
                })
                .await;
        }
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
        assert_eq!(guard.metrics.store_failures(), 0);
    }
}
