//! # priority-quota
//!
//! Weekly per-agency priority quota admission.
//!
//! Each agency may mark a limited number of submissions per calendar week as
//! priority. Every submission states whether it wants priority; the engine
//! answers with one of four outcomes:
//!
//! - **Granted**: priority was given and one unit of quota was consumed
//! - **Denied**: the agency already used its quota this week
//! - **Duplicate**: this external process reference was already granted
//! - **Skipped**: the submission did not ask for priority
//!
//! Weeks start Monday 00:00:00 UTC. Agencies are compared after trimming and
//! uppercasing, so `"Cresol Palmas"` and `" CRESOL PALMAS "` share a quota.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use priority_quota::{QuotaService, SubmitRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = QuotaService::builder()
//!     .with_default_limit(2)
//!     .with_agency_limit("CRESOL PALMAS", 3)
//!     .build_in_memory()?;
//!
//! let outcome = service
//!     .submit(SubmitRequest::priority("Cresol Palmas").with_external_ref("proc-42"))
//!     .await?;
//! println!("{}", serde_json::to_string(&outcome)?);
//!
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Window Arithmetic
//!
//! ```rust
//! use priority_quota::Window;
//! use chrono::{TimeZone, Utc};
//!
//! let sunday_night = Utc.with_ymd_and_hms(2024, 5, 19, 23, 59, 59).unwrap();
//! let monday = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap();
//!
//! assert!(!Window::current(monday).contains(sunday_night));
//! assert_eq!(Window::current(sunday_night).next_start(), monday);
//! ```
//!
//! ## Wire Format
//!
//! ```rust
//! use priority_quota::SubmitRequest;
//!
//! let request = SubmitRequest::from_json(
//!     r#"{"agency": "cresol vera", "wants_priority": true, "external_ref": "p-1"}"#,
//! )
//! .unwrap();
//! let submission = request.validate().unwrap();
//! assert_eq!(submission.agency.as_str(), "CRESOL VERA");
//! ```
//!
//! ## Storage
//!
//! - [`MemoryEventStore`]: sharded in-process map, the default
//! - `RedisEventStore`: shared across instances (feature `redis-storage`)
//!
//! Any type implementing [`EventStore`] can be plugged in with
//! [`QuotaServiceBuilder::build`].
//!
//! ## Failure Handling
//!
//! Store calls are bounded by a timeout and guarded by a circuit breaker.
//! A store that cannot answer always yields
//! [`QuotaError::StoreUnavailable`], never a guessed outcome.
//!
//! ## Retention
//!
//! A background reaper deletes events older than 14 days (hourly by default)
//! and, optionally, the oldest events beyond a capacity cap.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

pub mod error;

// Re-export commonly used types for convenience
pub use domain::{
    agency::AgencyName,
    event::{Decision, EventId, NewEvent, StoredEvent},
    limits::{LimitError, LimitRegistry, LimitRegistryBuilder, DEFAULT_WEEKLY_LIMIT},
    outcome::{AdmissionOutcome, QuotaStatus, StoreStatus},
    request::{SubmitRequest, Submission, ValidationError},
    window::Window,
};

pub use application::{
    circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState},
    engine::AdmissionEngine,
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, EventStore, StoreError},
    reaper::{ReapOutcome, ReapReport, ReaperConfig, ReaperConfigError, ShutdownError},
};

pub use error::QuotaError;

pub use infrastructure::{
    clock::SystemClock,
    config::{ConfigError, QuotaConfig},
    memory_store::MemoryEventStore,
    service::{QuotaService, QuotaServiceBuilder},
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisEventStore, RedisEventStoreConfig};
