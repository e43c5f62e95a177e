//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain rules against the event store:
//! - Admission engine (the only component that decides)
//! - Retention reaper (background cleanup)
//! - Per-agency locks, store call guard, circuit breaker, metrics
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod circuit_breaker;
pub mod engine;
pub mod guard;
pub mod locks;
pub mod metrics;
pub mod ports;
pub mod reaper;
