//! Domain layer - pure quota rules with no I/O.
//!
//! - Agency name normalization
//! - Weekly window arithmetic (UTC, Monday-anchored)
//! - The immutable per-agency limit table
//! - Events, submissions and admission outcomes
//!
//! Everything here is synchronous and can be tested without a runtime.

pub mod agency;
pub mod event;
pub mod limits;
pub mod outcome;
pub mod request;
pub mod window;
