//! Results handed back to the HTTP layer.

use crate::domain::agency::AgencyName;
use crate::domain::event::StoredEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of an admission.
///
/// The set is closed: every well-formed submission that reaches the store
/// ends in exactly one of these. Infrastructure failures are errors, never
/// outcomes.
///
/// Serializes with an `outcome` tag:
/// `{"outcome": "denied", "agency": "X", "total": 2, "limit": 2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    /// Caller declined priority; nothing consumed
    Skipped {
        agency: AgencyName,
        total: u64,
        limit: u32,
    },
    /// External reference already granted; nothing consumed
    Duplicate {
        agency: AgencyName,
        total: u64,
        limit: u32,
    },
    /// Weekly limit already reached
    Denied {
        agency: AgencyName,
        total: u64,
        limit: u32,
    },
    /// Quota consumed; `total` includes the new event
    Granted {
        agency: AgencyName,
        total: u64,
        limit: u32,
        event: StoredEvent,
    },
}

impl AdmissionOutcome {
    /// The normalized agency.
    pub fn agency(&self) -> &AgencyName {
        match self {
            Self::Skipped { agency, .. }
            | Self::Duplicate { agency, .. }
            | Self::Denied { agency, .. }
            | Self::Granted { agency, .. } => agency,
        }
    }

    /// Events counted in the current window after this admission.
    pub fn total(&self) -> u64 {
        match self {
            Self::Skipped { total, .. }
            | Self::Duplicate { total, .. }
            | Self::Denied { total, .. }
            | Self::Granted { total, .. } => *total,
        }
    }

    /// The agency's weekly limit.
    pub fn limit(&self) -> u32 {
        match self {
            Self::Skipped { limit, .. }
            | Self::Duplicate { limit, .. }
            | Self::Denied { limit, .. }
            | Self::Granted { limit, .. } => *limit,
        }
    }

    /// Short name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Duplicate { .. } => "duplicate",
            Self::Denied { .. } => "denied",
            Self::Granted { .. } => "granted",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Answer to a quota query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub agency: AgencyName,
    pub total_this_week: u64,
    pub limit: u32,
    pub limit_reached: bool,
}

impl QuotaStatus {
    pub fn new(agency: AgencyName, total_this_week: u64, limit: u32) -> Self {
        Self {
            agency,
            total_this_week,
            limit,
            limit_reached: total_this_week >= u64::from(limit),
        }
    }

    /// Admissions left this week.
    pub fn remaining(&self) -> u64 {
        u64::from(self.limit).saturating_sub(self.total_this_week)
    }
}

/// Store introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub total_stored_events: u64,
    pub current_window_start: DateTime<Utc>,
}
