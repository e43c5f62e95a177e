//! Granted priority events.

use crate::domain::agency::AgencyName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decision recorded on a stored event.
///
/// Only granted admissions are ever persisted; the store holds consumed
/// quota, never denials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Granted,
}

/// An event about to be appended. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub agency: AgencyName,
    pub external_ref: Option<String>,
    pub decision: Decision,
}

impl NewEvent {
    /// A granted event for `agency`.
    pub fn granted(agency: AgencyName, external_ref: Option<String>) -> Self {
        Self {
            agency,
            external_ref,
            decision: Decision::Granted,
        }
    }

    /// Attach the identity the store assigned.
    pub fn into_stored(self, id: EventId, created_at: DateTime<Utc>) -> StoredEvent {
        StoredEvent {
            id,
            agency: self.agency,
            external_ref: self.external_ref,
            decision: self.decision,
            created_at,
        }
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,
    pub agency: AgencyName,
    pub external_ref: Option<String>,
    pub decision: Decision,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stored_event_json_shape() {
        let created = Utc.with_ymd_and_hms(2024, 5, 13, 9, 0, 0).unwrap();
        let event = NewEvent::granted(
            AgencyName::parse("palmas").unwrap(),
            Some("proc-7".to_string()),
        )
        .into_stored(EventId::new(42), created);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["agency"], "PALMAS");
        assert_eq!(json["external_ref"], "proc-7");
        assert_eq!(json["decision"], "granted");
        assert_eq!(json["created_at"], "2024-05-13T09:00:00Z");
    }
}
