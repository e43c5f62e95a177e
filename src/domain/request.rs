//! Inbound submissions and their validation.
//!
//! Validation is the first step of every admission and never touches the
//! store. A request that fails here is the caller's fault and is not worth
//! retrying.

use crate::domain::agency::AgencyName;
use serde::{Deserialize, Serialize};

/// Error returned when a submission or query is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Agency missing or blank
    #[error("field 'agency' is required and must not be blank")]
    EmptyAgency,
    /// Priority flag missing
    #[error("field 'wants_priority' is required")]
    MissingPriorityFlag,
    /// Payload could not be decoded (e.g. a non-boolean priority flag)
    #[error("malformed submission: {0}")]
    MalformedPayload(String),
}

/// Raw submission as received from the HTTP layer.
///
/// `wants_priority` is optional here so a missing flag can be reported as a
/// validation failure instead of a decode error.
///
/// # Example
/// ```
/// use priority_quota::SubmitRequest;
///
/// let request = SubmitRequest::from_json(
///     r#"{"agency": "cresol vera", "wants_priority": true, "external_ref": "P-1"}"#,
/// )
/// .unwrap();
/// let submission = request.validate().unwrap();
///
/// assert_eq!(submission.agency.as_str(), "CRESOL VERA");
/// assert!(submission.wants_priority);
/// assert_eq!(submission.external_ref.as_deref(), Some("P-1"));
///
/// assert!(SubmitRequest::from_json(r#"{"agency": "x", "wants_priority": "maybe"}"#).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub agency: String,
    #[serde(default)]
    pub wants_priority: Option<bool>,
    #[serde(default)]
    pub external_ref: Option<String>,
}

impl SubmitRequest {
    /// Request asking to consume one unit of quota.
    pub fn priority(agency: impl Into<String>) -> Self {
        Self {
            agency: agency.into(),
            wants_priority: Some(true),
            external_ref: None,
        }
    }

    /// Request recording that the caller declines priority.
    pub fn skip(agency: impl Into<String>) -> Self {
        Self {
            agency: agency.into(),
            wants_priority: Some(false),
            external_ref: None,
        }
    }

    /// Attach an external process identifier for idempotent retries.
    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    /// Decode a JSON payload.
    ///
    /// # Errors
    /// Returns `ValidationError::MalformedPayload` if the payload is not a
    /// JSON object of the expected shape.
    pub fn from_json(payload: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(payload).map_err(|e| ValidationError::MalformedPayload(e.to_string()))
    }

    /// Check required fields and normalize.
    ///
    /// # Errors
    /// Returns `ValidationError` for a blank agency or a missing flag.
    pub fn validate(self) -> Result<Submission, ValidationError> {
        let agency = AgencyName::parse(&self.agency).ok_or(ValidationError::EmptyAgency)?;
        let wants_priority = self
            .wants_priority
            .ok_or(ValidationError::MissingPriorityFlag)?;
        let external_ref = self
            .external_ref
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        Ok(Submission {
            agency,
            wants_priority,
            external_ref,
        })
    }
}

/// A validated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub agency: AgencyName,
    pub wants_priority: bool,
    /// Trimmed, never empty when present
    pub external_ref: Option<String>,
}
