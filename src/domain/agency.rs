//! Agency identity.
//!
//! Every comparison the quota engine makes (limit lookup, counting, locking)
//! goes through [`AgencyName`], so two spellings of the same agency can never
//! be accounted separately.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized agency name.
///
/// Normalization trims surrounding whitespace and uppercases the rest, so
/// `"  Cresol Palmas "` and `"CRESOL PALMAS"` are the same agency. The inner
/// string is never empty.
///
/// # Example
/// ```
/// use priority_quota::AgencyName;
///
/// let a = AgencyName::parse(" cresol palmas ").unwrap();
/// let b = AgencyName::parse("CRESOL PALMAS").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "CRESOL PALMAS");
///
/// assert!(AgencyName::parse("   ").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgencyName(String);

impl AgencyName {
    /// Normalize a raw agency name.
    ///
    /// Returns `None` if nothing is left after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    /// The normalized name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgencyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AgencyName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgencyName {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or("agency name must not be empty")
    }
}

impl From<AgencyName> for String {
    fn from(name: AgencyName) -> Self {
        name.0
    }
}
