//! Per-agency weekly limits.

use crate::domain::agency::AgencyName;
use std::collections::HashMap;
use std::num::NonZeroU32;

/// Limit applied to agencies without an explicit entry.
pub const DEFAULT_WEEKLY_LIMIT: u32 = 2;

const DEFAULT_LIMIT: NonZeroU32 = match NonZeroU32::new(DEFAULT_WEEKLY_LIMIT) {
    Some(limit) => limit,
    None => panic!("DEFAULT_WEEKLY_LIMIT must be non-zero"),
};

/// Error returned when a limit table is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The default limit must be at least 1
    #[error("default weekly limit must be greater than 0")]
    ZeroDefault,
    /// A per-agency limit must be at least 1
    #[error("weekly limit for agency {agency:?} must be greater than 0")]
    ZeroLimit { agency: String },
    /// An entry had no name left after normalization
    #[error("agency name in limit table must not be empty")]
    EmptyAgency,
}

/// Immutable mapping from agency to its weekly quota.
///
/// Built once at startup and shared by reference; lookups need no
/// synchronization.
///
/// # Example
/// ```
/// use priority_quota::{AgencyName, LimitRegistry};
///
/// let registry = LimitRegistry::builder()
///     .with_default(2)
///     .with_limit("Cresol Palmas", 3)
///     .build()
///     .unwrap();
///
/// let palmas = AgencyName::parse("CRESOL PALMAS").unwrap();
/// let other = AgencyName::parse("somewhere else").unwrap();
/// assert_eq!(registry.limit_for(&palmas).get(), 3);
/// assert_eq!(registry.limit_for(&other).get(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct LimitRegistry {
    default_limit: NonZeroU32,
    limits: HashMap<AgencyName, NonZeroU32>,
}

impl LimitRegistry {
    /// Registry where every agency gets `default_limit`.
    pub fn with_default(default_limit: NonZeroU32) -> Self {
        Self {
            default_limit,
            limits: HashMap::new(),
        }
    }

    /// Start building a registry.
    pub fn builder() -> LimitRegistryBuilder {
        LimitRegistryBuilder {
            default_limit: DEFAULT_WEEKLY_LIMIT,
            entries: Vec::new(),
        }
    }

    /// Weekly limit for `agency`, falling back to the default.
    pub fn limit_for(&self, agency: &AgencyName) -> NonZeroU32 {
        self.limits
            .get(agency)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// The fallback limit.
    pub fn default_limit(&self) -> NonZeroU32 {
        self.default_limit
    }

    /// Number of agencies with an explicit limit.
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// True if only the default applies.
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

impl Default for LimitRegistry {
    fn default() -> Self {
        Self::with_default(DEFAULT_LIMIT)
    }
}

/// Builder for [`LimitRegistry`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct LimitRegistryBuilder {
    default_limit: u32,
    entries: Vec<(String, u32)>,
}

impl LimitRegistryBuilder {
    /// Set the fallback limit.
    pub fn with_default(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    /// Add a per-agency limit. Later entries win over earlier ones that
    /// normalize to the same name.
    pub fn with_limit(mut self, agency: impl Into<String>, limit: u32) -> Self {
        self.entries.push((agency.into(), limit));
        self
    }

    /// Add many per-agency limits.
    pub fn with_limits<I, K>(mut self, limits: I) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
        K: Into<String>,
    {
        self.entries
            .extend(limits.into_iter().map(|(agency, limit)| (agency.into(), limit)));
        self
    }

    /// Validate and freeze the table.
    ///
    /// # Errors
    /// Returns `LimitError` if the default or any entry is zero, or if an
    /// agency name is blank.
    pub fn build(self) -> Result<LimitRegistry, LimitError> {
        let default_limit = NonZeroU32::new(self.default_limit).ok_or(LimitError::ZeroDefault)?;

        let mut limits = HashMap::with_capacity(self.entries.len());
        for (raw, limit) in self.entries {
            let agency = AgencyName::parse(&raw).ok_or(LimitError::EmptyAgency)?;
            let limit = NonZeroU32::new(limit).ok_or_else(|| LimitError::ZeroLimit {
                agency: agency.to_string(),
            })?;
            limits.insert(agency, limit);
        }

        Ok(LimitRegistry {
            default_limit,
            limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agency(name: &str) -> AgencyName {
        AgencyName::parse(name).unwrap()
    }

    #[test]
    fn test_default_registry_uses_two() {
        let registry = LimitRegistry::default();
        assert_eq!(registry.limit_for(&agency("anyone")).get(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_is_normalized() {
        let registry = LimitRegistry::builder()
            .with_limit("  cresol sinop ", 5)
            .build()
            .unwrap();

        assert_eq!(registry.limit_for(&agency("CRESOL SINOP")).get(), 5);
        assert_eq!(registry.limit_for(&agency("Cresol Sinop")).get(), 5);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_last_duplicate_wins() {
        let registry = LimitRegistry::builder()
            .with_limits([("vera", 3), ("VERA", 4)])
            .build()
            .unwrap();

        assert_eq!(registry.limit_for(&agency("vera")).get(), 4);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zero_default_rejected() {
        let result = LimitRegistry::builder().with_default(0).build();
        assert_eq!(result.unwrap_err(), LimitError::ZeroDefault);
    }

    #[test]
    fn test_zero_entry_rejected() {
        let result = LimitRegistry::builder().with_limit("juina", 0).build();
        assert_eq!(
            result.unwrap_err(),
            LimitError::ZeroLimit {
                agency: "JUINA".to_string()
            }
        );
    }

    #[test]
    fn test_blank_agency_rejected() {
        let result = LimitRegistry::builder().with_limit("  ", 3).build();
        assert_eq!(result.unwrap_err(), LimitError::EmptyAgency);
    }

    #[test]
    fn test_concurrent_lookups() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(
            LimitRegistry::builder()
                .with_limit("a", 7)
                .build()
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.limit_for(&agency("a")).get())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
    }
}
