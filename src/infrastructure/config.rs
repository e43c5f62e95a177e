//! Startup configuration.
//!
//! Values come from the process environment (or any lookup function, for
//! tests). Every problem is reported as a [`ConfigError`] before a service
//! is constructed.

use crate::application::guard::DEFAULT_STORE_TIMEOUT;
use crate::application::reaper::{ReaperConfig, ReaperConfigError, DEFAULT_RETENTION};
use crate::domain::limits::{LimitError, LimitRegistry, DEFAULT_WEEKLY_LIMIT};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_REDIS_URL: &str = "QUOTA_REDIS_URL";
pub const ENV_DEFAULT_LIMIT: &str = "QUOTA_DEFAULT_LIMIT";
pub const ENV_AGENCY_LIMITS: &str = "QUOTA_AGENCY_LIMITS";
pub const ENV_RETENTION_DAYS: &str = "QUOTA_RETENTION_DAYS";
pub const ENV_REAP_INTERVAL_SECS: &str = "QUOTA_REAP_INTERVAL_SECS";
pub const ENV_STORE_TIMEOUT_MS: &str = "QUOTA_STORE_TIMEOUT_MS";
pub const ENV_MAX_RECORDS: &str = "QUOTA_MAX_RECORDS";
pub const ENV_KEY_PREFIX: &str = "QUOTA_KEY_PREFIX";

/// How often the background reaper runs unless configured otherwise.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Prefix for every Redis key the store touches.
pub const DEFAULT_KEY_PREFIX: &str = "priority-quota:";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Error returned when startup configuration is invalid.
///
/// Fatal: no service is built when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No store connection target was configured
    #[error("QUOTA_REDIS_URL must be set to reach the event store")]
    MissingStoreTarget,
    /// A variable could not be parsed
    #[error("{key}={value:?} is invalid, expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    /// The agency limit table is not a JSON object of name to count
    #[error("invalid agency limit table: {0}")]
    InvalidLimitTable(String),
    /// The limit table failed validation
    #[error(transparent)]
    Limits(#[from] LimitError),
    /// Retention settings failed validation
    #[error(transparent)]
    Reaper(#[from] ReaperConfigError),
    /// Store timeout must be positive
    #[error("store timeout must be greater than 0")]
    ZeroStoreTimeout,
    /// Background reaping needs a tokio runtime
    #[error("background reaping requires a running tokio runtime")]
    NoRuntime,
    /// The store could not be reached at startup
    #[error("could not connect to the event store: {0}")]
    StoreConnect(String),
}

/// Service settings.
///
/// `Default` gives the documented defaults with no store target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Redis connection URL
    pub redis_url: Option<String>,
    pub default_limit: u32,
    /// Per-agency limits, raw names as configured
    pub agency_limits: BTreeMap<String, u32>,
    pub retention: Duration,
    /// `None` disables the background reaper
    pub reap_interval: Option<Duration>,
    pub store_timeout: Duration,
    /// `None` means no capacity cap
    pub max_records: Option<u64>,
    pub key_prefix: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            default_limit: DEFAULT_WEEKLY_LIMIT,
            agency_limits: BTreeMap::new(),
            retention: DEFAULT_RETENTION,
            reap_interval: Some(DEFAULT_REAP_INTERVAL),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            max_records: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl QuotaConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// `ConfigError` if any variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Unset and blank variables take
    /// their defaults.
    ///
    /// # Errors
    /// `ConfigError` if any variable is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        config.redis_url = get(ENV_REDIS_URL);

        if let Some(limit) = parse(
            ENV_DEFAULT_LIMIT,
            get(ENV_DEFAULT_LIMIT),
            "a positive integer",
        )? {
            config.default_limit = limit;
        }

        if let Some(table) = get(ENV_AGENCY_LIMITS) {
            config.agency_limits = serde_json::from_str(&table)
                .map_err(|e| ConfigError::InvalidLimitTable(e.to_string()))?;
        }

        if let Some(days) = parse::<u64>(
            ENV_RETENTION_DAYS,
            get(ENV_RETENTION_DAYS),
            "a number of days",
        )? {
            config.retention = Duration::from_secs(days.saturating_mul(SECS_PER_DAY));
        }

        if let Some(secs) = parse::<u64>(
            ENV_REAP_INTERVAL_SECS,
            get(ENV_REAP_INTERVAL_SECS),
            "a number of seconds",
        )? {
            config.reap_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(ms) = parse::<u64>(
            ENV_STORE_TIMEOUT_MS,
            get(ENV_STORE_TIMEOUT_MS),
            "a number of milliseconds",
        )? {
            config.store_timeout = Duration::from_millis(ms);
        }

        config.max_records = parse(ENV_MAX_RECORDS, get(ENV_MAX_RECORDS), "a positive integer")?;

        if let Some(prefix) = get(ENV_KEY_PREFIX) {
            config.key_prefix = prefix;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check everything that does not need a store.
    ///
    /// # Errors
    /// The first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroStoreTimeout);
        }
        self.limit_registry()?;
        self.reaper_config()?;
        Ok(())
    }

    /// The store URL, required by networked stores.
    ///
    /// # Errors
    /// `MissingStoreTarget` if none was configured.
    pub fn require_store_target(&self) -> Result<&str, ConfigError> {
        self.redis_url
            .as_deref()
            .ok_or(ConfigError::MissingStoreTarget)
    }

    /// Build the immutable limit table.
    ///
    /// # Errors
    /// `Limits` if the table fails validation.
    pub fn limit_registry(&self) -> Result<LimitRegistry, ConfigError> {
        let registry = LimitRegistry::builder()
            .with_default(self.default_limit)
            .with_limits(self.agency_limits.iter().map(|(k, v)| (k.as_str(), *v)))
            .build()?;
        Ok(registry)
    }

    /// Build the reaper settings.
    ///
    /// # Errors
    /// `Reaper` if retention or the capacity cap is invalid.
    pub fn reaper_config(&self) -> Result<ReaperConfig, ConfigError> {
        let mut reaper = ReaperConfig::new(self.retention)?;
        if let Some(max_records) = self.max_records {
            reaper = reaper.with_max_records(max_records)?;
        }
        Ok(reaper)
    }
}

fn parse<T: FromStr>(
    key: &'static str,
    raw: Option<String>,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value,
            expected,
        })
    })
    .transpose()
}
