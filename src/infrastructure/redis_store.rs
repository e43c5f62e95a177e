//! Redis-backed event store.
//!
//! Lets several service instances share one quota ledger.
//!
//! ## Layout
//!
//! All keys start with a configurable prefix (`priority-quota:` by default):
//!
//! - `events`: hash, id → bincode-encoded [`NewEvent`]
//! - `created`: sorted set of every id, scored by `created_at` (µs)
//! - `agency:{NAME}`: sorted set of one agency's ids, same score
//! - `owner`: hash, id → agency name
//! - `ref_of`: hash, id → external reference
//! - `refs`: hash, external reference → id
//! - `seq`: id counter
//!
//! Appends and deletions run as Lua scripts, so each operation is atomic
//! with respect to every other client. Agency keys are derived inside the
//! scripts, which requires a single Redis node (not Redis Cluster).
//!
//! ## Example
//!
//! ```rust,ignore
//! use priority_quota::{RedisEventStore, RedisEventStoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RedisEventStoreConfig {
//!         key_prefix: "quota:".to_string(),
//!     };
//!     let store = RedisEventStore::connect_with_config("redis://127.0.0.1/", config)
//!         .await
//!         .expect("Failed to connect to Redis");
//! }
//! ```

use crate::application::ports::{Clock, EventStore, StoreError};
use crate::domain::{
    agency::AgencyName,
    event::{EventId, NewEvent, StoredEvent},
};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::DEFAULT_KEY_PREFIX;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;
use std::sync::Arc;

/// Ids removed per script invocation.
const PURGE_BATCH: usize = 500;

const APPEND_SCRIPT: &str = r"
local id = redis.call('INCR', KEYS[1])
if ARGV[3] ~= '' then
  if redis.call('HSETNX', KEYS[2], ARGV[3], id) == 0 then
    return {0, ''}
  end
  redis.call('HSET', KEYS[6], id, ARGV[3])
end
local created = ARGV[2]
local last = redis.call('ZRANGE', KEYS[3], -1, -1, 'WITHSCORES')
if last[2] and tonumber(last[2]) > tonumber(created) then
  created = last[2]
end
redis.call('HSET', KEYS[4], id, ARGV[1])
redis.call('HSET', KEYS[7], id, ARGV[4])
redis.call('ZADD', KEYS[3], created, id)
redis.call('ZADD', KEYS[5], created, id)
return {id, created}
";

const PURGE_SCRIPT: &str = r"
local removed = 0
for i = 2, #ARGV do
  local id = ARGV[i]
  if redis.call('ZREM', KEYS[1], id) == 1 then
    removed = removed + 1
    local agency = redis.call('HGET', KEYS[3], id)
    if agency then
      redis.call('ZREM', ARGV[1] .. agency, id)
    end
    local ref = redis.call('HGET', KEYS[4], id)
    if ref and redis.call('HGET', KEYS[5], ref) == id then
      redis.call('HDEL', KEYS[5], ref)
    end
    redis.call('HDEL', KEYS[2], id)
    redis.call('HDEL', KEYS[3], id)
    redis.call('HDEL', KEYS[4], id)
  end
end
return removed
";

/// Configuration for the Redis event store.
#[derive(Debug, Clone)]
pub struct RedisEventStoreConfig {
    /// Key prefix for Redis keys (default: "priority-quota:")
    pub key_prefix: String,
}

impl Default for RedisEventStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// Event store shared through Redis.
///
/// Each operation clones the multiplexed connection manager and drops it
/// when done. `created_at` is stamped from the local clock and then raised,
/// if needed, to keep each agency's timestamps non-decreasing.
#[derive(Clone)]
pub struct RedisEventStore {
    connection: ConnectionManager,
    config: RedisEventStoreConfig,
    clock: Arc<dyn Clock>,
    append: Script,
    purge: Script,
}

impl fmt::Debug for RedisEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEventStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisEventStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisEventStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisEventStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            config,
            clock: Arc::new(SystemClock::new()),
            append: Script::new(APPEND_SCRIPT),
            purge: Script::new(PURGE_SCRIPT),
        })
    }

    /// Stamp `created_at` from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RedisEventStoreConfig {
        &self.config
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.config.key_prefix, suffix)
    }

    fn agency_prefix(&self) -> String {
        self.key("agency:")
    }

    fn agency_key(&self, agency: &AgencyName) -> String {
        format!("{}{}", self.agency_prefix(), agency)
    }

    async fn purge_ids(&self, operation: &'static str, ids: Vec<u64>) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let agency_prefix = self.agency_prefix();
        let mut removed = 0;

        for batch in ids.chunks(PURGE_BATCH) {
            let mut invocation = self.purge.prepare_invoke();
            invocation
                .key(self.key("created"))
                .key(self.key("events"))
                .key(self.key("owner"))
                .key(self.key("ref_of"))
                .key(self.key("refs"))
                .arg(&agency_prefix);
            for id in batch {
                invocation.arg(id);
            }
            let count: u64 = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| StoreError::connection(operation, e))?;
            removed += count;
        }

        Ok(removed)
    }
}

fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

fn from_score(score: f64) -> Result<DateTime<Utc>, StoreError> {
    let micros = score as i64;
    DateTime::from_timestamp(
        micros.div_euclid(1_000_000),
        (micros.rem_euclid(1_000_000) * 1_000) as u32,
    )
    .ok_or_else(|| StoreError::Corrupted(format!("score {} is not a timestamp", score)))
}

fn decode(id: u64, bytes: Option<Vec<u8>>) -> Result<NewEvent, StoreError> {
    let bytes = bytes.ok_or_else(|| StoreError::Corrupted(format!("event {} has no payload", id)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| StoreError::Corrupted(format!("event {}: {}", id, e)))
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn count_granted(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        conn.zcount(self.agency_key(agency), to_micros(since), "+inf")
            .await
            .map_err(|e| StoreError::connection("count_granted", e))
    }

    async fn exists_by_external_ref(&self, external_ref: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        conn.hexists(self.key("refs"), external_ref)
            .await
            .map_err(|e| StoreError::connection("exists_by_external_ref", e))
    }

    async fn append(&self, event: NewEvent) -> Result<StoredEvent, StoreError> {
        let payload =
            bincode::serialize(&event).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        let now = to_micros(self.clock.now());
        let reference = event.external_ref.clone().unwrap_or_default();

        let mut conn = self.connection.clone();
        let (id, created): (u64, String) = self
            .append
            .key(self.key("seq"))
            .key(self.key("refs"))
            .key(self.agency_key(&event.agency))
            .key(self.key("events"))
            .key(self.key("created"))
            .key(self.key("ref_of"))
            .key(self.key("owner"))
            .arg(payload)
            .arg(now)
            .arg(&reference)
            .arg(event.agency.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::connection("append", e))?;

        if id == 0 {
            return Err(StoreError::DuplicateReference(reference));
        }

        let score: f64 = created
            .parse()
            .map_err(|_| StoreError::Corrupted(format!("created_at {:?} is not a score", created)))?;
        Ok(event.into_stored(EventId::new(id), from_score(score)?))
    }

    async fn delete_older_than(&self, horizon: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<u64> = conn
            .zrangebyscore(self.key("created"), "-inf", format!("({}", to_micros(horizon)))
            .await
            .map_err(|e| StoreError::connection("delete_older_than", e))?;
        self.purge_ids("delete_older_than", ids).await
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        conn.zcard(self.key("created"))
            .await
            .map_err(|e| StoreError::connection("count_all", e))
    }

    async fn list_since(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut conn = self.connection.clone();
        let scored: Vec<(u64, f64)> = conn
            .zrangebyscore_withscores(self.agency_key(agency), to_micros(since), "+inf")
            .await
            .map_err(|e| StoreError::connection("list_since", e))?;
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<u64> = scored.iter().map(|(id, _)| *id).collect();
        let payloads: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
            .arg(self.key("events"))
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::connection("list_since", e))?;

        scored
            .into_iter()
            .zip(payloads)
            .map(|((id, score), bytes)| {
                let event = decode(id, bytes)?;
                Ok(event.into_stored(EventId::new(id), from_score(score)?))
            })
            .collect()
    }

    async fn delete_agency(&self, agency: &AgencyName) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<u64> = conn
            .zrange(self.agency_key(agency), 0, -1)
            .await
            .map_err(|e| StoreError::connection("delete_agency", e))?;
        self.purge_ids("delete_agency", ids).await
    }

    async fn trim_to(&self, max_records: u64) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let total: u64 = conn
            .zcard(self.key("created"))
            .await
            .map_err(|e| StoreError::connection("trim_to", e))?;
        let excess = total.saturating_sub(max_records);
        if excess == 0 {
            return Ok(0);
        }

        let last = isize::try_from(excess - 1).unwrap_or(isize::MAX);
        let ids: Vec<u64> = conn
            .zrange(self.key("created"), 0, last)
            .await
            .map_err(|e| StoreError::connection("trim_to", e))?;
        self.purge_ids("trim_to", ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_score_conversion_keeps_microseconds() {
        let at = Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let score = to_micros(at) as f64;
        assert_eq!(from_score(score).unwrap(), at);
    }

    #[test]
    fn test_missing_payload_is_corruption() {
        assert!(matches!(decode(7, None), Err(StoreError::Corrupted(_))));
        assert!(matches!(
            decode(7, Some(vec![0xff])),
            Err(StoreError::Corrupted(_))
        ));
    }

    #[test]
    fn test_key_layout() {
        let config = RedisEventStoreConfig::default();
        assert_eq!(config.key_prefix, "priority-quota:");
    }
}
