//! In-process event store.
//!
//! Events are sharded by agency in a `DashMap`, so operations on different
//! agencies lock different shards. Each agency's events are kept in
//! insertion order, which is also `created_at` order.

use crate::application::ports::{Clock, EventStore, StoreError};
use crate::domain::{
    agency::AgencyName,
    event::{EventId, NewEvent, StoredEvent},
};
use ahash::{HashSet, HashSetExt, RandomState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe event store backed by DashMap.
///
/// Not durable; suitable for a single process and for tests.
#[derive(Debug)]
pub struct MemoryEventStore {
    events: DashMap<AgencyName, Vec<StoredEvent>, RandomState>,
    refs: DashMap<String, EventId, RandomState>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryEventStore {
    /// Create an empty store stamping `created_at` from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: DashMap::with_hasher(RandomState::new()),
            refs: DashMap::with_hasher(RandomState::new()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Number of agencies with at least one stored event.
    pub fn agency_count(&self) -> usize {
        self.events.len()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.events.clear();
        self.refs.clear();
    }

    fn forget_refs<'a>(&self, removed: impl IntoIterator<Item = &'a StoredEvent>) {
        for event in removed {
            if let Some(reference) = &event.external_ref {
                self.refs.remove_if(reference, |_, id| *id == event.id);
            }
        }
    }

    fn remove_where(&self, mut doomed: impl FnMut(&StoredEvent) -> bool) -> u64 {
        let mut removed = Vec::new();
        for mut entry in self.events.iter_mut() {
            let events = entry.value_mut();
            let (gone, kept): (Vec<_>, Vec<_>) = events.drain(..).partition(|e| doomed(e));
            *events = kept;
            removed.extend(gone);
        }
        self.events.retain(|_, events| !events.is_empty());
        self.forget_refs(&removed);
        removed.len() as u64
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn count_granted(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count = self.events.get(agency).map_or(0, |events| {
            let first = events.partition_point(|e| e.created_at < since);
            events.len() - first
        });
        Ok(count as u64)
    }

    async fn exists_by_external_ref(&self, external_ref: &str) -> Result<bool, StoreError> {
        Ok(self.refs.contains_key(external_ref))
    }

    async fn append(&self, event: NewEvent) -> Result<StoredEvent, StoreError> {
        let id = EventId::new(self.next_id.fetch_add(1, Ordering::Relaxed));

        if let Some(reference) = &event.external_ref {
            match self.refs.entry(reference.clone()) {
                Entry::Occupied(_) => {
                    return Err(StoreError::DuplicateReference(reference.clone()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }

        let mut events = self.events.entry(event.agency.clone()).or_default();
        let now = self.clock.now();
        let created_at = events
            .last()
            .map_or(now, |last| now.max(last.created_at));
        let stored = event.into_stored(id, created_at);
        events.push(stored.clone());
        Ok(stored)
    }

    async fn delete_older_than(&self, horizon: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.remove_where(|e| e.created_at < horizon))
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        let total: usize = self.events.iter().map(|entry| entry.value().len()).sum();
        Ok(total as u64)
    }

    async fn list_since(
        &self,
        agency: &AgencyName,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let events = self.events.get(agency).map_or_else(Vec::new, |events| {
            let first = events.partition_point(|e| e.created_at < since);
            events[first..].to_vec()
        });
        Ok(events)
    }

    async fn delete_agency(&self, agency: &AgencyName) -> Result<u64, StoreError> {
        let Some((_, removed)) = self.events.remove(agency) else {
            return Ok(0);
        };
        self.forget_refs(&removed);
        Ok(removed.len() as u64)
    }

    async fn trim_to(&self, max_records: u64) -> Result<u64, StoreError> {
        let mut all: Vec<(DateTime<Utc>, EventId)> = self
            .events
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|e| (e.created_at, e.id))
                    .collect::<Vec<_>>()
            })
            .collect();

        let excess = (all.len() as u64).saturating_sub(max_records) as usize;
        if excess == 0 {
            return Ok(0);
        }

        all.sort_unstable();
        let mut doomed = HashSet::with_capacity(excess);
        doomed.extend(all.into_iter().take(excess).map(|(_, id)| id));
        Ok(self.remove_where(|e| doomed.contains(&e.id)))
    }
}
