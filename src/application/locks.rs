//! Per-agency admission locks.
//!
//! Counting and appending are two store calls. Holding the agency's lock
//! across both keeps two concurrent admissions for the same agency from
//! observing the same total and both appending past the limit. Different
//! agencies use different locks and never wait on each other.

use crate::domain::agency::AgencyName;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard for one agency's admission section. Released on drop.
pub type AgencyGuard = OwnedMutexGuard<()>;

/// Sharded map of async mutexes keyed by agency.
#[derive(Debug, Clone, Default)]
pub struct AgencyLocks {
    locks: Arc<DashMap<AgencyName, Arc<Mutex<()>>, RandomState>>,
}

impl AgencyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `agency`'s admission section.
    pub async fn acquire(&self, agency: &AgencyName) -> AgencyGuard {
        // Clone the Arc out so the shard lock is not held across the await.
        let lock = self
            .locks
            .entry(agency.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // Strong count 1 means only the map references it.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Number of agencies with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn agency(name: &str) -> AgencyName {
        AgencyName::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_same_agency_is_exclusive() {
        let locks = AgencyLocks::new();
        let a = agency("a");

        let guard = locks.acquire(&a).await;
        let pending = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&a)).await;
        assert!(pending.is_err(), "second acquire should wait");

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(200), locks.acquire(&a)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_normalized_names_share_a_lock() {
        let locks = AgencyLocks::new();
        let _guard = locks.acquire(&agency("Cresol Vera")).await;

        let pending =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire(&agency(" cresol vera")))
                .await;
        assert!(pending.is_err());
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_agencies_do_not_contend() {
        let locks = AgencyLocks::new();
        let _a = locks.acquire(&agency("a")).await;

        let b = tokio::time::timeout(Duration::from_millis(200), locks.acquire(&agency("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = AgencyLocks::new();
        let held = locks.acquire(&agency("held")).await;
        drop(locks.acquire(&agency("idle")).await);

        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune_idle(), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_critical_section_never_overlaps() {
        let locks = AgencyLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&agency("shared")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
