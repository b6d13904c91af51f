// libs/appointment-cell/src/services/locks.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::models::BucketKey;

/// Entries beyond this count trigger a sweep of idle locks.
const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per `(doctor, day)` bucket.
///
/// Counting a bucket and writing the resulting numbers must happen under the
/// bucket's guard. Multi-bucket callers lock in key order, so two reschedules
/// crossing the same pair of days cannot deadlock.
#[derive(Default)]
pub struct BucketLocks {
    slots: Mutex<HashMap<BucketKey, Arc<Mutex<()>>>>,
}

/// Holds every bucket it was acquired for until dropped.
pub struct BucketGuard {
    keys: Vec<BucketKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl BucketGuard {
    pub fn keys(&self) -> &[BucketKey] {
        &self.keys
    }
}

impl BucketLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: BucketKey) -> BucketGuard {
        self.acquire_all(vec![key]).await
    }

    pub async fn acquire_all(&self, mut keys: Vec<BucketKey>) -> BucketGuard {
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut slots = self.slots.lock().await;
            if slots.len() > PRUNE_THRESHOLD {
                // Only the map holds an idle lock; anyone waiting or locked holds a clone.
                slots.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            keys.iter()
                .map(|key| Arc::clone(slots.entry(*key).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        debug!("Locked buckets {:?}", keys);
        BucketGuard { keys, _guards: guards }
    }

    /// Number of buckets with a lock entry, idle or not.
    pub async fn tracked(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;
    use uuid::Uuid;

    fn key(day: u32) -> BucketKey {
        BucketKey::new(Uuid::nil(), NaiveDate::from_ymd_opt(2024, 6, day).unwrap())
    }

    #[tokio::test]
    async fn same_bucket_is_exclusive() {
        let locks = Arc::new(BucketLocks::new());
        let guard = locks.acquire(key(2)).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(key(2)).await.keys().to_vec() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), vec![key(2)]);
    }

    #[tokio::test]
    async fn different_buckets_do_not_block() {
        let locks = BucketLocks::new();
        let _first = locks.acquire(key(2)).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.acquire(key(3))).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn pair_is_sorted_and_deduplicated() {
        let locks = BucketLocks::new();
        let guard = locks.acquire_all(vec![key(9), key(2), key(9)]).await;
        assert_eq!(guard.keys(), &[key(2), key(9)]);
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = BucketLocks::new();
        for day in 0..(PRUNE_THRESHOLD as i64 + 10) {
            let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(day);
            drop(locks.acquire(BucketKey::new(Uuid::nil(), date)).await);
        }
        assert!(locks.tracked().await <= PRUNE_THRESHOLD + 1);
    }
}
