//! In-process deduplication and bookkeeping stores for the relay coordinator.
//!
//! These are explicit objects owned by the coordinator. Nothing here expires
//! on its own: pruning happens only when the scheduler calls [`ProcessedSet::prune`],
//! and the bounded caches evict the oldest entry when full.
//!
//! The destination contract's transfer record remains the source of truth for
//! "already relayed"; [`ProcessedSet`] only saves the RPC round trip.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::TransferId;

const DEFAULT_PENDING_CACHE_SIZE: usize = 50_000;

/// Transfer ids already relayed (or found relayed on-chain) by this process.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    map: HashMap<TransferId, Instant>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.map.contains_key(id)
    }

    /// Returns `true` if the id was not present before.
    pub fn insert(&mut self, id: TransferId) -> bool {
        self.map.insert(id, Instant::now()).is_none()
    }

    /// Drop entries recorded more than `max_age` ago; returns how many were removed.
    pub fn prune(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map
            .retain(|_, &mut t| now.duration_since(t) < max_age);
        before - self.map.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Bounded map keyed by transfer id with max-size eviction of the oldest entry.
///
/// Used for the relay retry queue and the permanent-failure list.
pub struct BoundedPendingCache<T> {
    map: HashMap<TransferId, (T, Instant)>,
    max_size: usize,
}

impl<T> BoundedPendingCache<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            map: HashMap::new(),
            max_size: max_size.max(1),
        }
    }

    pub fn get(&self, id: &TransferId) -> Option<&T> {
        self.map.get(id).map(|(v, _)| v)
    }

    pub fn insert(&mut self, id: TransferId, value: T) {
        let now = Instant::now();
        if !self.map.contains_key(&id) {
            while self.map.len() >= self.max_size {
                let oldest = self
                    .map
                    .iter()
                    .min_by_key(|(_, (_, t))| *t)
                    .map(|(h, _)| *h);
                match oldest {
                    Some(h) => {
                        self.map.remove(&h);
                    }
                    None => break,
                }
            }
        }
        self.map.insert(id, (value, now));
    }

    pub fn remove(&mut self, id: &TransferId) -> Option<T> {
        self.map.remove(id).map(|(v, _)| v)
    }

    /// Iterate over entries (id, value) for processing.
    pub fn iter(&self) -> impl Iterator<Item = (&TransferId, &T)> {
        self.map.iter().map(|(h, (v, _))| (h, v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<T> Default for BoundedPendingCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    #[test]
    fn test_processed_set_insert_and_contains() {
        let mut set = ProcessedSet::new();
        let id = B256::repeat_byte(1);
        assert!(!set.contains(&id));
        assert!(set.insert(id));
        assert!(set.contains(&id));
        assert!(!set.insert(id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_processed_set_prune() {
        let mut set = ProcessedSet::new();
        set.insert(B256::repeat_byte(1));
        set.insert(B256::repeat_byte(2));

        // Nothing is old enough yet
        assert_eq!(set.prune(Duration::from_secs(3600)), 0);
        assert_eq!(set.len(), 2);

        // Everything is older than zero
        assert_eq!(set.prune(Duration::ZERO), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn test_pending_cache_evicts_oldest() {
        let mut cache = BoundedPendingCache::new(2);
        cache.insert(B256::repeat_byte(1), "a");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(B256::repeat_byte(2), "b");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(B256::repeat_byte(3), "c");
        assert!(cache.get(&B256::repeat_byte(1)).is_none());
        assert_eq!(cache.get(&B256::repeat_byte(3)), Some(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_pending_cache_replace_does_not_evict() {
        let mut cache = BoundedPendingCache::new(2);
        cache.insert(B256::repeat_byte(1), 1);
        cache.insert(B256::repeat_byte(2), 2);
        cache.insert(B256::repeat_byte(2), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&B256::repeat_byte(1)), Some(&1));
        assert_eq!(cache.get(&B256::repeat_byte(2)), Some(&3));
    }

    #[test]
    fn test_pending_cache_remove() {
        let mut cache = BoundedPendingCache::new(10);
        cache.insert(B256::repeat_byte(1), 42);
        assert_eq!(cache.remove(&B256::repeat_byte(1)), Some(42));
        assert!(cache.get(&B256::repeat_byte(1)).is_none());
    }
}
