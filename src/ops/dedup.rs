//! Bounded memory of hits already delivered.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::model::HitKey;

/// Default number of hit identities remembered.
pub const DEFAULT_DEDUP_CAPACITY: usize = 2048;

/// LRU set of hit identities. Once full, the least recently seen identity
/// is forgotten, so a duplicate arriving much later can slip through.
pub struct HitDedupCache {
    seen: LruCache<HitKey, ()>,
}

impl HitDedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Record `key`; returns `false` if it was already present.
    pub fn first_sighting(&mut self, key: HitKey) -> bool {
        if self.seen.get(&key).is_some() {
            return false;
        }
        self.seen.put(key, ());
        true
    }

    /// Whether `key` was seen, without touching recency.
    pub fn contains(&self, key: &HitKey) -> bool {
        self.seen.contains(key)
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for HitDedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: i32, part: Option<&str>) -> HitKey {
        HitKey {
            item_id: id,
            part: part.map(str::to_string),
        }
    }

    #[test]
    fn test_second_sighting_is_rejected() {
        let mut cache = HitDedupCache::default();
        assert!(cache.first_sighting(key(1, None)));
        assert!(!cache.first_sighting(key(1, None)));
        assert!(cache.first_sighting(key(1, Some("2"))));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_least_recent_identity_is_evicted() {
        let mut cache = HitDedupCache::new(2);
        cache.first_sighting(key(1, None));
        cache.first_sighting(key(2, None));
        // touching 1 makes 2 the eviction candidate
        assert!(!cache.first_sighting(key(1, None)));
        cache.first_sighting(key(3, None));
        assert!(cache.contains(&key(1, None)));
        assert!(!cache.contains(&key(2, None)));
    }

    #[test]
    fn test_zero_capacity_still_works() {
        let mut cache = HitDedupCache::new(0);
        assert!(cache.first_sighting(key(1, None)));
        assert!(!cache.first_sighting(key(1, None)));
    }
}
