//! Bounded LRU cache of network evaluations keyed by board hash.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use tengen_core::NUM_INTERSECTIONS;

/// One network evaluation, in the orientation of the querying state.
#[derive(Debug, Clone)]
pub struct Netresult {
    /// Softmax mass per intersection, identity orientation.
    pub policy: [f32; NUM_INTERSECTIONS],
    /// Softmax mass for the pass move.
    pub policy_pass: f32,
    /// Win probability for the side to move.
    pub value: f32,
    /// SAI score logit (α); winrate logit halves for LZ networks.
    pub alpha: f32,
    /// Sigmoid steepness below α = 0.
    pub beta: f32,
    /// Sigmoid steepness above α = 0; −1 means "same as β".
    pub beta2: f32,
    /// Whether the producing network had a SAI value head.
    pub is_sai: bool,
}

impl Default for Netresult {
    fn default() -> Self {
        Netresult {
            policy: [0.0; NUM_INTERSECTIONS],
            policy_pass: 0.0,
            value: 0.0,
            alpha: 0.0,
            beta: 1.0,
            beta2: -1.0,
            is_sai: false,
        }
    }
}

struct Entry {
    result: Netresult,
    stamp: u64,
}

struct CacheInner {
    map: FxHashMap<u64, Entry>,
    /// Access order with lazy deletion: stale `(hash, stamp)` pairs are
    /// skipped at eviction time.
    order: VecDeque<(u64, u64)>,
    capacity: usize,
    next_stamp: u64,
    hits: u64,
    lookups: u64,
}

impl CacheInner {
    fn touch(&mut self, hash: u64) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.order.push_back((hash, stamp));
        stamp
    }

    fn evict_to_capacity(&mut self) {
        while self.map.len() > self.capacity {
            let Some((hash, stamp)) = self.order.pop_front() else {
                break;
            };
            let live = self.map.get(&hash).map(|e| e.stamp) == Some(stamp);
            if live {
                self.map.remove(&hash);
            }
        }
    }
}

/// Thread-safe LRU mapping from board hash to [`Netresult`].
pub struct EvalCache {
    inner: Mutex<CacheInner>,
}

/// Cache size used when caching is disabled by configuration.
pub const MIN_CACHE_COUNT: usize = 10;

impl EvalCache {
    pub fn new(capacity: usize) -> EvalCache {
        EvalCache {
            inner: Mutex::new(CacheInner {
                map: FxHashMap::default(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
                next_stamp: 0,
                hits: 0,
                lookups: 0,
            }),
        }
    }

    /// Size the cache from the planned playout budget: cache hits come
    /// mostly from the last few moves, so a few entries per playout suffice.
    pub fn resize_from_playouts(&self, playouts: usize) {
        self.resize((3 * playouts).clamp(6_000, 150_000));
    }

    pub fn lookup(&self, hash: u64) -> Option<Netresult> {
        let mut inner = self.inner.lock();
        inner.lookups += 1;
        let result = match inner.map.get(&hash) {
            Some(entry) => entry.result.clone(),
            None => return None,
        };
        inner.hits += 1;
        let stamp = inner.touch(hash);
        if let Some(entry) = inner.map.get_mut(&hash) {
            entry.stamp = stamp;
        }
        Some(result)
    }

    /// Insert or overwrite. An AVERAGE-ensemble result may shadow an earlier
    /// single-symmetry entry; accepted approximation.
    pub fn insert(&self, hash: u64, result: Netresult) {
        let mut inner = self.inner.lock();
        let stamp = inner.touch(hash);
        inner.map.insert(hash, Entry { result, stamp });
        inner.evict_to_capacity();
    }

    pub fn resize(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity.max(1);
        inner.evict_to_capacity();
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate resident bytes.
    pub fn estimated_size(&self) -> usize {
        self.len() * (std::mem::size_of::<Netresult>() + std::mem::size_of::<(u64, u64)>() * 2)
    }

    /// `(hits, lookups)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.lookups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_value(value: f32) -> Netresult {
        Netresult {
            value,
            ..Netresult::default()
        }
    }

    #[test]
    fn lookup_miss_then_hit() {
        let cache = EvalCache::new(8);
        assert!(cache.lookup(1).is_none());
        cache.insert(1, result_with_value(0.25));
        let hit = cache.lookup(1).expect("cached");
        assert_eq!(hit.value, 0.25);
        assert_eq!(cache.stats(), (1, 2));
    }

    #[test]
    fn eviction_is_least_recently_used() {
        let cache = EvalCache::new(2);
        cache.insert(1, result_with_value(0.1));
        cache.insert(2, result_with_value(0.2));
        // Touch 1 so 2 becomes the eviction candidate.
        assert!(cache.lookup(1).is_some());
        cache.insert(3, result_with_value(0.3));
        assert!(cache.lookup(1).is_some());
        assert!(cache.lookup(2).is_none());
        assert!(cache.lookup(3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn insert_overwrites_existing_entry() {
        let cache = EvalCache::new(4);
        cache.insert(7, result_with_value(0.5));
        cache.insert(7, result_with_value(0.9));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(7).unwrap().value, 0.9);
    }

    #[test]
    fn resize_shrinks_to_capacity() {
        let cache = EvalCache::new(16);
        for h in 0..10u64 {
            cache.insert(h, result_with_value(h as f32));
        }
        cache.resize(3);
        assert_eq!(cache.len(), 3);
        // The newest entries survive.
        assert!(cache.lookup(9).is_some());
        assert!(cache.lookup(0).is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let cache = EvalCache::new(4);
        cache.insert(1, Netresult::default());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.estimated_size(), 0);
    }

    #[test]
    fn playout_sizing_is_clamped() {
        let cache = EvalCache::new(1);
        cache.resize_from_playouts(10);
        // floor
        cache.insert(1, Netresult::default());
        assert!(cache.lookup(1).is_some());
        let huge = EvalCache::new(1);
        huge.resize_from_playouts(10_000_000);
        // capped well below 3 * playouts; just confirm inserts stay bounded
        for h in 0..100u64 {
            huge.insert(h, Netresult::default());
        }
        assert_eq!(huge.len(), 100);
    }
}
