//! Primer Micro-Cache.
//!
//! Bounded LRU of fully-encoded primer audio, keyed by
//! `(primer_text, voice, speed, lang)`. A hit lets the Streaming Engine
//! emit the first segment's audio before any G2P or inference work begins
//! — the dominant contributor to sub-10ms repeat TTFA.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded, concurrent LRU cache of primer audio samples.
pub struct PrimerCache {
    capacity: usize,
    entries: DashMap<String, Vec<f32>>,
    recency: Mutex<VecDeque<String>>,
}

impl PrimerCache {
    /// Build a cache with the given entry capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: DashMap::new(),
            recency: Mutex::new(VecDeque::new()),
        }
    }

    /// Look up `key`, marking it most-recently-used on hit.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let hit = self.entries.get(key).map(|v| v.clone());
        if hit.is_some() {
            self.touch(key);
        }
        hit
    }

    /// Insert `samples` under `key`, evicting the least-recently-used entry
    /// first if at capacity.
    pub fn put(&self, key: String, samples: Vec<f32>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(key.clone(), samples);
        self.touch(&key);
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&self, key: &str) {
        let mut ring = self.recency.lock();
        if let Some(pos) = ring.iter().position(|k| k == key) {
            ring.remove(pos);
        }
        ring.push_back(key.to_owned());
    }

    fn evict_one(&self) {
        let victim = {
            let mut ring = self.recency.lock();
            ring.pop_front()
        };
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = PrimerCache::new(4);
        cache.put("k1".into(), vec![0.1, 0.2, 0.3]);
        assert_eq!(cache.get("k1"), Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn miss_returns_none() {
        let cache = PrimerCache::new(4);
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = PrimerCache::new(2);
        cache.put("a".into(), vec![1.0]);
        cache.put("b".into(), vec![2.0]);
        cache.put("c".into(), vec![3.0]); // evicts "a"
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(vec![2.0]));
        assert_eq!(cache.get("c"), Some(vec![3.0]));
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = PrimerCache::new(2);
        cache.put("a".into(), vec![1.0]);
        cache.put("b".into(), vec![2.0]);
        let _ = cache.get("a"); // "a" now most-recently-used
        cache.put("c".into(), vec![3.0]); // should evict "b", not "a"
        assert_eq!(cache.get("a"), Some(vec![1.0]));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn len_and_is_empty_track_entries() {
        let cache = PrimerCache::new(4);
        assert!(cache.is_empty());
        cache.put("a".into(), vec![1.0]);
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }
}
