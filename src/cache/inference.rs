//! Inference Cache.
//!
//! Bounded, TTL'd store of complete per-segment [`AudioBuffer`]s, keyed by
//! the fingerprint in [`super::key::inference_key`]. Values are only ever
//! audio that has already passed [`crate::audio::AudioBuffer::is_usable`].

use crate::audio::AudioBuffer;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct Entry {
    buffer: AudioBuffer,
    inserted_at: Instant,
}

/// Bounded, concurrent, TTL'd cache of synthesized segment audio.
pub struct InferenceCache {
    capacity: usize,
    ttl: Duration,
    entries: DashMap<String, Entry>,
    recency: Mutex<VecDeque<String>>,
}

impl InferenceCache {
    /// Build a cache with the given capacity and entry TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: DashMap::new(),
            recency: Mutex::new(VecDeque::new()),
        }
    }

    /// Look up `key`. Expired entries are evicted lazily and treated as a
    /// miss. On hit, the entry is marked most-recently-used.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<AudioBuffer> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            self.entries.remove(key);
            return None;
        }

        let hit = self.entries.get(key).map(|e| e.buffer.clone());
        if hit.is_some() {
            self.touch(key);
        }
        hit
    }

    /// Insert `buffer` under `key`. Only usable buffers should be inserted;
    /// callers are expected to have already validated via
    /// [`crate::audio::AudioBuffer::is_usable`].
    pub fn put(&self, key: String, buffer: AudioBuffer) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(
            key.clone(),
            Entry {
                buffer,
                inserted_at: Instant::now(),
            },
        );
        self.touch(&key);
    }

    /// Sweep and remove all entries past their TTL. Invoked lazily on
    /// [`get`](Self::get) and periodically by the Keep-Alive Service.
    pub fn cleanup_expired(&self) {
        let ttl = self.ttl;
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.inserted_at.elapsed() > ttl)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.entries.remove(&key);
            let mut ring = self.recency.lock();
            if let Some(pos) = ring.iter().position(|k| k == &key) {
                ring.remove(pos);
            }
        }
    }

    /// Current number of (possibly not-yet-swept-expired) entries.
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
