//! Fixed-capacity map with least-recently-used eviction.
//!
//! A thin layer over [`lru::LruCache`]. Plain lookups never change recency;
//! only inserts and explicit [`LruArena::touch`] calls do, so the routing and
//! transfer tables decide for themselves what counts as a use.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Bounded key/value store that evicts the least recently used entry when full
#[derive(Debug)]
pub struct LruArena<K: Hash + Eq, V> {
    cache: LruCache<K, V>,
}

impl<K, V> LruArena<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty arena holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Whether the arena is at capacity
    pub fn is_full(&self) -> bool {
        self.cache.len() >= self.capacity()
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &K) -> bool {
        self.cache.contains(key)
    }

    /// Look up without changing recency
    pub fn get(&self, key: &K) -> Option<&V> {
        self.cache.peek(key)
    }

    /// Mutable lookup without changing recency
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.cache.peek_mut(key)
    }

    /// Mark `key` as most recently used. Returns false if absent.
    pub fn touch(&mut self, key: &K) -> bool {
        if !self.cache.contains(key) {
            return false;
        }
        self.cache.promote(key);
        true
    }

    /// Insert or replace, marking the entry most recently used.
    ///
    /// Returns the displaced entry: the previous value stored under `key`, or
    /// the least recently used entry if room had to be made.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        self.cache.push(key, value)
    }

    /// Remove `key`
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.cache.pop(key)
    }

    /// Least recently used entry, without removing it
    pub fn peek_lru(&self) -> Option<(&K, &V)> {
        self.cache.peek_lru()
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        self.cache.pop_lru()
    }

    /// Keep only entries for which `keep` returns true; returns the removed ones
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let doomed: Vec<K> = self
            .cache
            .iter_mut()
            .filter_map(|(k, v)| (!keep(k, v)).then(|| k.clone()))
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| self.cache.pop_entry(&key))
            .collect()
    }

    /// Iterate without changing recency
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.cache.iter()
    }

    /// Mutable iteration (recency is not changed)
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.cache.iter_mut()
    }

    /// Iterate from most to least recently used
    pub fn iter_recent(&self) -> impl Iterator<Item = (&K, &V)> {
        self.cache.iter()
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
