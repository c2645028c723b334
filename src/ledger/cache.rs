/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A key-value cache bounded by entry age and entry count.

use std::{
    hash::Hash,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;

/// Cache that forgets entries older than `max_age`, and evicts the least recently used entry once it
/// holds more than `max_depth` entries.
pub struct BoundedCache<K: Hash + Eq, V> {
    entries: LruCache<K, (Instant, V)>,
    max_age: Duration,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// A `max_depth` of 0 is treated as 1.
    pub fn new(max_age: Duration, max_depth: usize) -> Self {
        let max_depth = NonZeroUsize::new(max_depth).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(max_depth),
            max_age,
        }
    }

    /// Get the value cached for `key`, unless it has expired. A hit counts as a use.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let (inserted_at, value) = self.entries.get(key)?;
        if inserted_at.elapsed() <= self.max_age {
            return Some(value.clone());
        }
        self.entries.pop(key);
        None
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.put(key, (Instant::now(), value));
    }

    pub fn remove(&mut self, key: &K) {
        self.entries.pop(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn evicts_least_recently_used_beyond_depth() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));

        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn forgets_entries_older_than_max_age() {
        let mut cache = BoundedCache::new(Duration::from_millis(20), 8);
        cache.insert(1u8, "one");
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinserting_replaces_the_value() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 2);
        cache.insert(7u32, Some(vec![1u8]));
        cache.insert(7u32, None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&7), Some(None));

        cache.clear();
        assert_eq!(cache.get(&7), None);
    }

    #[test]
    fn zero_depth_holds_one_entry() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 0);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"b"), Some(2));

        cache.remove(&"b");
        assert!(cache.is_empty());
        assert_eq!(cache.get(&"b"), None);
    }
}
