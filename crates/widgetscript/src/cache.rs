//! Bounded least-recently-used cache
//!
//! Backed by an insertion-ordered map: the front holds the least recently used
//! entry, every hit moves its entry to the back.

use std::hash::Hash;

use crate::types::FxIndexMap;

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: FxIndexMap<K, V>,
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: FxIndexMap::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key`, marking it as most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let (key, value) = self.entries.shift_remove_entry(key)?;
        let (index, _) = self.entries.insert_full(key, value);
        self.entries.get_index(index).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert `value`, evicting the least recently used entry when full
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.entries.shift_remove(&key);
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
