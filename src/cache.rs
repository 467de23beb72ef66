//! Size-capped concurrent cache
//!
//! Used for contract lookups that are expensive but stable (proxy masters,
//! code hashes) and for the acceptor's handled-request set. The cache is
//! cleared wholesale once the cap is reached.

use dashmap::DashMap;
use std::hash::Hash;

pub struct BoundedCache<K, V> {
    entries: DashMap<K, V>,
    capacity: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&self, key: K, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.entries.clear();
        }
        self.entries.insert(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
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
    use super::*;

    #[test]
    fn test_clears_on_overflow() {
        let cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.len(), 2);

        // Overwriting an existing key does not count as growth
        cache.insert("a", 10);
        assert_eq!(cache.get(&"a"), Some(10));

        cache.insert("c", 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }
}
