// @author:    olinex
// @time:      2023/11/04

// self mods

// use other mods
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

// use self mods
use crate::configs::CACHE_SWEEP_THRESHOLD;

/// A keyed cache of weakly held objects.
/// The cache never keeps an object alive, it only makes sure that
/// concurrent loads of the same key share one object while somebody still holds it.
/// Dead entries are removed lazily, once the mapping grows past a threshold.
pub struct SharedObjectCache<K, V> {
    /// the mapping will be swept when its length reach this value
    next_sweep: usize,
    map: BTreeMap<K, Weak<V>>,
}
impl<K: Ord, V> SharedObjectCache<K, V> {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            next_sweep: CACHE_SWEEP_THRESHOLD,
            map: BTreeMap::new(),
        }
    }

    /// Remove all the dead entries.
    /// Without force, nothing happens until the mapping holds at least the threshold of keys.
    ///
    /// # Arguments
    /// * force: sweep even if the threshold was not reached
    pub fn sweep(&mut self, force: bool) {
        if !force && self.map.len() < self.next_sweep {
            return;
        }
        self.map.retain(|_, value| value.strong_count() > 0);
        self.next_sweep = self.map.len().max(CACHE_SWEEP_THRESHOLD);
    }

    /// Insert or replace the weak handle of the key
    ///
    /// # Arguments
    /// * key: the key of the object
    /// * value: the object to be shared, only a weak handle is kept
    pub fn put(&mut self, key: K, value: &Arc<V>) {
        self.map.insert(key, Arc::downgrade(value));
        self.sweep(false);
    }

    /// Get the live object of the key
    ///
    /// # Returns
    /// * Some(strong handle of the object)
    /// * None: the key was never put or the object was already dropped
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.map.get(key).and_then(Weak::upgrade)
    }

    /// Forget the key
    ///
    /// # Returns
    /// * Some(strong handle of the object): the object was still alive
    /// * None
    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.map.remove(key).and_then(|value| value.upgrade())
    }

    /// Forget all the keys and return the objects which were still alive
    pub fn clear(&mut self) -> Vec<Arc<V>> {
        let map = core::mem::take(&mut self.map);
        self.next_sweep = CACHE_SWEEP_THRESHOLD;
        map.into_values().filter_map(|value| value.upgrade()).collect()
    }

    /// The count of entries, dead entries which were not swept yet are included
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
impl<K: Ord, V> Default for SharedObjectCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_object_cache_get_and_put() {
        let mut cache: SharedObjectCache<usize, u32> = SharedObjectCache::new();
        assert!(cache.get(&0).is_none());
        let value = Arc::new(7);
        cache.put(0, &value);
        assert!(cache.get(&0).is_some_and(|v| Arc::ptr_eq(&v, &value)));
        drop(value);
        assert!(cache.get(&0).is_none());
        assert_eq!(1, cache.len());
    }

    #[test]
    fn test_shared_object_cache_put_replace() {
        let mut cache: SharedObjectCache<usize, u32> = SharedObjectCache::new();
        let value1 = Arc::new(1);
        let value2 = Arc::new(2);
        cache.put(3, &value1);
        cache.put(3, &value2);
        assert!(cache.get(&3).is_some_and(|v| *v == 2));
        assert_eq!(1, cache.len());
    }

    #[test]
    fn test_shared_object_cache_sweep() {
        let mut cache: SharedObjectCache<usize, usize> = SharedObjectCache::new();
        let mut alive = vec![];
        for key in 0..CACHE_SWEEP_THRESHOLD - 1 {
            let value = Arc::new(key);
            cache.put(key, &value);
            if key % 2 == 0 {
                alive.push(value);
            }
        }
        // below threshold, dead entries stay
        cache.sweep(false);
        assert_eq!(CACHE_SWEEP_THRESHOLD - 1, cache.len());

        // reaching the threshold triggers the sweep on put
        let value = Arc::new(100);
        cache.put(100, &value);
        assert_eq!(alive.len() + 1, cache.len());
        assert_eq!(CACHE_SWEEP_THRESHOLD, cache.next_sweep);

        drop(alive);
        drop(value);
        cache.sweep(true);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shared_object_cache_remove_and_clear() {
        let mut cache: SharedObjectCache<usize, usize> = SharedObjectCache::new();
        let value1 = Arc::new(1);
        let value2 = Arc::new(2);
        cache.put(1, &value1);
        cache.put(2, &value2);
        cache.put(3, &Arc::new(3));
        assert!(cache.remove(&1).is_some_and(|v| Arc::ptr_eq(&v, &value1)));
        assert!(cache.get(&1).is_none());
        assert!(cache.remove(&1).is_none());
        assert!(cache.remove(&3).is_none());

        cache.put(1, &value1);
        let mut alive: Vec<usize> = cache.clear().iter().map(|v| **v).collect();
        alive.sort();
        assert_eq!(vec![1, 2], alive);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shared_object_cache_threshold_grows() {
        let mut cache: SharedObjectCache<usize, usize> = SharedObjectCache::new();
        let mut alive = vec![];
        for key in 0..CACHE_SWEEP_THRESHOLD * 2 {
            let value = Arc::new(key);
            cache.put(key, &value);
            alive.push(value);
        }
        assert_eq!(CACHE_SWEEP_THRESHOLD * 2, cache.len());
        assert!(cache.next_sweep >= CACHE_SWEEP_THRESHOLD * 2 - 1);
    }
}
