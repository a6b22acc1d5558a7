//! Lock guarded map shared between the event scanner and query callers.

use alloy_primitives::map::HashMap;
use std::{
    hash::Hash,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// A hash map behind a reader/writer lock.
///
/// Every operation takes the lock for its own duration only, so readers see
/// whole entries and never a partially applied insert. A poisoned lock is
/// recovered rather than propagated: entries are plain values and stay valid
/// even if a writer panicked.
#[derive(Debug)]
pub struct ThreadSafeMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for ThreadSafeMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::default()),
        }
    }
}

impl<K, V> ThreadSafeMap<K, V>
where
    K: Eq + Hash,
{
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    /// Insert or overwrite, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.write().insert(key, value)
    }

    /// Insert only if `key` is absent. Returns whether the value was stored.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let mut map = self.write();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value);
        true
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.write().retain(|key, value| keep(key, &*value));
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<K, V> ThreadSafeMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Clone of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.read().get(key).cloned()
    }

    /// Value under `key`, inserting `init()` first if absent.
    pub fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> V) -> V {
        self.write().entry(key).or_insert_with(init).clone()
    }

    /// Snapshot of all values.
    pub fn values(&self) -> Vec<V> {
        self.read().values().cloned().collect()
    }

    /// Fold over the entries while holding the read lock.
    pub fn fold<T>(&self, init: T, f: impl FnMut(T, (&K, &V)) -> T) -> T {
        self.read().iter().fold(init, f)
    }
}

impl<K, V> ThreadSafeMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
