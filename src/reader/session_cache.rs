use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Bounded in-memory cache with least-recently-used eviction.
///
/// Recency is tracked with a monotonically increasing access stamp per entry
/// and a stamp-ordered index, so promotion and eviction are both `O(log n)`.
/// A single lock guards entries, ordering and counters.
#[derive(Debug)]
pub struct SessionCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    max_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, Slot<V>>,
    recency: BTreeMap<u64, K>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    stamp: u64,
}

impl<K, V> SessionCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// A zero capacity is raised to one.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size: max_size.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // Every critical section leaves the maps consistent before it can panic.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a clone of the value and marks it most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.clock += 1;
        let stamp = inner.clock;
        match inner.entries.get_mut(key) {
            Some(slot) => {
                let previous = std::mem::replace(&mut slot.stamp, stamp);
                if let Some(owned) = inner.recency.remove(&previous) {
                    inner.recency.insert(stamp, owned);
                }
                inner.hits += 1;
                Some(slot.value.clone())
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Reads without touching recency or hit statistics.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().entries.get(key).map(|slot| slot.value.clone())
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().entries.contains_key(key)
    }

    /// Inserts or replaces `key`, making it most recently used. Returns the key
    /// evicted to make room, if any.
    pub fn put(&self, key: K, value: V) -> Option<K> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.clock += 1;
        let stamp = inner.clock;

        if let Some(slot) = inner.entries.get_mut(&key) {
            let previous = std::mem::replace(&mut slot.stamp, stamp);
            slot.value = value;
            inner.recency.remove(&previous);
            inner.recency.insert(stamp, key);
            return None;
        }

        let mut evicted = None;
        while inner.entries.len() >= self.max_size {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.evictions += 1;
            evicted = Some(oldest);
        }

        inner.entries.insert(key.clone(), Slot { value, stamp });
        inner.recency.insert(stamp, key);
        evicted
    }

    /// Mutates an entry in place without changing its recency. Returns `false`
    /// when the key is absent (e.g. evicted meanwhile).
    pub fn update<Q, F>(&self, key: &Q, f: F) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut V),
    {
        match self.lock().entries.get_mut(key) {
            Some(slot) => {
                f(&mut slot.value);
                true
            }
            None => false,
        }
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let slot = inner.entries.remove(key)?;
        inner.recency.remove(&slot.stamp);
        Some(slot.value)
    }

    /// Drops every entry. Hit, miss and eviction counters keep counting.
    pub fn clear(&self) {
        let mut guard = self.lock();
        guard.entries.clear();
        guard.recency.clear();
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.lock().recency.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let accesses = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if accesses == 0 {
                0.0
            } else {
                inner.hits as f64 / accesses as f64
            },
            eviction_count: inner.evictions,
        }
    }
}
