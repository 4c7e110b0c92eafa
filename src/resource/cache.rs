//! Entity cache
//!
//! Insert-if-absent memo for rarely changing reference data such as stacks.
//! No TTL: entries stay until a caller removes them.

use crate::error::CfResult;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

/// Concurrent key/value memo with at-most-once materialization per key.
pub struct EntityCache<K, V> {
    entries: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for EntityCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> EntityCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Arc<OnceCell<V>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cell(&self, key: &K) -> Arc<OnceCell<V>> {
        self.lock().entry(key.clone()).or_default().clone()
    }

    /// Return the cached value, or run `supplier` once to produce it.
    ///
    /// Concurrent callers for the same absent key wait on a single supplier
    /// run. A failed supplier caches nothing.
    pub async fn get_or_compute<F, Fut>(&self, key: K, supplier: F) -> CfResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CfResult<V>>,
    {
        let cell = self.cell(&key);
        match cell.get_or_try_init(supplier).await {
            Ok(value) => Ok(value.clone()),
            Err(e) => {
                let mut entries = self.lock();
                let stale = entries
                    .get(&key)
                    .map(|current| Arc::ptr_eq(current, &cell) && !current.initialized())
                    .unwrap_or(false);
                if stale {
                    entries.remove(&key);
                }
                Err(e)
            },
        }
    }

    /// Store `value` unless the key already holds one. Returns whether it was stored.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        self.cell(&key).set(value).is_ok()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock()
            .get(key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Drop an entry so the next lookup recomputes it.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock()
            .remove(key)
            .and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.lock().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
