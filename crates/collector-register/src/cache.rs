use core::hash::Hash;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-local memo of allocated identifiers.
///
/// Allocation only ever adds entries: an identifier never changes once
/// assigned. [`IdCache::reassign`] is the one exception, used when an agent
/// writes its identifier back. Zero (unassigned) is never stored.
#[derive(Debug)]
pub struct IdCache<K> {
    ids: RwLock<HashMap<K, i32>>,
}

impl<K: Eq + Hash> IdCache<K> {
    pub fn new() -> Self {
        Self {
            ids: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<i32> {
        self.ids.read().get(key).copied()
    }

    pub fn put(&self, key: K, id: i32) {
        if id != 0 {
            self.ids.write().insert(key, id);
        }
    }

    /// Maps `key` to `id` and forgets every other key that held `id`.
    pub fn reassign(&self, key: K, id: i32) {
        if id == 0 {
            return;
        }
        let mut ids = self.ids.write();
        ids.retain(|cached, cached_id| *cached_id != id || *cached == key);
        ids.insert(key, id);
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash> Default for IdCache<K> {
    fn default() -> Self {
        Self::new()
    }
}
