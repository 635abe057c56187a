use std::collections::HashMap;

use crate::{record_key::RecordKey, sync_error::SyncError, task::Collection};

#[derive(Clone, Debug)]
struct CacheEntry {
    canonical: String,
    collection: Collection,
}

/// Last known collection per day, keyed for no-op detection.
///
/// Entries live for the session and are dropped only on teardown.
#[derive(Debug, Default)]
pub struct ReconciliationCache {
    entries: HashMap<RecordKey, CacheEntry>,
}

impl ReconciliationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Collection> {
        self.entries.get(key).map(|e| &e.collection)
    }

    pub fn put(&mut self, key: RecordKey, collection: Collection) -> Result<(), SyncError> {
        let canonical = collection.canonical()?;
        self.entries.insert(
            key,
            CacheEntry {
                canonical,
                collection,
            },
        );
        Ok(())
    }

    /// True when `incoming` differs byte-wise from the cached canonical form,
    /// or nothing is cached yet.
    pub fn diff(&self, key: &RecordKey, incoming: &Collection) -> Result<bool, SyncError> {
        match self.entries.get(key) {
            Some(e) => Ok(e.canonical != incoming.canonical()?),
            None => Ok(true),
        }
    }

    /// Stores `incoming` only if it differs. Returns whether it did.
    pub fn apply(&mut self, key: RecordKey, incoming: Collection) -> Result<bool, SyncError> {
        if !self.diff(&key, &incoming)? {
            return Ok(false);
        }
        self.put(key, incoming)?;
        Ok(true)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, Task};

    fn key() -> RecordKey {
        RecordKey::parse("todos-20250101").unwrap()
    }

    fn one_task() -> Collection {
        let mut c = Collection::new();
        c.push(Task::new("buy milk", Priority::Low, 1));
        c
    }

    #[test]
    fn diff_after_put_is_false() {
        let mut cache = ReconciliationCache::new();
        let c = one_task();
        cache.put(key(), c.clone()).unwrap();
        assert!(!cache.diff(&key(), &c).unwrap());
    }

    #[test]
    fn absent_entry_always_differs() {
        let cache = ReconciliationCache::new();
        assert!(cache.diff(&key(), &Collection::new()).unwrap());
    }

    #[test]
    fn apply_twice_changes_once() {
        let mut cache = ReconciliationCache::new();
        let c = one_task();
        assert!(cache.apply(key(), c.clone()).unwrap());
        assert!(!cache.apply(key(), c).unwrap());
    }

    #[test]
    fn status_flip_is_a_change() {
        let mut cache = ReconciliationCache::new();
        let c = one_task();
        cache.put(key(), c.clone()).unwrap();

        let mut flipped = c.clone();
        let id = c.tasks()[0].id.clone();
        let t = flipped.get_mut(&id).unwrap();
        t.status = t.status.toggled();
        assert!(cache.diff(&key(), &flipped).unwrap());
        assert!(cache.apply(key(), flipped.clone()).unwrap());
        assert_eq!(cache.get(&key()), Some(&flipped));
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = ReconciliationCache::new();
        cache.put(key(), one_task()).unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&key()).is_none());
    }
}
