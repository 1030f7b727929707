//! Store adapter contract and the in-process memory store.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use lru::LruCache;
use tracing::debug;

use super::entry::Entry;
use super::error::StoreError;
use super::lock::{KeyLocks, Lock, rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Minimal key/value contract the engine relies on.
///
/// Entries are owned by the store; the engine only holds them for the
/// duration of one call.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Entry>, StoreError>;

    fn set(&self, key: &str, entry: Entry) -> Result<(), StoreError>;

    /// Must succeed when `key` is absent.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Native TTL lookup. `None` means the store has no such capability and
    /// the engine computes TTL from the entry's expiry instead.
    fn native_ttl(&self, _key: &str) -> Option<Result<Option<Duration>, StoreError>> {
        None
    }

    /// Per-key recompute lock, if the store provides one.
    fn lock(&self, _key: &str) -> Option<Box<dyn Lock>> {
        None
    }
}

/// In-process store backed by an LRU map.
///
/// Unbounded by default; [`MemoryStore::bounded`] evicts least recently used
/// entries once the capacity is reached.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, Entry>>,
    locks: Option<Arc<KeyLocks>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(LruCache::unbounded()),
            locks: None,
        }
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            locks: None,
        }
    }

    /// Expose a fresh [`KeyLocks`] table as this store's lock capability.
    pub fn with_locks(self) -> Self {
        self.with_lock_table(KeyLocks::new())
    }

    pub fn with_lock_table(mut self, locks: Arc<KeyLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Snapshot of stored keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        Ok(rw_write(&self.entries, SOURCE, "get").get(key).cloned())
    }

    fn set(&self, key: &str, entry: Entry) -> Result<(), StoreError> {
        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted.filter(|(evicted_key, _)| evicted_key != key) {
            debug!(key = %evicted_key, "Memory store evicted entry at capacity");
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "contains").contains(key))
    }

    fn lock(&self, key: &str) -> Option<Box<dyn Lock>> {
        self.locks
            .as_ref()
            .map(|locks| Box::new(locks.lock(key)) as Box<dyn Lock>)
    }
}
