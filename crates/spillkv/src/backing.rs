//! The persistent tier as the cache sees it.
//!
//! `LogStore` is the production backend; `MemoryStore` keeps the same
//! contract without touching disk, for ephemeral caches and tests.

use hashbrown::HashMap;
use spillkv_store::{LogStore, StoreResult};

/// Byte-keyed durable storage used by the ghost tier.
///
/// The cache must be the store's only writer: ghost-tier membership is the
/// cache's record of what the store holds.
pub trait BackingStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Remove `key`. Absent keys are not an error: `Ok(false)`.
    fn delete(&mut self, key: &[u8]) -> StoreResult<bool>;

    /// Every stored key, in the store's enumeration order.
    fn keys(&self) -> StoreResult<Vec<Vec<u8>>>;

    /// Make prior writes durable.
    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    /// Longest key `put` will accept.
    fn max_key_len(&self) -> usize {
        usize::MAX
    }
}

impl BackingStore for LogStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        LogStore::put(self, key, value)
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        LogStore::get(self, key)
    }

    fn delete(&mut self, key: &[u8]) -> StoreResult<bool> {
        LogStore::delete(self, key)
    }

    fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        Ok(LogStore::keys(self))
    }

    fn sync(&mut self) -> StoreResult<()> {
        LogStore::sync(self)
    }

    fn max_key_len(&self) -> usize {
        self.config().max_key_size
    }
}

/// Non-durable `BackingStore` held entirely in RAM.
///
/// Enumerates keys in the order they were last written, like `LogStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<Vec<u8>, (u64, Vec<u8>)>,
    next_seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }
}

impl BackingStore for MemoryStore {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.next_seq += 1;
        self.entries.insert(key.to_vec(), (self.next_seq, value.to_vec()));
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|(_, value)| value.clone()))
    }

    fn delete(&mut self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        let mut keys: Vec<(&u64, &Vec<u8>)> = self.entries.iter().map(|(k, (seq, _))| (seq, k)).collect();
        keys.sort_by_key(|(seq, _)| **seq);
        Ok(keys.into_iter().map(|(_, k)| k.clone()).collect())
    }
}
