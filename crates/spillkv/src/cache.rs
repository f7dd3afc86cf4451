//! The two-tier cache.
//!
//! Recent entries live decoded in the memory tier. When it is full, the
//! least recently used entry is spilled: encoded into the store and listed
//! in the ghost tier. When the ghost tier is full, its least recently used
//! key is discarded and its record deleted. Reading a spilled key loads it
//! back into memory, which may spill something else.
//!
//! Every key is in at most one tier, and the store holds a record exactly
//! for the keys listed in the ghost tier.

use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Deref;

use spillkv_store::LogStore;
use tracing::{debug, info, warn};

use crate::backing::BackingStore;
use crate::codec::Codec;
use crate::config::{CacheConfig, Retention};
use crate::error::{CacheError, CacheResult};
use crate::evict::{DropFromStore, SpillToStore};
use crate::key::Key;
use crate::recency::RecencyMap;
use crate::stats::CacheStats;

/// A value produced by iteration or [`TieredCache::peek`].
///
/// Resident values are borrowed; spilled values are decoded into an owned
/// copy without being promoted.
#[derive(Debug)]
pub enum Fetched<'a, V> {
    Resident(&'a V),
    Loaded(V),
}

impl<V> Fetched<'_, V> {
    pub fn is_resident(&self) -> bool {
        matches!(self, Fetched::Resident(_))
    }
}

impl<V: Clone> Fetched<'_, V> {
    pub fn into_owned(self) -> V {
        match self {
            Fetched::Resident(value) => value.clone(),
            Fetched::Loaded(value) => value,
        }
    }
}

impl<V> Deref for Fetched<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        match self {
            Fetched::Resident(value) => value,
            Fetched::Loaded(value) => value,
        }
    }
}

/// Two-tier LRU cache over a [`BackingStore`].
///
/// Single-threaded; wrap it in a [`SharedCache`](crate::SharedCache) to share
/// across threads.
pub struct TieredCache<V, C, S = LogStore> {
    memory: RecencyMap<Key, V>,
    ghost: RecencyMap<Key, ()>,
    store: S,
    codec: C,
    stats: CacheStats,
    verify: bool,
}

impl<V, C> TieredCache<V, C, LogStore>
where
    C: Codec<V>,
{
    /// Open the cache described by `config`, backed by a `LogStore` under
    /// [`CacheConfig::store_dir`].
    pub fn open(config: CacheConfig, codec: C) -> CacheResult<Self> {
        let (memory_capacity, ghost_capacity) = config.validate()?;
        let dir = config.store_dir();

        let store = match config.retention {
            Retention::Wipe => LogStore::create(&dir, config.store.clone())?,
            Retention::Keep => LogStore::open(&dir, config.store.clone())?,
        };

        let mut cache = Self::with_store(store, memory_capacity, ghost_capacity, codec, config.retention)?;
        cache.verify = config.verify;
        cache.verify_state()?;

        info!(
            name = %config.name,
            dir = %dir.display(),
            memory_capacity = memory_capacity.get(),
            ghost_capacity = ghost_capacity.get(),
            spilled = cache.ghost.len(),
            "cache opened"
        );
        Ok(cache)
    }
}

impl<V, C, S> TieredCache<V, C, S>
where
    C: Codec<V>,
    S: BackingStore,
{
    /// Build a cache over an already-open store.
    ///
    /// With [`Retention::Keep`] every key the store enumerates is listed in
    /// the ghost tier in enumeration order, so the last one becomes most
    /// recent; keys beyond `ghost_capacity` are discarded oldest first. With
    /// [`Retention::Wipe`] all existing records are deleted.
    pub fn with_store(
        store: S,
        memory_capacity: NonZeroUsize,
        ghost_capacity: NonZeroUsize,
        codec: C,
        retention: Retention,
    ) -> CacheResult<Self> {
        let mut cache = Self {
            memory: RecencyMap::new(memory_capacity),
            ghost: RecencyMap::new(ghost_capacity),
            store,
            codec,
            stats: CacheStats::default(),
            verify: false,
        };

        let existing = cache.store.keys()?;
        match retention {
            Retention::Keep => {
                for key in existing {
                    let mut discard = DropFromStore {
                        store: &mut cache.store,
                        stats: &mut cache.stats,
                    };
                    cache.ghost.insert_with(Key::from_vec(key), (), &mut discard)?;
                }
                if !cache.ghost.is_empty() {
                    info!(
                        restored = cache.ghost.len(),
                        discarded = cache.stats.discards,
                        "rebuilt ghost tier from store"
                    );
                }
            }
            Retention::Wipe => {
                for key in &existing {
                    cache.store.delete(key)?;
                }
                if !existing.is_empty() {
                    info!(removed = existing.len(), "wiped records from a previous run");
                }
            }
        }
        Ok(cache)
    }

    /// Run [`check_consistency`](Self::check_consistency) after every
    /// mutating operation.
    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    /// Entries in both tiers.
    pub fn len(&self) -> usize {
        self.memory.len() + self.ghost.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.ghost.is_empty()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn ghost_len(&self) -> usize {
        self.ghost.len()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn ghost_capacity(&self) -> usize {
        self.ghost.capacity()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Whether `key` is in either tier. Touches nothing.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> bool {
        let key = key.as_ref();
        self.memory.contains(key) || self.ghost.contains(key)
    }

    /// Whether `key` is resident in memory.
    pub fn is_resident<K: AsRef<[u8]>>(&self, key: K) -> bool {
        self.memory.contains(key.as_ref())
    }

    /// Whether `key` is listed as spilled to the store.
    pub fn is_spilled<K: AsRef<[u8]>>(&self, key: K) -> bool {
        self.ghost.contains(key.as_ref())
    }

    /// Look up `key`, making it the most recently used entry.
    ///
    /// A spilled key is decoded and moved back into memory, which may spill
    /// the memory tier's least recently used entry. If the record is missing
    /// or does not decode, nothing changes.
    pub fn get<K: AsRef<[u8]>>(&mut self, key: K) -> CacheResult<&V> {
        let key = key.as_ref();

        if self.memory.contains(key) {
            self.stats.memory_hits += 1;
            return self.memory.get(key).ok_or_else(|| vanished(key));
        }

        if !self.ghost.contains(key) {
            self.stats.misses += 1;
            return Err(CacheError::NotFound { key: key.to_vec() });
        }

        let record = self.load_record(key)?;
        let value = self.decode(key, &record)?;
        self.move_spilled(Key::from_slice(key), value, Some(record))?;
        self.stats.store_hits += 1;
        debug!(key = %key.escape_ascii(), "promoted spilled entry");

        self.verify_state()?;
        self.memory.peek(key).ok_or_else(|| vanished(key))
    }

    /// Like [`get`](Self::get), but a missing key is `Ok(None)`.
    pub fn try_get<K: AsRef<[u8]>>(&mut self, key: K) -> CacheResult<Option<&V>> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Read `key` without touching recency or moving it between tiers.
    pub fn peek<K: AsRef<[u8]>>(&self, key: K) -> CacheResult<Fetched<'_, V>> {
        let key = key.as_ref();
        if let Some(value) = self.memory.peek(key) {
            return Ok(Fetched::Resident(value));
        }
        if self.ghost.contains(key) {
            return self.load(key).map(Fetched::Loaded);
        }
        Err(CacheError::NotFound { key: key.to_vec() })
    }

    /// Insert or replace `key` as the most recently used entry.
    ///
    /// A spilled copy of `key` is superseded and its record deleted; if that
    /// delete fails the old copy stays spilled and the new value is dropped.
    /// Keys longer than the store accepts are rejected with `InvalidKey`
    /// before anything changes.
    ///
    /// Inserting into a full memory tier spills its least recently used
    /// entry first. A value the codec cannot encode, or the store will not
    /// take, cannot be spilled: while it is the least recently used entry
    /// every insert of a new key fails. Reading it or deleting it clears
    /// the blockage.
    pub fn set<K: AsRef<[u8]>>(&mut self, key: K, value: V) -> CacheResult<()> {
        let key = key.as_ref();
        let max = self.store.max_key_len();
        if key.len() > max {
            return Err(CacheError::InvalidKey { len: key.len(), max });
        }

        if self.ghost.contains(key) {
            // Only a full-tiers move has to be able to put the old record back.
            let record = if self.tiers_full() { self.store.get(key)? } else { None };
            self.move_spilled(Key::from_slice(key), value, record)?;
        } else {
            self.insert_resident(Key::from_slice(key), value)?;
        }
        self.verify_state()
    }

    /// Remove `key` from whichever tier holds it.
    pub fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> CacheResult<()> {
        let key = key.as_ref();

        if self.memory.remove(key).is_some() {
            return self.verify_state();
        }

        if self.ghost.contains(key) {
            self.store.delete(key)?;
            self.ghost.remove(key);
            return self.verify_state();
        }

        Err(CacheError::NotFound { key: key.to_vec() })
    }

    /// Remove `key` and return its value, decoding it if it was spilled.
    pub fn take<K: AsRef<[u8]>>(&mut self, key: K) -> CacheResult<V> {
        let key = key.as_ref();

        if let Some(value) = self.memory.remove(key) {
            self.verify_state()?;
            return Ok(value);
        }

        if !self.ghost.contains(key) {
            return Err(CacheError::NotFound { key: key.to_vec() });
        }

        let value = self.load(key)?;
        self.store.delete(key)?;
        self.ghost.remove(key);
        self.verify_state()?;
        Ok(value)
    }

    /// Drop every resident entry; with `ram_only == false` also delete every
    /// spilled record.
    pub fn clear(&mut self, ram_only: bool) -> CacheResult<()> {
        let dropped = self.memory.len();
        self.memory.clear();

        let mut removed = 0usize;
        if !ram_only {
            while let Some((key, _)) = self.ghost.lru() {
                let key = key.clone();
                self.store.delete(key.as_bytes())?;
                self.ghost.remove(&key);
                removed += 1;
            }
        }

        info!(dropped, removed, ram_only, "cache cleared");
        self.verify_state()
    }

    /// Spill every resident entry, least recently used first, then sync the
    /// store.
    ///
    /// Memory ends empty. If the ghost tier cannot hold them all, the
    /// coldest spilled keys are discarded as usual. An entry that cannot be
    /// spilled stops the flush with everything more recent still resident.
    pub fn flush(&mut self) -> CacheResult<()> {
        let resident = self.memory.len();
        loop {
            match self.spill_lru() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => return Err(self.report_stuck(err)),
            }
        }

        self.store.sync()?;
        info!(spilled = resident, ghost = self.ghost.len(), "flushed memory tier");
        self.verify_state()
    }

    /// Keys of both tiers, memory first, each tier most recently used first.
    pub fn keys(&self, ram_only: bool) -> impl Iterator<Item = &Key> + '_ {
        let spilled = (!ram_only).then(|| self.ghost.keys());
        self.memory.keys().chain(spilled.into_iter().flatten())
    }

    /// Entries in [`keys`](Self::keys) order. Spilled values are decoded on
    /// the fly; recency is untouched and nothing is promoted.
    pub fn items(&self, ram_only: bool) -> impl Iterator<Item = CacheResult<(&Key, Fetched<'_, V>)>> + '_ {
        let resident = self
            .memory
            .iter()
            .map(|(key, value)| Ok::<_, CacheError>((key, Fetched::Resident(value))));
        let spilled = (!ram_only)
            .then(|| self.ghost.keys())
            .into_iter()
            .flatten()
            .map(move |key| self.load(key.as_bytes()).map(|value| (key, Fetched::Loaded(value))));
        resident.chain(spilled)
    }

    /// Values in [`keys`](Self::keys) order.
    pub fn values(&self, ram_only: bool) -> impl Iterator<Item = CacheResult<Fetched<'_, V>>> + '_ {
        self.items(ram_only).map(|entry| entry.map(|(_, value)| value))
    }

    /// Check the bookkeeping between the tiers and the store.
    ///
    /// Tiers within capacity, no key in both, a record for every spilled key
    /// and no record for anything else.
    pub fn check_consistency(&self) -> CacheResult<()> {
        if self.memory.len() > self.memory.capacity() {
            return Err(CacheError::Inconsistent(format!(
                "memory tier holds {} entries, capacity {}",
                self.memory.len(),
                self.memory.capacity()
            )));
        }
        if self.ghost.len() > self.ghost.capacity() {
            return Err(CacheError::Inconsistent(format!(
                "ghost tier holds {} keys, capacity {}",
                self.ghost.len(),
                self.ghost.capacity()
            )));
        }

        if let Some(key) = self.memory.keys().find(|key| self.ghost.contains(key.as_bytes())) {
            return Err(CacheError::Inconsistent(format!("key \"{}\" is in both tiers", key)));
        }

        for key in self.ghost.keys() {
            if self.store.get(key.as_bytes())?.is_none() {
                return Err(CacheError::Inconsistent(format!(
                    "spilled key \"{}\" has no record",
                    key
                )));
            }
        }

        let stored = self.store.keys()?;
        if let Some(key) = stored.iter().find(|key| !self.ghost.contains(key.as_slice())) {
            return Err(CacheError::Inconsistent(format!(
                "store holds a record for untracked key \"{}\"",
                key.escape_ascii()
            )));
        }
        if stored.len() != self.ghost.len() {
            return Err(CacheError::Inconsistent(format!(
                "store holds {} records for {} spilled keys",
                stored.len(),
                self.ghost.len()
            )));
        }
        Ok(())
    }

    fn verify_state(&self) -> CacheResult<()> {
        if self.verify {
            self.check_consistency()
        } else {
            Ok(())
        }
    }

    fn load(&self, key: &[u8]) -> CacheResult<V> {
        let record = self.load_record(key)?;
        self.decode(key, &record)
    }

    fn load_record(&self, key: &[u8]) -> CacheResult<Vec<u8>> {
        self.store
            .get(key)?
            .ok_or_else(|| CacheError::MissingRecord { key: key.to_vec() })
    }

    fn decode(&self, key: &[u8], record: &[u8]) -> CacheResult<V> {
        self.codec.decode(record).map_err(|source| CacheError::CorruptRecord {
            key: key.to_vec(),
            source,
        })
    }

    fn tiers_full(&self) -> bool {
        self.memory.len() >= self.memory.capacity() && self.ghost.len() >= self.ghost.capacity()
    }

    /// Spill the memory tier's least recently used entry. `Ok(false)` when
    /// memory is empty.
    fn spill_lru(&mut self) -> CacheResult<bool> {
        let mut spill = SpillToStore {
            ghost: &mut self.ghost,
            store: &mut self.store,
            codec: &self.codec,
            stats: &mut self.stats,
        };
        Ok(self.memory.evict_lru_with(&mut spill)?.is_some())
    }

    /// Insert a key that is not spilled, spilling the LRU entry if needed.
    fn insert_resident(&mut self, key: Key, value: V) -> CacheResult<()> {
        let mut spill = SpillToStore {
            ghost: &mut self.ghost,
            store: &mut self.store,
            codec: &self.codec,
            stats: &mut self.stats,
        };
        match self.memory.insert_with(key, value, &mut spill) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.report_stuck(err)),
        }
    }

    /// Move a spilled key into memory as its most recent entry.
    ///
    /// The key stays listed until its record is gone, so a failed delete
    /// leaves it spilled with the record intact. With both tiers full the
    /// victim needs the key's ghost slot, so the record goes first and
    /// `record` is written back if the victim then cannot be spilled.
    fn move_spilled(&mut self, key: Key, value: V, record: Option<Vec<u8>>) -> CacheResult<()> {
        let full = self.tiers_full();
        if !full && self.memory.len() >= self.memory.capacity() {
            if let Err(err) = self.spill_lru() {
                return Err(self.report_stuck(err));
            }
        }

        self.store.delete(key.as_bytes())?;
        self.ghost.remove(&key);

        let mut spill = SpillToStore {
            ghost: &mut self.ghost,
            store: &mut self.store,
            codec: &self.codec,
            stats: &mut self.stats,
        };
        if let Err(err) = self.memory.insert_with(key.clone(), value, &mut spill) {
            self.restore_spilled(key, record);
            return Err(self.report_stuck(err));
        }
        Ok(())
    }

    /// Write back the record of a key whose move into memory failed after
    /// the record was deleted, and list it again.
    fn restore_spilled(&mut self, key: Key, record: Option<Vec<u8>>) {
        let Some(record) = record else {
            warn!(key = %key, "spilled entry lost: no record to restore");
            return;
        };
        if let Err(err) = self.store.put(key.as_bytes(), &record) {
            warn!(key = %key, error = %err, "spilled entry lost: record could not be restored");
            return;
        }
        self.relist(key);
    }

    /// Log which resident entry is blocking inserts after a failed spill.
    fn report_stuck(&self, err: CacheError) -> CacheError {
        if let Some((stuck, _)) = self.memory.lru() {
            warn!(
                key = %stuck,
                error = %err,
                "least recently used entry cannot be spilled; inserts fail until it is read or deleted"
            );
        }
        err
    }

    /// Put a key back on the ghost tier after a failed move into memory.
    /// The slot it left is still free, so nothing is discarded.
    fn relist(&mut self, key: Key) {
        let mut discard = DropFromStore {
            store: &mut self.store,
            stats: &mut self.stats,
        };
        if let Err(err) = self.ghost.insert_with(key.clone(), (), &mut discard) {
            warn!(key = %key, error = %err, "could not re-list spilled key");
        }
    }
}

fn vanished(key: &[u8]) -> CacheError {
    CacheError::Inconsistent(format!("resident key \"{}\" vanished", key.escape_ascii()))
}

impl<V, C, S: fmt::Debug> fmt::Debug for TieredCache<V, C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("memory", &format_args!("{}/{}", self.memory.len(), self.memory.capacity()))
            .field("ghost", &format_args!("{}/{}", self.ghost.len(), self.ghost.capacity()))
            .field("store", &self.store)
            .field("stats", &self.stats)
            .finish()
    }
}
