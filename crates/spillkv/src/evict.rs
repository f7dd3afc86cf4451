//! Eviction hooks wiring the two tiers to the store.
//!
//! Memory-tier victims are spilled: encoded, written to the store and
//! remembered in the ghost tier. Ghost-tier victims are discarded: their
//! record is deleted and the entry is gone for good.

use tracing::{debug, warn};

use crate::backing::BackingStore;
use crate::codec::Codec;
use crate::error::CacheError;
use crate::key::Key;
use crate::recency::{EvictionHook, RecencyMap};
use crate::stats::CacheStats;

/// Ghost-tier hook: delete the victim's record.
pub(crate) struct DropFromStore<'a, S> {
    pub(crate) store: &'a mut S,
    pub(crate) stats: &'a mut CacheStats,
}

impl<S: BackingStore> EvictionHook<Key, ()> for DropFromStore<'_, S> {
    type Error = CacheError;

    fn on_evict(&mut self, key: &Key, _: &()) -> Result<(), CacheError> {
        self.store.delete(key.as_bytes())?;
        self.stats.discards += 1;
        debug!(key = %key, "discarded coldest spilled key");
        Ok(())
    }
}

/// Memory-tier hook: persist the victim and list it in the ghost tier.
///
/// On any failure neither the ghost tier nor the store is left changed, so
/// the victim can stay resident.
pub(crate) struct SpillToStore<'a, C, S> {
    pub(crate) ghost: &'a mut RecencyMap<Key, ()>,
    pub(crate) store: &'a mut S,
    pub(crate) codec: &'a C,
    pub(crate) stats: &'a mut CacheStats,
}

impl<V, C, S> EvictionHook<Key, V> for SpillToStore<'_, C, S>
where
    C: Codec<V>,
    S: BackingStore,
{
    type Error = CacheError;

    fn on_evict(&mut self, key: &Key, value: &V) -> Result<(), CacheError> {
        let bytes = self.codec.encode(value).map_err(|source| CacheError::Encode {
            key: key.to_vec(),
            source,
        })?;
        self.store.put(key.as_bytes(), &bytes)?;

        let mut discard = DropFromStore {
            store: &mut *self.store,
            stats: &mut *self.stats,
        };
        if let Err(err) = self.ghost.insert_with(key.clone(), (), &mut discard) {
            if let Err(cleanup) = self.store.delete(key.as_bytes()) {
                warn!(key = %key, error = %cleanup, "spill aborted but its record could not be withdrawn");
            }
            return Err(err);
        }

        self.stats.spills += 1;
        debug!(key = %key, bytes = bytes.len(), "spilled to store");
        Ok(())
    }
}
