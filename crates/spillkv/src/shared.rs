//! Thread-safe handle around a [`TieredCache`].

use parking_lot::Mutex;
use spillkv_store::LogStore;

use crate::backing::BackingStore;
use crate::cache::TieredCache;
use crate::codec::Codec;
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::stats::CacheStats;

/// A [`TieredCache`] behind a mutex.
///
/// Every operation, reads included, takes the lock: a read can promote a
/// spilled entry and so mutate both tiers. Values are returned as clones.
pub struct SharedCache<V, C, S = LogStore> {
    inner: Mutex<TieredCache<V, C, S>>,
}

impl<V, C> SharedCache<V, C, LogStore>
where
    V: Clone,
    C: Codec<V>,
{
    pub fn open(config: CacheConfig, codec: C) -> CacheResult<Self> {
        Ok(Self::new(TieredCache::open(config, codec)?))
    }
}

impl<V, C, S> SharedCache<V, C, S>
where
    V: Clone,
    C: Codec<V>,
    S: BackingStore,
{
    pub fn new(cache: TieredCache<V, C, S>) -> Self {
        Self {
            inner: Mutex::new(cache),
        }
    }

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> CacheResult<V> {
        let mut cache = self.inner.lock();
        let value = cache.get(key)?.clone();
        Ok(value)
    }

    pub fn try_get<K: AsRef<[u8]>>(&self, key: K) -> CacheResult<Option<V>> {
        let mut cache = self.inner.lock();
        let value = cache.try_get(key)?.cloned();
        Ok(value)
    }

    pub fn set<K: AsRef<[u8]>>(&self, key: K, value: V) -> CacheResult<()> {
        self.inner.lock().set(key, value)
    }

    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> CacheResult<()> {
        self.inner.lock().delete(key)
    }

    pub fn take<K: AsRef<[u8]>>(&self, key: K) -> CacheResult<V> {
        self.inner.lock().take(key)
    }

    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self, ram_only: bool) -> CacheResult<()> {
        self.inner.lock().clear(ram_only)
    }

    pub fn flush(&self) -> CacheResult<()> {
        self.inner.lock().flush()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }

    pub fn check_consistency(&self) -> CacheResult<()> {
        self.inner.lock().check_consistency()
    }

    /// Run `f` with exclusive access, for sequences that must not interleave
    /// with other threads.
    pub fn with<R>(&self, f: impl FnOnce(&mut TieredCache<V, C, S>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> TieredCache<V, C, S> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryStore;
    use crate::codec::Utf8Codec;
    use crate::config::Retention;
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_writers() {
        let cache = TieredCache::with_store(
            MemoryStore::new(),
            NonZeroUsize::new(8).unwrap(),
            NonZeroUsize::new(64).unwrap(),
            Utf8Codec,
            Retention::Wipe,
        )
        .unwrap();
        let shared = Arc::new(SharedCache::new(cache));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for i in 0..10 {
                        let key = format!("t{}-{}", t, i);
                        shared.set(&key, key.to_uppercase()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(shared.len(), 40);
        shared.check_consistency().unwrap();
        assert_eq!(shared.get("t0-0").unwrap(), "T0-0");
        assert_eq!(shared.try_get("missing").unwrap(), None);

        let (memory, ghost) = shared.with(|cache| (cache.memory_len(), cache.ghost_len()));
        assert_eq!((memory, ghost), (8, 32));
    }
}
