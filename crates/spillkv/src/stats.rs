//! Operation counters.

/// Point-in-time snapshot of cache counters (monotonic since open).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `get` served from the memory tier
    pub memory_hits: u64,
    /// `get` served by promoting a spilled entry back into memory
    pub store_hits: u64,
    /// `get` for a key in neither tier
    pub misses: u64,
    /// Entries moved from memory to the store
    pub spills: u64,
    /// Spilled keys permanently dropped because the ghost tier was full.
    /// This is the cache's only data-loss path.
    pub discards: u64,
}

impl CacheStats {
    /// Share of lookups answered from either tier.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.memory_hits + self.store_hits;
        let total = hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}
