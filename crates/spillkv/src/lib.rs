//! spillkv: a two-tier LRU cache that spills to a durable store.
//!
//! The memory tier holds the hottest entries as live values. Entries evicted
//! from it are encoded with a [`Codec`] and written to a [`BackingStore`]
//! (by default a [`LogStore`](spillkv_store::LogStore) segment store), while
//! their keys move to a bounded ghost tier that tracks recency of spilled
//! entries. Keys evicted from the ghost tier are deleted from the store.
//!
//! ```no_run
//! use spillkv::{CacheConfig, TieredCache, Utf8Codec};
//!
//! # fn main() -> spillkv::CacheResult<()> {
//! let config = CacheConfig::new("sessions", "/var/cache/app", 1_000, 100_000);
//! let mut cache = TieredCache::open(config, Utf8Codec)?;
//!
//! cache.set("user:42", "alice".to_string())?;
//! assert_eq!(cache.get("user:42")?, "alice");
//! # Ok(())
//! # }
//! ```

pub mod backing;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
mod evict;
pub mod key;
pub mod recency;
pub mod shared;
pub mod stats;

pub use backing::{BackingStore, MemoryStore};
pub use cache::{Fetched, TieredCache};
pub use codec::{BytesCodec, Codec, FnCodec, Utf8Codec};
pub use config::{CacheConfig, Retention};
pub use error::{CacheError, CacheResult, CodecError};
pub use key::Key;
pub use recency::{EvictionHook, RecencyMap};
pub use shared::SharedCache;
pub use stats::CacheStats;

pub use spillkv_store::{LogStore, StoreConfig, StoreError, StoreResult};
