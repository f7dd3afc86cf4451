//! spillkv-store: durable byte-keyed storage for the spillkv cache
//!
//! A log-structured store where every write is appended to a segment file
//! and an in-RAM hash index maps each live key to its newest record.
//!
//! # Architecture
//!
//! - **Write path**: CRC32C-framed record appended to the active segment,
//!   durable_sync per record (or batched via `sync()`), then index update
//! - **Read path**: index lookup, positioned read, checksum verification
//! - **Recovery**: segments replayed in order; corrupt records skipped,
//!   torn tails truncated
//! - **Compaction**: live records rewritten into one segment via atomic rename

pub mod compaction;
pub mod config;
pub mod error;
pub mod format;
pub mod platform_durability;
pub mod segment;
pub mod store;

pub use compaction::CompactionReport;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use store::LogStore;
