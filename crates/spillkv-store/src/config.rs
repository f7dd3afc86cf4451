//! Configuration for the segment store
//!
//! Two presets cover the common trade-off (fsync every record vs. leave it
//! to the page cache); individual fields can be adjusted afterwards.

use crate::error::{StoreError, StoreResult};
use crate::format::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Segment store configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Maximum key size in bytes (at most `u16::MAX`, the header field width)
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Start a new segment once the active one would exceed this size
    pub segment_rotation_bytes: u64,
    /// Compact when dead bytes / total bytes reaches this ratio
    pub compaction_trigger_ratio: f64,
    /// Never compact logs smaller than this
    pub min_compaction_bytes: u64,
    /// durable_sync after every appended record
    pub sync_writes: bool,
}

impl StoreConfig {
    /// Every put and delete reaches persistent media before returning.
    pub fn durable() -> Self {
        Self {
            max_key_size: 1024,
            max_value_size: 32 * 1024 * 1024,
            segment_rotation_bytes: 64 * 1024 * 1024,
            compaction_trigger_ratio: 0.5,
            min_compaction_bytes: 4 * 1024 * 1024,
            sync_writes: true,
        }
    }

    /// Records are written to the OS page cache only; call `LogStore::sync`
    /// to make a batch durable. Suits caches that are wiped on start anyway.
    pub fn relaxed() -> Self {
        Self {
            sync_writes: false,
            ..Self::durable()
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "max_key_size must be in [1, {}]",
                MAX_KEY_SIZE
            )));
        }
        if self.max_value_size > MAX_VALUE_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "max_value_size must be <= {}",
                MAX_VALUE_SIZE
            )));
        }
        if self.segment_rotation_bytes < 4096 {
            return Err(StoreError::InvalidConfig(
                "segment_rotation_bytes must be >= 4KB".into(),
            ));
        }
        if self.compaction_trigger_ratio <= 0.0 || self.compaction_trigger_ratio > 1.0 {
            return Err(StoreError::InvalidConfig(
                "compaction_trigger_ratio must be in (0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::durable()
    }
}
