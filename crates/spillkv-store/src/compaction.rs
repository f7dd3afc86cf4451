//! Compaction: reclaim space held by overwritten records and tombstones
//!
//! The live records are copied, in their original write order, into one new
//! segment using the atomic rename pattern:
//! 1. Write `seg-{seq}.spill.compact`
//! 2. durable_sync the new file
//! 3. Rename it to `seg-{seq}.spill` (atomic on POSIX)
//! 4. durable_sync the directory
//! 5. Unlink the superseded segments and sync the directory again
//!
//! A crash before step 3 leaves an orphaned `.compact` file that is ignored
//! and overwritten next time. A crash between 3 and 5 leaves old and new
//! segments side by side; replaying old-then-new yields the same live set.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::format::{encode_record, Operation, Record};
use crate::platform_durability::{durable_sync, sync_dir};
use crate::segment::segment_path;

/// What a compaction pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionReport {
    /// The segment holding every live record afterwards
    pub segment: PathBuf,
    pub segments_removed: usize,
    pub live_records: usize,
    pub original_bytes: u64,
    pub compacted_bytes: u64,
}

impl CompactionReport {
    /// Share of the original bytes that were dead (0.0 = no waste).
    pub fn dead_space_ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        self.original_bytes.saturating_sub(self.compacted_bytes) as f64 / self.original_bytes as f64
    }

    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compacted_bytes)
    }
}

/// Whether a log with these byte counts is due for compaction.
pub fn needs_compaction(total_bytes: u64, live_bytes: u64, trigger_ratio: f64, min_bytes: u64) -> bool {
    if total_bytes == 0 || total_bytes < min_bytes {
        return false;
    }
    let dead = total_bytes.saturating_sub(live_bytes);
    dead as f64 / total_bytes as f64 >= trigger_ratio
}

/// Write `records` into segment `seq` of `dir` via temp file + rename.
///
/// Returns the `(offset, len)` of each record in the new segment, in input
/// order, plus the segment's final size.
pub fn write_compacted_segment<I>(dir: &Path, seq: u64, records: I) -> StoreResult<(Vec<(u64, u64)>, u64)>
where
    I: IntoIterator<Item = StoreResult<Record>>,
{
    let final_path = segment_path(dir, seq);
    let tmp_path = final_path.with_extension("spill.compact");

    let mut locations = Vec::new();
    let mut size = 0u64;
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| StoreError::io_at(&tmp_path, &e, "Failed to create compact file"))?;

        for record in records {
            let record = record?;
            let bytes = encode_record(&record.key, &record.value, Operation::Put, usize::MAX, usize::MAX)?;
            file.write_all(&bytes)
                .map_err(|e| StoreError::io_at(&tmp_path, &e, "Failed to write compacted record"))?;
            locations.push((size, bytes.len() as u64));
            size += bytes.len() as u64;
        }

        durable_sync(&file).map_err(|e| StoreError::io_at(&tmp_path, &e, "Failed to sync compacted file"))?;
    }

    fs::rename(&tmp_path, &final_path)
        .map_err(|e| StoreError::io_at(&final_path, &e, "Failed to rename compacted file"))?;
    sync_dir(dir).map_err(|e| StoreError::io_at(dir, &e, "Failed to sync directory after compaction"))?;

    Ok((locations, size))
}

/// Unlink superseded segments, then persist the directory change.
pub fn remove_segments(dir: &Path, paths: &[PathBuf]) -> StoreResult<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io_at(path, &e, "Failed to remove compacted segment")),
        }
    }
    sync_dir(dir).map_err(|e| StoreError::io_at(dir, &e, "Failed to sync directory after segment removal"))
}
