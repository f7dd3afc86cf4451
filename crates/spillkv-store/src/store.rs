//! The segment store: append-only log on disk, key index in RAM.
//!
//! **Write path**: encode record, append to the active segment (durable_sync
//! when configured), then publish the new location in the index. If the
//! append fails the index is never touched.
//! **Read path**: one index lookup, one positioned read, CRC32C verified.
//! **Open**: replay segments in sequence order to rebuild the index.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::compaction::{needs_compaction, remove_segments, write_compacted_segment, CompactionReport};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::format::{encode_record, Operation};
use crate::platform_durability::durable_sync;
use crate::segment::{list_segments, read_record_at, scan_segment, segment_path, SegmentWriter};

/// Where the live record for a key sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    seq: u64,
    offset: u64,
    len: u64,
}

impl Location {
    fn position(&self) -> (u64, u64) {
        (self.seq, self.offset)
    }
}

/// Durable byte-keyed store over a directory of segment files.
///
/// Single owner: all mutation goes through `&mut self`.
pub struct LogStore {
    dir: PathBuf,
    config: StoreConfig,
    writer: SegmentWriter,
    index: HashMap<Vec<u8>, Location>,
    /// Every segment file that may hold live records, active one included
    segments: BTreeMap<u64, PathBuf>,
    /// Bytes across all segments, dead records included
    total_bytes: u64,
    /// Bytes of records the index points at
    live_bytes: u64,
}

impl LogStore {
    /// Open or create a store in `dir`, replaying existing segments.
    pub fn open<P: AsRef<Path>>(dir: P, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io_at(&dir, &e, "Failed to create store directory"))?;

        let found = list_segments(&dir)?;
        let mut index: HashMap<Vec<u8>, Location> = HashMap::new();
        let mut segments = BTreeMap::new();
        let mut total_bytes = 0u64;
        let mut live_bytes = 0u64;
        let last_seq = found.last().map(|(seq, _)| *seq);

        for (seq, path) in &found {
            let scan = scan_segment(path)?;
            let bad_tail = scan.has_bad_tail();
            let (end, file_len) = (scan.end, scan.file_len);

            for scanned in scan.records {
                let loc = Location {
                    seq: *seq,
                    offset: scanned.offset,
                    len: scanned.len,
                };
                match scanned.record.op {
                    Operation::Put => {
                        if let Some(old) = index.insert(scanned.record.key, loc) {
                            live_bytes -= old.len;
                        }
                        live_bytes += loc.len;
                    }
                    Operation::Delete => {
                        if let Some(old) = index.remove(&scanned.record.key) {
                            live_bytes -= old.len;
                        }
                    }
                }
            }

            if Some(*seq) == last_seq && bad_tail {
                // New appends must land directly after the last good record.
                warn!(
                    path = %path.display(),
                    keep = end,
                    drop = file_len - end,
                    "truncating unreadable segment tail"
                );
                truncate_segment(path, end)?;
                total_bytes += end;
            } else {
                total_bytes += file_len;
            }
            segments.insert(*seq, path.clone());
        }

        let active_seq = last_seq.unwrap_or(1);
        let writer = SegmentWriter::open(&dir, active_seq, config.sync_writes)?;
        segments.insert(active_seq, writer.path().to_path_buf());

        info!(
            dir = %dir.display(),
            keys = index.len(),
            segments = segments.len(),
            bytes = total_bytes,
            "opened segment store"
        );

        Ok(Self {
            dir,
            config,
            writer,
            index,
            segments,
            total_bytes,
            live_bytes,
        })
    }

    /// Create an empty store in `dir`, deleting whatever was there.
    pub fn create<P: AsRef<Path>>(dir: P, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        match std::fs::remove_dir_all(dir) {
            Ok(()) => debug!(dir = %dir.display(), "wiped existing store directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io_at(dir, &e, "Failed to wipe store directory")),
        }
        Self::open(dir, config)
    }

    /// Insert or replace the value for `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let record = encode_record(key, value, Operation::Put, self.config.max_key_size, self.config.max_value_size)?;
        let loc = self.append(&record)?;

        if let Some(old) = self.index.insert(key.to_vec(), loc) {
            self.live_bytes -= old.len;
        }
        self.live_bytes += loc.len;

        self.maybe_compact();
        Ok(())
    }

    /// Value stored for `key`, read from disk and checksum-verified.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let Some(loc) = self.index.get(key) else {
            return Ok(None);
        };
        let path = segment_path(&self.dir, loc.seq);
        let record = read_record_at(&path, loc.offset, loc.len)?;

        if record.op != Operation::Put || record.key != key {
            return Err(StoreError::Corrupted {
                path,
                offset: loc.offset,
                reason: "index points at a record for a different key".to_string(),
            });
        }
        Ok(Some(record.value))
    }

    /// Remove `key`. Returns false (and writes nothing) if it was absent.
    pub fn delete(&mut self, key: &[u8]) -> StoreResult<bool> {
        if !self.index.contains_key(key) {
            return Ok(false);
        }

        let record = encode_record(key, &[], Operation::Delete, self.config.max_key_size, 0)?;
        self.append(&record)?;

        if let Some(old) = self.index.remove(key) {
            self.live_bytes -= old.len;
        }

        self.maybe_compact();
        Ok(true)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Live keys in the order their current records were written.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut live: Vec<(&Vec<u8>, &Location)> = self.index.iter().collect();
        live.sort_by_key(|(_, loc)| loc.position());
        live.into_iter().map(|(key, _)| key.clone()).collect()
    }

    /// Make every record appended so far durable.
    ///
    /// Only needed with `sync_writes = false`; durable stores sync per record.
    pub fn sync(&self) -> StoreResult<()> {
        self.writer.sync()
    }

    /// Rewrite all live records into a single fresh segment and drop the rest.
    pub fn compact(&mut self) -> StoreResult<CompactionReport> {
        self.writer.sync()?;

        let mut live: Vec<(Vec<u8>, Location)> = self.index.iter().map(|(k, loc)| (k.clone(), *loc)).collect();
        live.sort_by_key(|(_, loc)| loc.position());

        let new_seq = self.writer.seq() + 1;
        let dir = self.dir.clone();
        let records = live
            .iter()
            .map(|(_, loc)| read_record_at(&segment_path(&dir, loc.seq), loc.offset, loc.len));
        let (placed, size) = write_compacted_segment(&self.dir, new_seq, records)?;

        let original_bytes = self.total_bytes;
        let superseded: Vec<PathBuf> = self.segments.values().cloned().collect();

        // The new segment is durable; switch the index over before unlinking anything.
        for ((key, _), (offset, len)) in live.iter().zip(placed) {
            self.index.insert(key.clone(), Location { seq: new_seq, offset, len });
        }
        self.writer = SegmentWriter::open(&self.dir, new_seq, self.config.sync_writes)?;
        self.segments.clear();
        self.segments.insert(new_seq, self.writer.path().to_path_buf());
        self.total_bytes = size;
        self.live_bytes = size;

        remove_segments(&self.dir, &superseded)?;

        let report = CompactionReport {
            segment: self.writer.path().to_path_buf(),
            segments_removed: superseded.len(),
            live_records: live.len(),
            original_bytes,
            compacted_bytes: size,
        };
        info!(
            dir = %self.dir.display(),
            live = report.live_records,
            removed_segments = report.segments_removed,
            saved = report.bytes_saved(),
            "compacted segment store"
        );
        Ok(report)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Bytes across all segments, including dead records.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes no live key points at.
    pub fn dead_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.live_bytes)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn append(&mut self, record: &[u8]) -> StoreResult<Location> {
        let len = record.len() as u64;
        if self.writer.size() > 0 && self.writer.size() + len > self.config.segment_rotation_bytes {
            self.writer.rotate()?;
            self.segments.insert(self.writer.seq(), self.writer.path().to_path_buf());
        }

        let offset = self.writer.append(record)?;
        self.total_bytes += len;
        Ok(Location {
            seq: self.writer.seq(),
            offset,
            len,
        })
    }

    /// Compaction is housekeeping: the write that triggered it already
    /// succeeded, so a failed pass is logged rather than returned.
    fn maybe_compact(&mut self) {
        if !needs_compaction(
            self.total_bytes,
            self.live_bytes,
            self.config.compaction_trigger_ratio,
            self.config.min_compaction_bytes,
        ) {
            return;
        }
        if let Err(err) = self.compact() {
            warn!(dir = %self.dir.display(), error = %err, "automatic compaction failed");
        }
    }
}

fn truncate_segment(path: &Path, len: u64) -> StoreResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| StoreError::io_at(path, &e, "Failed to open segment for truncation"))?;
    file.set_len(len)
        .map_err(|e| StoreError::io_at(path, &e, "Failed to truncate segment"))?;
    durable_sync(&file).map_err(|e| StoreError::io_at(path, &e, "Failed to sync truncated segment"))
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("dir", &self.dir)
            .field("keys", &self.index.len())
            .field("segments", &self.segments.len())
            .field("total_bytes", &self.total_bytes)
            .field("live_bytes", &self.live_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HEADER_SIZE;
    use tempfile::TempDir;

    fn no_auto_compaction() -> StoreConfig {
        StoreConfig {
            compaction_trigger_ratio: 1.0,
            min_compaction_bytes: u64::MAX,
            ..StoreConfig::durable()
        }
    }

    fn test_store() -> (LogStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path().join("store"), no_auto_compaction()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_open_empty() {
        let (store, _dir) = test_store();
        assert!(store.is_empty());
        assert_eq!(store.segment_count(), 1);
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_put_get_overwrite() {
        let (mut store, _dir) = test_store();
        store.put(b"hello", b"world").unwrap();
        assert_eq!(store.get(b"hello").unwrap(), Some(b"world".to_vec()));

        store.put(b"hello", b"again").unwrap();
        assert_eq!(store.get(b"hello").unwrap(), Some(b"again".to_vec()));
        assert_eq!(store.len(), 1);
        assert!(store.dead_bytes() > 0);
        assert_eq!(store.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (mut store, _dir) = test_store();
        store.put(b"k", b"v").unwrap();
        assert!(store.delete(b"k").unwrap());
        let bytes_after_first = store.total_bytes();

        assert!(!store.delete(b"k").unwrap());
        assert_eq!(store.total_bytes(), bytes_after_first, "missing delete must not write");
        assert!(!store.contains_key(b"k"));
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_reopen_replays_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        {
            let mut store = LogStore::open(&path, no_auto_compaction()).unwrap();
            store.put(b"survive1", b"yes").unwrap();
            store.put(b"survive2", b"also_yes").unwrap();
            store.put(b"doomed", b"temp").unwrap();
            store.delete(b"doomed").unwrap();
            store.put(b"survive1", b"updated").unwrap();
        }
        let store = LogStore::open(&path, no_auto_compaction()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b"survive1").unwrap(), Some(b"updated".to_vec()));
        assert_eq!(store.get(b"survive2").unwrap(), Some(b"also_yes".to_vec()));
        assert_eq!(store.get(b"doomed").unwrap(), None);
    }

    #[test]
    fn test_keys_follow_write_order() {
        let (mut store, _dir) = test_store();
        store.put(b"c", b"1").unwrap();
        store.put(b"a", b"2").unwrap();
        store.put(b"b", b"3").unwrap();
        store.put(b"c", b"4").unwrap();
        assert_eq!(store.keys(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_create_wipes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        {
            let mut store = LogStore::open(&path, no_auto_compaction()).unwrap();
            store.put(b"old", b"data").unwrap();
        }
        let store = LogStore::create(&path, no_auto_compaction()).unwrap();
        assert!(store.is_empty());
        assert!(!store.contains_key(b"old"));
    }

    #[test]
    fn test_torn_tail_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let seg;
        {
            let mut store = LogStore::open(&path, no_auto_compaction()).unwrap();
            store.put(b"complete", b"entry").unwrap();
            seg = store.writer.path().to_path_buf();
        }
        let good_len = std::fs::metadata(&seg).unwrap().len();
        let mut data = std::fs::read(&seg).unwrap();
        let partial = encode_record(b"partial", b"value", Operation::Put, 1024, 1024).unwrap();
        data.extend_from_slice(&partial[..HEADER_SIZE + 2]);
        std::fs::write(&seg, data).unwrap();

        let mut store = LogStore::open(&path, no_auto_compaction()).unwrap();
        assert_eq!(std::fs::metadata(&seg).unwrap().len(), good_len);
        assert_eq!(store.len(), 1);

        store.put(b"after", b"crash").unwrap();
        drop(store);
        let store = LogStore::open(&path, no_auto_compaction()).unwrap();
        assert_eq!(store.get(b"after").unwrap(), Some(b"crash".to_vec()));
        assert_eq!(store.get(b"complete").unwrap(), Some(b"entry".to_vec()));
    }

    #[test]
    fn test_checksum_failure_surfaces_on_get() {
        let (mut store, _dir) = test_store();
        store.put(b"key", b"value").unwrap();
        let seg = store.writer.path().to_path_buf();

        let mut data = std::fs::read(&seg).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&seg, data).unwrap();

        assert!(matches!(store.get(b"key"), Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_oversized_key_rejected_before_io() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            max_key_size: 4,
            ..no_auto_compaction()
        };
        let mut store = LogStore::open(dir.path(), config).unwrap();
        let result = store.put(b"too-long", b"v");
        assert!(matches!(result, Err(StoreError::OversizedEntry { component: "key", .. })));
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_rotation_spreads_segments() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            segment_rotation_bytes: 4096,
            ..no_auto_compaction()
        };
        let mut store = LogStore::open(dir.path(), config.clone()).unwrap();
        let value = vec![0x5Au8; 1000];
        for i in 0..10u8 {
            store.put(&[i], &value).unwrap();
        }
        assert!(store.segment_count() >= 3);
        drop(store);

        let store = LogStore::open(dir.path(), config).unwrap();
        assert_eq!(store.len(), 10);
        assert_eq!(store.get(&[9]).unwrap(), Some(value));
    }

    #[test]
    fn test_compact_keeps_live_set() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            segment_rotation_bytes: 4096,
            ..no_auto_compaction()
        };
        let mut store = LogStore::open(dir.path(), config.clone()).unwrap();
        for i in 0..20u8 {
            store.put(&[i], &[i; 300]).unwrap();
        }
        for i in 0..15u8 {
            store.delete(&[i]).unwrap();
        }
        let keys_before = store.keys();

        let report = store.compact().unwrap();
        assert_eq!(report.live_records, 5);
        assert!(report.segments_removed >= 2);
        assert!(report.bytes_saved() > 0);
        assert_eq!(store.segment_count(), 1);
        assert_eq!(store.dead_bytes(), 0);
        assert_eq!(store.keys(), keys_before);

        store.put(b"fresh", b"write").unwrap();
        drop(store);

        let store = LogStore::open(dir.path(), config).unwrap();
        assert_eq!(store.len(), 6);
        assert_eq!(store.get(&[19]).unwrap(), Some(vec![19; 300]));
        assert_eq!(store.get(&[0]).unwrap(), None);
        assert_eq!(store.get(b"fresh").unwrap(), Some(b"write".to_vec()));
    }

    #[test]
    fn test_automatic_compaction() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            compaction_trigger_ratio: 0.5,
            min_compaction_bytes: 0,
            ..StoreConfig::relaxed()
        };
        let mut store = LogStore::open(dir.path(), config).unwrap();
        for round in 0..10u8 {
            store.put(b"same", &[round; 64]).unwrap();
        }
        // Nine of ten records are dead; compaction must have run along the way.
        assert!(store.dead_bytes() < store.total_bytes());
        assert_eq!(store.get(b"same").unwrap(), Some(vec![9; 64]));
    }
}
