//! Append-only segment files
//!
//! A store directory holds `seg-{seq:016x}.spill` files. Only the highest
//! sequence is ever appended to; older segments are immutable until
//! compaction replaces them.
//!
//! Write path: encode record, append, durable_sync (when configured), then
//! the caller updates its index. Recovery replays each segment front to back,
//! skipping corrupt records by scanning for the next magic and stopping at a
//! torn tail.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::format::{decode_record, Record, RecordHeader, HEADER_SIZE, MAGIC_ARRAY};
use crate::platform_durability::durable_sync;

const SEGMENT_PREFIX: &str = "seg-";
const SEGMENT_SUFFIX: &str = ".spill";

/// Path of the segment with the given sequence number.
pub fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{}{:016x}{}", SEGMENT_PREFIX, seq, SEGMENT_SUFFIX))
}

/// Sequence number encoded in a segment file name, if it is one.
pub fn parse_segment_name(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// All segments in `dir`, sorted by sequence number.
pub fn list_segments(dir: &Path) -> StoreResult<Vec<(u64, PathBuf)>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StoreError::io_at(dir, &e, "Failed to read store directory"))?;

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io_at(dir, &e, "Failed to read directory entry"))?;
        if let Some(seq) = entry.file_name().to_str().and_then(parse_segment_name) {
            segments.push((seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Appends records to the active segment.
pub struct SegmentWriter {
    file: File,
    path: PathBuf,
    dir: PathBuf,
    seq: u64,
    /// Current file size, tracked to avoid stat calls
    size: u64,
    sync_writes: bool,
    /// Fail the next append after its bytes are written
    #[cfg(test)]
    fail_after_write: bool,
}

impl SegmentWriter {
    /// Open (or create) segment `seq` in `dir` for appending.
    pub fn open(dir: &Path, seq: u64, sync_writes: bool) -> StoreResult<Self> {
        let path = segment_path(dir, seq);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io_at(&path, &e, "Failed to open segment"))?;

        let size = file
            .metadata()
            .map_err(|e| StoreError::io_at(&path, &e, "Failed to stat segment"))?
            .len();

        Ok(Self {
            file,
            path,
            dir: dir.to_path_buf(),
            seq,
            size,
            sync_writes,
            #[cfg(test)]
            fail_after_write: false,
        })
    }

    /// Append an encoded record. Returns the offset it was written at.
    ///
    /// When `sync_writes` is set the record is on persistent media before
    /// this returns; the caller must not publish the record in its index
    /// until then. A failed append leaves no bytes behind, so offsets handed
    /// out afterwards stay exact.
    pub fn append(&mut self, record: &[u8]) -> StoreResult<u64> {
        let offset = self.size;

        if let Err(err) = self.write_record(record) {
            self.discard_partial();
            return Err(err);
        }

        self.size += record.len() as u64;
        Ok(offset)
    }

    fn write_record(&mut self, record: &[u8]) -> StoreResult<()> {
        self.file
            .write_all(record)
            .map_err(|e| StoreError::io_at(&self.path, &e, "Segment write failed"))?;

        #[cfg(test)]
        {
            if std::mem::take(&mut self.fail_after_write) {
                let injected = std::io::Error::new(std::io::ErrorKind::Other, "injected sync failure");
                return Err(StoreError::io_at(&self.path, &injected, "Segment durable_sync failed"));
            }
        }

        if self.sync_writes {
            durable_sync(&self.file)
                .map_err(|e| StoreError::io_at(&self.path, &e, "Segment durable_sync failed"))?;
        }
        Ok(())
    }

    /// Cut the file back to the last complete record after a failed append.
    fn discard_partial(&mut self) {
        let Err(err) = self.file.set_len(self.size) else {
            return;
        };
        warn!(path = %self.path.display(), size = self.size, error = %err, "could not drop partial record");
        match self.file.metadata() {
            // The bytes stay; later records start after them.
            Ok(meta) => self.size = meta.len(),
            Err(err) => warn!(path = %self.path.display(), error = %err, "segment size unknown after failed append"),
        }
    }

    /// Seal the current segment and continue in the next sequence number.
    pub fn rotate(&mut self) -> StoreResult<()> {
        durable_sync(&self.file)
            .map_err(|e| StoreError::io_at(&self.path, &e, "Segment sync before rotation failed"))?;

        let next = Self::open(&self.dir, self.seq + 1, self.sync_writes)?;
        *self = next;
        Ok(())
    }

    /// Make every record appended so far durable.
    pub fn sync(&self) -> StoreResult<()> {
        durable_sync(&self.file).map_err(|e| StoreError::io_at(&self.path, &e, "Segment sync failed"))
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A record recovered from a segment, with its position.
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub record: Record,
    pub offset: u64,
    pub len: u64,
}

/// Outcome of replaying one segment.
#[derive(Debug, Default)]
pub struct SegmentScan {
    pub records: Vec<ScannedRecord>,
    /// Offset where replay stopped; bytes past it are a torn or unreadable tail
    pub end: u64,
    /// File length at scan time
    pub file_len: u64,
    /// Corrupt regions skipped by resynchronizing on the next magic
    pub skipped: usize,
}

impl SegmentScan {
    pub fn has_bad_tail(&self) -> bool {
        self.end < self.file_len
    }
}

/// Replay every readable record in a segment.
pub fn scan_segment(path: &Path) -> StoreResult<SegmentScan> {
    let mut file = File::open(path).map_err(|e| StoreError::io_at(path, &e, "Failed to open segment for recovery"))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)
        .map_err(|e| StoreError::io_at(path, &e, "Failed to read segment"))?;

    let mut scan = SegmentScan {
        file_len: buffer.len() as u64,
        ..SegmentScan::default()
    };
    let mut offset = 0usize;

    while offset + HEADER_SIZE <= buffer.len() {
        if buffer[offset..offset + 4] != MAGIC_ARRAY {
            warn!(path = %path.display(), offset, "bad magic in segment, scanning for next record");
            match find_next_magic(&buffer, offset + 1) {
                Some(next) => {
                    scan.skipped += 1;
                    offset = next;
                    continue;
                }
                None => break,
            }
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&buffer[offset..offset + HEADER_SIZE]);
        let record_len = RecordHeader::from_bytes(&header_bytes).record_len() as usize;

        if offset + record_len > buffer.len() {
            // A damaged length in mid-segment looks like a torn tail; a later
            // record says otherwise.
            if let Some(next) = find_next_magic(&buffer, offset + HEADER_SIZE) {
                warn!(
                    path = %path.display(),
                    offset,
                    need = record_len,
                    "record overruns segment but later records follow, skipping"
                );
                scan.skipped += 1;
                offset = next;
                continue;
            }

            // Incomplete final record: this is where the previous process stopped.
            warn!(
                path = %path.display(),
                offset,
                need = record_len,
                have = buffer.len() - offset,
                "torn write at segment tail"
            );
            break;
        }

        match decode_record(&buffer[offset..offset + record_len], path, offset as u64) {
            Ok(record) => {
                scan.records.push(ScannedRecord {
                    record,
                    offset: offset as u64,
                    len: record_len as u64,
                });
                offset += record_len;
            }
            Err(err) => {
                warn!(path = %path.display(), offset, error = %err, "corrupt record in segment, skipping");
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => {
                        scan.skipped += 1;
                        offset = next;
                    }
                    None => break,
                }
            }
        }
    }

    scan.end = offset.min(buffer.len()) as u64;
    Ok(scan)
}

/// Read and verify the record stored at `offset` in `path`.
pub fn read_record_at(path: &Path, offset: u64, len: u64) -> StoreResult<Record> {
    let mut file = File::open(path).map_err(|e| StoreError::io_at(path, &e, "Failed to open segment"))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| StoreError::io_at(path, &e, "Failed to seek segment"))?;

    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreError::TornWrite {
                path: path.to_path_buf(),
                expected_size: len,
                available_bytes: file.metadata().map(|m| m.len().saturating_sub(offset)).unwrap_or(0),
                offset,
            }
        } else {
            StoreError::io_at(path, &e, "Failed to read record")
        }
    })?;

    decode_record(&buf, path, offset)
}

/// Position of the next record magic at or after `start`.
fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .get(start..)?
        .windows(MAGIC_ARRAY.len())
        .position(|window| window == MAGIC_ARRAY)
        .map(|pos| start + pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{encode_record, Operation, MAX_KEY_SIZE, MAX_VALUE_SIZE};
    use tempfile::TempDir;

    fn put(key: &[u8], value: &[u8]) -> Vec<u8> {
        encode_record(key, value, Operation::Put, MAX_KEY_SIZE, MAX_VALUE_SIZE).unwrap()
    }

    #[test]
    fn test_segment_naming() {
        let path = segment_path(Path::new("/tmp"), 0x2a);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "seg-000000000000002a.spill");
        assert_eq!(parse_segment_name(name), Some(0x2a));
        assert_eq!(parse_segment_name("seg-2a.spill"), None);
        assert_eq!(parse_segment_name("seg-000000000000002a.spill.compact"), None);
        assert_eq!(parse_segment_name("wal-000000000000002a.spill"), None);
    }

    #[test]
    fn test_append_then_scan() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(tmp.path(), 1, true).unwrap();
        let first = writer.append(&put(b"k1", b"v1")).unwrap();
        let second = writer.append(&put(b"k2", b"v2")).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);

        let scan = scan_segment(writer.path()).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.records[1].record.key, b"k2");
        assert_eq!(scan.records[1].offset, second);
        assert!(!scan.has_bad_tail());

        let record = read_record_at(writer.path(), second, scan.records[1].len).unwrap();
        assert_eq!(record.value, b"v2");
    }

    #[test]
    fn test_rotation_moves_to_next_sequence() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(tmp.path(), 3, false).unwrap();
        writer.append(&put(b"a", b"1")).unwrap();
        writer.rotate().unwrap();
        assert_eq!(writer.seq(), 4);
        assert_eq!(writer.size(), 0);
        writer.append(&put(b"b", b"2")).unwrap();

        let segments = list_segments(tmp.path()).unwrap();
        let seqs: Vec<u64> = segments.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(tmp.path(), 1, true).unwrap();
        writer.append(&put(b"good1", b"val1")).unwrap();
        let bad = writer.append(&put(b"good2", b"val2")).unwrap();
        writer.append(&put(b"good3", b"val3")).unwrap();
        let path = writer.path().to_path_buf();
        drop(writer);

        let mut data = std::fs::read(&path).unwrap();
        data[bad as usize + HEADER_SIZE + 1] ^= 0xFF;
        std::fs::write(&path, data).unwrap();

        let scan = scan_segment(&path).unwrap();
        let keys: Vec<&[u8]> = scan.records.iter().map(|r| r.record.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"good1"[..], &b"good3"[..]]);
        assert_eq!(scan.skipped, 1);
        assert!(!scan.has_bad_tail());
    }

    #[test]
    fn test_torn_tail_stops_cleanly() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(tmp.path(), 1, true).unwrap();
        writer.append(&put(b"complete", b"entry")).unwrap();
        let good_len = writer.size();
        let path = writer.path().to_path_buf();
        drop(writer);

        let mut data = std::fs::read(&path).unwrap();
        let partial = put(b"partial", b"never finished");
        data.extend_from_slice(&partial[..HEADER_SIZE + 3]);
        std::fs::write(&path, data).unwrap();

        let scan = scan_segment(&path).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].record.key, b"complete");
        assert_eq!(scan.end, good_len);
        assert!(scan.has_bad_tail());
    }

    #[test]
    fn test_failed_append_leaves_no_bytes() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(tmp.path(), 1, true).unwrap();
        writer.append(&put(b"first", b"1")).unwrap();
        let before = writer.size();

        writer.fail_after_write = true;
        assert!(writer.append(&put(b"lost", b"never synced")).is_err());
        assert_eq!(writer.size(), before);
        assert_eq!(std::fs::metadata(writer.path()).unwrap().len(), before);

        let record = put(b"second", b"2");
        let offset = writer.append(&record).unwrap();
        assert_eq!(offset, before);
        let read = read_record_at(writer.path(), offset, record.len() as u64).unwrap();
        assert_eq!(read.key, b"second");
        assert_eq!(read.value, b"2");

        let scan = scan_segment(writer.path()).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert!(!scan.has_bad_tail());
    }

    #[test]
    fn test_damaged_length_mid_segment_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(tmp.path(), 1, true).unwrap();
        writer.append(&put(b"good1", b"val1")).unwrap();
        let bad = writer.append(&put(b"good2", b"val2")).unwrap() as usize;
        writer.append(&put(b"good3", b"val3")).unwrap();
        let path = writer.path().to_path_buf();
        drop(writer);

        // value_len lives at header bytes 6..10
        let mut data = std::fs::read(&path).unwrap();
        data[bad + 6..bad + 10].copy_from_slice(&0x00ff_ffffu32.to_le_bytes());
        std::fs::write(&path, data).unwrap();

        let scan = scan_segment(&path).unwrap();
        let keys: Vec<&[u8]> = scan.records.iter().map(|r| r.record.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"good1"[..], &b"good3"[..]]);
        assert_eq!(scan.skipped, 1);
        assert!(!scan.has_bad_tail());
    }

    #[test]
    fn test_read_past_end_is_torn() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(tmp.path(), 1, true).unwrap();
        writer.append(&put(b"k", b"v")).unwrap();
        let result = read_record_at(writer.path(), 0, 4096);
        assert!(matches!(result, Err(StoreError::TornWrite { .. })));
    }
}
