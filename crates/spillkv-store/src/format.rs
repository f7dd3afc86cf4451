//! Binary record format for segment files
//!
//! Every record is a fixed header followed by the raw key and value bytes:
//! RecordHeader (24 bytes) + key_bytes + value_bytes

use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Magic bytes identifying a record start: "SPKV" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = *b"SPKV";

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// Hard key size limit imposed by the u16 length field
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Hard value size limit (128MB)
pub const MAX_VALUE_SIZE: usize = 128 * 1024 * 1024;

/// Record operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or replace a key-value pair
    Put = 1,
    /// Tombstone for a key
    Delete = 2,
}

impl Operation {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// Fixed-size header in front of every record.
///
/// Layout:
///   [0..4]   magic:     [u8;4] - "SPKV"
///   [4..6]   key_len:   u16 LE
///   [6..10]  value_len: u32 LE
///   [10..14] checksum:  u32 LE - CRC32C of (op, key_bytes, value_bytes)
///   [14]     op:        u8     - Put=1, Delete=2
///   [15..24] reserved, zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub key_len: u16,
    pub value_len: u32,
    pub checksum: u32,
    pub op: u8,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.key_len.to_le_bytes());
        buf[6..10].copy_from_slice(&self.value_len.to_le_bytes());
        buf[10..14].copy_from_slice(&self.checksum.to_le_bytes());
        buf[14] = self.op;
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [buf[0], buf[1], buf[2], buf[3]],
            key_len: u16::from_le_bytes([buf[4], buf[5]]),
            value_len: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            checksum: u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]),
            op: buf[14],
        }
    }

    /// Total on-disk size of the record this header introduces.
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.key_len as u64 + self.value_len as u64
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub op: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

fn record_checksum(op: u8, key: &[u8], value: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&[op]);
    let crc = crc32c::crc32c_append(crc, key);
    crc32c::crc32c_append(crc, value)
}

/// Reject keys and values over the given limits before anything is allocated.
pub fn check_sizes(key: &[u8], value: &[u8], max_key: usize, max_value: usize) -> StoreResult<()> {
    if key.len() > max_key.min(MAX_KEY_SIZE) {
        return Err(StoreError::OversizedEntry {
            entry_size: key.len() as u64,
            max_size: max_key.min(MAX_KEY_SIZE) as u64,
            component: "key",
        });
    }
    if value.len() > max_value.min(MAX_VALUE_SIZE) {
        return Err(StoreError::OversizedEntry {
            entry_size: value.len() as u64,
            max_size: max_value.min(MAX_VALUE_SIZE) as u64,
            component: "value",
        });
    }
    Ok(())
}

/// Serialize a record: header + key + value.
///
/// Tombstones always carry an empty value.
pub fn encode_record(
    key: &[u8],
    value: &[u8],
    op: Operation,
    max_key: usize,
    max_value: usize,
) -> StoreResult<Vec<u8>> {
    let value: &[u8] = match op {
        Operation::Put => value,
        Operation::Delete => &[],
    };
    check_sizes(key, value, max_key, max_value)?;

    let header = RecordHeader {
        magic: MAGIC_ARRAY,
        key_len: key.len() as u16,
        value_len: value.len() as u32,
        checksum: record_checksum(op as u8, key, value),
        op: op as u8,
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    Ok(buf)
}

/// Decode one record from the start of `data`.
///
/// `path` and `offset` only feed error context.
pub fn decode_record(data: &[u8], path: &Path, offset: u64) -> StoreResult<Record> {
    let Some(header_bytes) = data.get(..HEADER_SIZE) else {
        return Err(StoreError::TornWrite {
            path: path.to_path_buf(),
            expected_size: HEADER_SIZE as u64,
            available_bytes: data.len() as u64,
            offset,
        });
    };
    let mut buf = [0u8; HEADER_SIZE];
    buf.copy_from_slice(header_bytes);
    let header = RecordHeader::from_bytes(&buf);

    if header.magic != MAGIC_ARRAY {
        return Err(StoreError::NoMagicFound {
            path: path.to_path_buf(),
            offset,
            found_bytes: header.magic,
        });
    }

    let total = header.record_len() as usize;
    if data.len() < total {
        return Err(StoreError::TornWrite {
            path: path.to_path_buf(),
            expected_size: header.record_len(),
            available_bytes: data.len() as u64,
            offset,
        });
    }

    let key_end = HEADER_SIZE + header.key_len as usize;
    let key = &data[HEADER_SIZE..key_end];
    let value = &data[key_end..total];

    let computed = record_checksum(header.op, key, value);
    if computed != header.checksum {
        return Err(StoreError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum,
            actual: computed,
            offset,
        });
    }

    let op = Operation::from_byte(header.op).ok_or_else(|| StoreError::Corrupted {
        path: path.to_path_buf(),
        offset,
        reason: format!("Invalid operation type: {}", header.op),
    })?;

    Ok(Record {
        op,
        key: key.to_vec(),
        value: value.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(key: &[u8], value: &[u8], op: Operation) -> Vec<u8> {
        encode_record(key, value, op, MAX_KEY_SIZE, MAX_VALUE_SIZE).unwrap()
    }

    #[test]
    fn test_put_record_decodes() {
        let data = encode(b"test_key", b"test_value_data", Operation::Put);
        assert_eq!(data.len(), HEADER_SIZE + 8 + 15);

        let record = decode_record(&data, Path::new("<buffer>"), 0).unwrap();
        assert_eq!(record.op, Operation::Put);
        assert_eq!(record.key, b"test_key");
        assert_eq!(record.value, b"test_value_data");
    }

    #[test]
    fn test_tombstone_drops_value() {
        let data = encode(b"gone", b"ignored", Operation::Delete);
        let record = decode_record(&data, Path::new("<buffer>"), 0).unwrap();
        assert_eq!(record.op, Operation::Delete);
        assert!(record.value.is_empty());
    }

    #[test]
    fn test_configured_limits_rejected() {
        let result = encode_record(&[0u8; 9], b"v", Operation::Put, 8, 64);
        assert!(matches!(result, Err(StoreError::OversizedEntry { component: "key", .. })));

        let result = encode_record(b"k", &[0u8; 65], Operation::Put, 8, 64);
        assert!(matches!(result, Err(StoreError::OversizedEntry { component: "value", .. })));

        assert!(encode_record(&[0u8; 8], &[0u8; 64], Operation::Put, 8, 64).is_ok());
    }

    #[test]
    fn test_corrupted_magic_detected() {
        let mut data = encode(b"key", b"value", Operation::Put);
        data[0] = 0xFF;
        let result = decode_record(&data, Path::new("<buffer>"), 0);
        assert!(matches!(result, Err(StoreError::NoMagicFound { .. })));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut data = encode(b"key", b"value", Operation::Put);
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let result = decode_record(&data, Path::new("<buffer>"), 0);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_flipped_op_detected() {
        let mut data = encode(b"key", b"", Operation::Put);
        data[14] = Operation::Delete as u8;
        let result = decode_record(&data, Path::new("<buffer>"), 0);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_record_is_torn() {
        let data = encode(b"key", b"value", Operation::Put);
        let result = decode_record(&data[..data.len() - 2], Path::new("<buffer>"), 40);
        match result {
            Err(StoreError::TornWrite { offset, .. }) => assert_eq!(offset, 40),
            other => panic!("expected TornWrite, got {:?}", other),
        }
        assert!(matches!(
            decode_record(&data[..10], Path::new("<buffer>"), 0),
            Err(StoreError::TornWrite { .. })
        ));
    }
}
