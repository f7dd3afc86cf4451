//! Error types for cache operations

use spillkv_store::StoreError;
use thiserror::Error;

/// Failure reported by a [`Codec`](crate::codec::Codec).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl CodecError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        CodecError(err.into())
    }

    /// The underlying codec error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

/// Cache error types
///
/// Keys are carried as raw bytes and rendered with non-printable bytes
/// escaped.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Key is in neither tier
    #[error("key not found: \"{}\"", .key.escape_ascii())]
    NotFound { key: Vec<u8> },

    /// Key rejected at the boundary; nothing was mutated
    #[error("invalid key: {len} bytes exceeds the store limit of {max}")]
    InvalidKey { len: usize, max: usize },

    /// The persistent store failed
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// Stored bytes did not decode; the record is left in place
    #[error("corrupt record for key \"{}\": {source}", .key.escape_ascii())]
    CorruptRecord {
        key: Vec<u8>,
        #[source]
        source: CodecError,
    },

    /// The ghost tier lists a key the store does not hold
    #[error("missing record for spilled key \"{}\"", .key.escape_ascii())]
    MissingRecord { key: Vec<u8> },

    /// Value could not be encoded for spilling; the memory tier is unchanged
    #[error("failed to encode value for key \"{}\": {source}", .key.escape_ascii())]
    Encode {
        key: Vec<u8>,
        #[source]
        source: CodecError,
    },

    /// A consistency check found broken tier bookkeeping
    #[error("inconsistent cache state: {0}")]
    Inconsistent(String),

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_escapes_key() {
        let err = CacheError::NotFound {
            key: vec![b'k', 0x00, b'1'],
        };
        assert_eq!(err.to_string(), "key not found: \"k\\x001\"");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_store_error_converts() {
        let store_err = StoreError::InvalidConfig("bad".into());
        let err: CacheError = store_err.into();
        assert!(matches!(err, CacheError::Store(StoreError::InvalidConfig(_))));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_corrupt_record_keeps_source() {
        let err = CacheError::CorruptRecord {
            key: b"k".to_vec(),
            source: CodecError::new("truncated"),
        };
        assert!(err.to_string().contains("truncated"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "truncated");
    }
}
