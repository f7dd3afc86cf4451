//! Value codecs: how cached values become bytes in the store and back.
//!
//! The cache never looks inside a value; the caller picks the encoding.

use crate::error::CodecError;

/// Encode/decode pair for values of type `V`.
pub trait Codec<V> {
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;
}

/// Codec built from two closures.
///
/// ```
/// use spillkv::{CodecError, FnCodec};
///
/// let codec = FnCodec::new(
///     |n: &u64| -> Result<Vec<u8>, CodecError> { Ok(n.to_le_bytes().to_vec()) },
///     |b: &[u8]| -> Result<u64, CodecError> {
///         let arr: [u8; 8] = b.try_into().map_err(|_| CodecError::new("expected 8 bytes"))?;
///         Ok(u64::from_le_bytes(arr))
///     },
/// );
/// # let _ = codec;
/// ```
#[derive(Clone)]
pub struct FnCodec<E, D> {
    encode: E,
    decode: D,
}

impl<E, D> FnCodec<E, D> {
    pub fn new(encode: E, decode: D) -> Self {
        Self { encode, decode }
    }
}

impl<V, E, D> Codec<V> for FnCodec<E, D>
where
    E: Fn(&V) -> Result<Vec<u8>, CodecError>,
    D: Fn(&[u8]) -> Result<V, CodecError>,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        (self.encode)(value)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        (self.decode)(bytes)
    }
}

/// Identity codec for `Vec<u8>` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 codec for `String` values; invalid UTF-8 fails to decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, value: &String) -> Result<Vec<u8>, CodecError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(CodecError::new)
    }
}
