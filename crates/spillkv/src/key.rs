//! Immutable opaque cache keys.

use std::borrow::Borrow;
use std::fmt;

/// A cache key: an owned, immutable byte sequence.
///
/// Hashes and compares exactly like the underlying `[u8]`, so both tiers
/// can be probed with a borrowed slice.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Box<[u8]>);

impl Key {
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        Key(bytes.into())
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        Key(bytes.into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq<[u8]> for Key {
    fn eq(&self, other: &[u8]) -> bool {
        *self.0 == *other
    }
}

impl PartialEq<&[u8]> for Key {
    fn eq(&self, other: &&[u8]) -> bool {
        *self.0 == **other
    }
}

impl PartialEq<&str> for Key {
    fn eq(&self, other: &&str) -> bool {
        *self.0 == *other.as_bytes()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(\"{}\")", self.0.escape_ascii())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    #[test]
    fn test_lookup_by_slice() {
        let mut map: HashMap<Key, u32> = HashMap::new();
        map.insert(Key::from_slice(b"alpha"), 1);
        assert_eq!(map.get(&b"alpha"[..]), Some(&1));
        assert_eq!(map.get(&b"beta"[..]), None);
    }

    #[test]
    fn test_display_escapes() {
        let key = Key::from_slice(&[b'a', 0xff, b'\n']);
        assert_eq!(key.to_string(), "a\\xff\\n");
        assert_eq!(format!("{:?}", key), "Key(\"a\\xff\\n\")");
    }

    #[test]
    fn test_comparisons() {
        let key = Key::from_slice(b"k1");
        assert_eq!(key, "k1");
        assert_eq!(key, &b"k1"[..]);
        assert_eq!(key.len(), 2);
        assert_eq!(key.to_vec(), b"k1".to_vec());
    }
}
