//! # Tangle Keys
//!
//! A tangle key is an immutable pair of a kind tag and a byte sequence. The
//! kind tag records what the key was built from (an integer, raw bytes, or
//! text) so enumeration can hand back typed keys, but it takes no part in
//! equality, ordering, or hashing: two keys are the same key iff their byte
//! sequences are equal.
//!
//! Ordering is lexicographic unsigned-byte comparison, with a shorter
//! sequence sorting before any longer sequence it prefixes: exactly what
//! `[u8]`'s `Ord` does, and exactly the order the B-tree maintains on disk.
//!
//! Numeric keys encode little-endian, so they round-trip bit-exactly but do
//! not enumerate in numeric order. Text keys carry their bytes unmodified
//! under the `Text` tag.

use std::fmt;
use std::hash::{Hash, Hasher};

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use crate::config::MAX_KEY_LENGTH;

/// What a key was constructed from. Stored alongside each entry and
/// returned during enumeration; never part of key identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyKind {
    Text = 0,
    Bytes = 1,
    U32 = 2,
    I32 = 3,
    U64 = 4,
    I64 = 5,
}

impl KeyKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => KeyKind::Text,
            1 => KeyKind::Bytes,
            2 => KeyKind::U32,
            3 => KeyKind::I32,
            4 => KeyKind::U64,
            5 => KeyKind::I64,
            other => bail!("unknown key kind tag {}", other),
        })
    }
}

/// A typed byte-string key. At most [`MAX_KEY_LENGTH`] bytes.
///
/// Small keys (every numeric kind) are stored inline without allocating.
#[derive(Debug, Clone)]
pub struct TangleKey {
    kind: KeyKind,
    bytes: SmallVec<[u8; 16]>,
}

impl TangleKey {
    /// Builds a key from raw bytes under an explicit kind tag, enforcing the
    /// length cap. Used when reconstructing keys from the keys segment.
    pub fn from_raw(kind: KeyKind, bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() <= MAX_KEY_LENGTH,
            "key length {} exceeds maximum {}",
            bytes.len(),
            MAX_KEY_LENGTH
        );
        Ok(Self {
            kind,
            bytes: SmallVec::from_slice(bytes),
        })
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for TangleKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for TangleKey {}

impl PartialOrd for TangleKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TangleKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.as_slice().cmp(other.bytes.as_slice())
    }
}

impl Hash for TangleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for TangleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            KeyKind::Text => write!(f, "{:?}", String::from_utf8_lossy(&self.bytes)),
            KeyKind::Bytes => {
                write!(f, "0x")?;
                for b in self.bytes.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            KeyKind::U32 if self.bytes.len() == 4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&self.bytes);
                write!(f, "{}u32", u32::from_le_bytes(raw))
            }
            KeyKind::I32 if self.bytes.len() == 4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&self.bytes);
                write!(f, "{}i32", i32::from_le_bytes(raw))
            }
            KeyKind::U64 if self.bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.bytes);
                write!(f, "{}u64", u64::from_le_bytes(raw))
            }
            KeyKind::I64 if self.bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.bytes);
                write!(f, "{}i64", i64::from_le_bytes(raw))
            }
            _ => write!(f, "<{} bytes>", self.bytes.len()),
        }
    }
}

impl From<u32> for TangleKey {
    fn from(value: u32) -> Self {
        Self {
            kind: KeyKind::U32,
            bytes: SmallVec::from_slice(&value.to_le_bytes()),
        }
    }
}

impl From<i32> for TangleKey {
    fn from(value: i32) -> Self {
        Self {
            kind: KeyKind::I32,
            bytes: SmallVec::from_slice(&value.to_le_bytes()),
        }
    }
}

impl From<u64> for TangleKey {
    fn from(value: u64) -> Self {
        Self {
            kind: KeyKind::U64,
            bytes: SmallVec::from_slice(&value.to_le_bytes()),
        }
    }
}

impl From<i64> for TangleKey {
    fn from(value: i64) -> Self {
        Self {
            kind: KeyKind::I64,
            bytes: SmallVec::from_slice(&value.to_le_bytes()),
        }
    }
}

impl From<&str> for TangleKey {
    fn from(value: &str) -> Self {
        assert!(
            value.len() <= MAX_KEY_LENGTH,
            "text key exceeds maximum key length"
        );
        Self {
            kind: KeyKind::Text,
            bytes: SmallVec::from_slice(value.as_bytes()),
        }
    }
}

impl From<String> for TangleKey {
    fn from(value: String) -> Self {
        TangleKey::from(value.as_str())
    }
}

impl From<&[u8]> for TangleKey {
    fn from(value: &[u8]) -> Self {
        assert!(
            value.len() <= MAX_KEY_LENGTH,
            "byte key exceeds maximum key length"
        );
        Self {
            kind: KeyKind::Bytes,
            bytes: SmallVec::from_slice(value),
        }
    }
}

impl From<Vec<u8>> for TangleKey {
    fn from(value: Vec<u8>) -> Self {
        TangleKey::from(value.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_kind() {
        let text = TangleKey::from("\u{1}\0\0\0");
        let number = TangleKey::from(1u32);
        assert_eq!(text.as_bytes(), number.as_bytes());
        assert_eq!(text, number);
        assert_ne!(text.kind(), number.kind());
    }

    #[test]
    fn ordering_is_lexicographic_on_bytes() {
        let a = TangleKey::from("aa");
        let b = TangleKey::from("ab");
        let prefix = TangleKey::from("a");
        assert!(a < b);
        assert!(prefix < a);
    }

    #[test]
    fn numeric_keys_encode_little_endian() {
        let key = TangleKey::from(0x0102_0304u32);
        assert_eq!(key.as_bytes(), &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(key.kind(), KeyKind::U32);
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in [
            KeyKind::Text,
            KeyKind::Bytes,
            KeyKind::U32,
            KeyKind::I32,
            KeyKind::U64,
            KeyKind::I64,
        ] {
            assert_eq!(KeyKind::from_tag(kind.tag()).unwrap(), kind);
        }
        assert!(KeyKind::from_tag(42).is_err());
    }

    #[test]
    fn from_raw_enforces_length_cap() {
        let oversized = vec![0u8; MAX_KEY_LENGTH + 1];
        assert!(TangleKey::from_raw(KeyKind::Bytes, &oversized).is_err());

        let max = vec![0u8; MAX_KEY_LENGTH];
        assert!(TangleKey::from_raw(KeyKind::Bytes, &max).is_ok());
    }

    #[test]
    fn display_decodes_numeric_keys() {
        assert_eq!(TangleKey::from(1234u32).to_string(), "1234u32");
        assert_eq!(TangleKey::from(-5i64).to_string(), "-5i64");
        assert_eq!(TangleKey::from("abc").to_string(), "\"abc\"");
    }
}
