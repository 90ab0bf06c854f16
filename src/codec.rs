//! # Value Codecs
//!
//! Values flow through a caller-supplied [`Codec`]: `serialize` appends the
//! value's bytes to the tangle's scratch buffer *before* any data-segment
//! space is reserved, and `deserialize` rebuilds the value from a stored
//! region. Because a failed serialization happens before anything touches
//! disk, a failing codec aborts the operation cleanly.
//!
//! ## Padding Tolerance
//!
//! An in-place replacement with a smaller serialization keeps the entry's
//! allocated region and zero-fills the tail, so `deserialize` may see
//! trailing zero bytes past the value proper. Codecs must therefore be
//! fixed-size or self-delimiting: [`PodCodec`] reads exactly
//! `size_of::<T>()` bytes, and [`Utf8Codec`] strips trailing NUL padding.
//! [`BytesCodec`] is the raw escape hatch; it hands back the whole region,
//! so embedders storing variable-length blobs they intend to overwrite
//! should carry their own length prefix.

use std::marker::PhantomData;

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Serialization contract between the engine and application values.
pub trait Codec<V>: Send + 'static {
    /// Appends the serialized form of `value` to `out`.
    fn serialize(&self, value: &V, out: &mut Vec<u8>) -> Result<()>;

    /// Rebuilds a value from a stored data region. `bytes` may carry zero
    /// padding past the value (see module docs).
    fn deserialize(&self, bytes: &[u8]) -> Result<V>;
}

/// Fixed-size plain-old-data codec via zerocopy. Works for the integer
/// primitives and any `#[repr(C)]` type deriving the zerocopy traits.
#[derive(Debug, Default, Clone, Copy)]
pub struct PodCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> PodCodec<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Codec<T> for PodCodec<T>
where
    T: IntoBytes + FromBytes + Immutable + Copy + Send + 'static,
{
    fn serialize(&self, value: &T, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        let size = std::mem::size_of::<T>();
        ensure!(
            bytes.len() >= size,
            "data region too small for value: {} < {}",
            bytes.len(),
            size
        );
        T::read_from_bytes(&bytes[..size])
            .map_err(|e| eyre::eyre!("failed to decode fixed-size value: {:?}", e))
    }
}

/// UTF-8 string codec. Serializes the raw bytes; deserialization strips the
/// zero padding a shrinking replacement leaves behind, so strings that end
/// in NUL cannot round-trip through replacement.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn serialize(&self, value: &String, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        let trimmed_len = bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        String::from_utf8(bytes[..trimmed_len].to_vec())
            .map_err(|e| eyre::eyre!("stored value is not valid UTF-8: {}", e))
    }
}

/// Raw byte codec. Returns the entire stored region, padding included.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn serialize(&self, value: &Vec<u8>, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value);
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_codec_round_trips_integers() {
        let codec = PodCodec::<u64>::new();
        let mut buf = Vec::new();
        codec.serialize(&0xDEAD_BEEFu64, &mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(codec.deserialize(&buf).unwrap(), 0xDEAD_BEEFu64);
    }

    #[test]
    fn pod_codec_ignores_trailing_padding() {
        let codec = PodCodec::<u32>::new();
        let mut buf = Vec::new();
        codec.serialize(&7u32, &mut buf).unwrap();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(codec.deserialize(&buf).unwrap(), 7);
    }

    #[test]
    fn pod_codec_rejects_short_region() {
        let codec = PodCodec::<u64>::new();
        assert!(codec.deserialize(&[1, 2, 3]).is_err());
    }

    #[test]
    fn utf8_codec_strips_zero_padding() {
        let codec = Utf8Codec;
        let mut buf = Vec::new();
        codec.serialize(&"abc".to_string(), &mut buf).unwrap();
        buf.extend_from_slice(&[0, 0, 0, 0, 0]);
        assert_eq!(codec.deserialize(&buf).unwrap(), "abc");
    }

    #[test]
    fn utf8_codec_empty_value() {
        let codec = Utf8Codec;
        assert_eq!(codec.deserialize(&[]).unwrap(), "");
        assert_eq!(codec.deserialize(&[0, 0]).unwrap(), "");
    }

    #[test]
    fn bytes_codec_returns_region_verbatim() {
        let codec = BytesCodec;
        let mut buf = Vec::new();
        codec.serialize(&vec![1, 2, 3], &mut buf).unwrap();
        assert_eq!(codec.deserialize(&buf).unwrap(), vec![1, 2, 3]);
    }
}
