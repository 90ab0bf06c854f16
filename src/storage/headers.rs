//! # Segment Header
//!
//! Every segment begins with a fixed 12-byte header: a 4-byte little-endian
//! format version followed by an 8-byte little-endian data length. The
//! remainder of the stream is payload; payload offsets used throughout the
//! engine are relative to the end of this header.
//!
//! A freshly created stream reads as version 0, which open-time
//! initialization promotes to the current version. Any other version this
//! build does not understand refuses to open.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::SEGMENT_HEADER_SIZE;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SegmentHeader {
    format_version: U32,
    data_length: I64,
}

const _: () = assert!(std::mem::size_of::<SegmentHeader>() == SEGMENT_HEADER_SIZE);

impl SegmentHeader {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= SEGMENT_HEADER_SIZE,
            "buffer too small for SegmentHeader: {} < {}",
            bytes.len(),
            SEGMENT_HEADER_SIZE
        );
        Self::ref_from_bytes(&bytes[..SEGMENT_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse SegmentHeader: {:?}", e))
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= SEGMENT_HEADER_SIZE,
            "buffer too small for SegmentHeader: {} < {}",
            bytes.len(),
            SEGMENT_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut bytes[..SEGMENT_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse SegmentHeader: {:?}", e))
    }

    pub fn format_version(&self) -> u32 {
        self.format_version.get()
    }

    pub fn set_format_version(&mut self, version: u32) {
        self.format_version = U32::new(version);
    }

    pub fn data_length(&self) -> i64 {
        self.data_length.get()
    }

    pub fn set_data_length(&mut self, length: i64) {
        self.data_length = I64::new(length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_12() {
        assert_eq!(std::mem::size_of::<SegmentHeader>(), 12);
    }

    #[test]
    fn header_round_trip() {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];

        {
            let header = SegmentHeader::from_bytes_mut(&mut bytes).unwrap();
            header.set_format_version(1);
            header.set_data_length(4096);
        }

        let header = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.format_version(), 1);
        assert_eq!(header.data_length(), 4096);
    }

    #[test]
    fn header_fields_are_little_endian() {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        {
            let header = SegmentHeader::from_bytes_mut(&mut bytes).unwrap();
            header.set_format_version(0x0102_0304);
            header.set_data_length(0x05);
        }
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[4], 0x05);
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = [0u8; 4];
        assert!(SegmentHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn fresh_header_reads_version_zero() {
        let bytes = [0u8; SEGMENT_HEADER_SIZE];
        let header = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.format_version(), 0);
        assert_eq!(header.data_length(), 0);
    }
}
