//! # Mapped Segment
//!
//! A `MappedSegment` is one storage stream exposed as a growable memory
//! mapping: a fixed 12-byte header, then `data_length` bytes of payload.
//! Payload space is handed out by `allocate`, which bumps `data_length`
//! atomically and remaps at the next growth-quantum multiple when the
//! mapping runs out. All reads and writes flow through the per-segment
//! [`ViewCache`] as scoped [`Range`] handles.
//!
//! ## Growth
//!
//! `set_len` extends the file with zero bytes, so any range returned by
//! `allocate` is zero-initialized, and every mapped byte past `data_length`
//! reads as zero. Resetting a segment re-zeroes the abandoned payload to
//! keep that guarantee across a clear.
//!
//! ## Remap Safety
//!
//! Remapping invalidates every pointer into the old mapping. The engine
//! allocates only on the worker thread and only between operations on
//! ranges, and the segment enforces the contract: a remap with outstanding
//! ranges fails instead of dangling.

use std::fs::File;
use std::sync::atomic::{AtomicI64, Ordering};

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::MmapMut;
use tracing::{debug, trace};

use crate::config::{FORMAT_VERSION, SEGMENT_HEADER_SIZE};
use crate::error::TangleError;

use super::headers::SegmentHeader;
use super::view::{Range, ViewCache};

#[derive(Debug)]
pub struct MappedSegment {
    name: &'static str,
    file: File,
    mmap: MmapMut,
    base: *mut u8,
    capacity: usize,
    data_length: AtomicI64,
    growth_quantum: usize,
    views: ViewCache,
}

// SAFETY: the raw base pointer always points into `mmap`, which the struct
// owns; the segment moves between threads (into and out of the worker) but
// is only ever used by one thread at a time.
unsafe impl Send for MappedSegment {}

fn round_up(value: usize, quantum: usize) -> usize {
    value.div_ceil(quantum) * quantum
}

impl MappedSegment {
    /// Maps `file` at `max(file length, initial_capacity)` rounded up to the
    /// growth quantum, initializing the header if the stream is fresh.
    ///
    /// Refuses to open a stream whose stored format version is neither zero
    /// (fresh) nor the current version.
    pub fn open(
        name: &'static str,
        file: File,
        initial_capacity: usize,
        growth_quantum: usize,
    ) -> Result<Self> {
        ensure!(growth_quantum > 0, "growth quantum must be positive");

        let file_len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat segment stream '{}'", name))?
            .len() as usize;

        let capacity = round_up(
            file_len.max(initial_capacity).max(SEGMENT_HEADER_SIZE),
            growth_quantum,
        );
        if capacity > file_len {
            file.set_len(capacity as u64)
                .wrap_err_with(|| format!("failed to extend segment '{}' to {}", name, capacity))?;
        }

        // SAFETY: the stream was opened read+write by the storage source and
        // is not shared with other processes; the mapping's lifetime is tied
        // to this struct, and all access is bounds-checked through the view
        // cache.
        let mut mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map segment '{}'", name))?
        };
        let base = mmap.as_mut_ptr();

        let data_length = {
            let header = SegmentHeader::from_bytes_mut(&mut mmap[..SEGMENT_HEADER_SIZE])?;
            if header.format_version() == 0 {
                header.set_format_version(FORMAT_VERSION);
            } else if header.format_version() != FORMAT_VERSION {
                bail!(TangleError::FormatMismatch {
                    found: header.format_version(),
                    expected: FORMAT_VERSION,
                });
            }
            header.data_length()
        };

        ensure!(
            data_length >= 0 && SEGMENT_HEADER_SIZE + data_length as usize <= capacity,
            "corrupt segment '{}': data length {} does not fit capacity {}",
            name,
            data_length,
            capacity
        );

        #[cfg(unix)]
        // SAFETY: the hint covers exactly the mapped region; madvise cannot
        // invalidate the mapping.
        unsafe {
            libc::madvise(base as *mut libc::c_void, capacity, libc::MADV_WILLNEED);
        }

        debug!(
            segment = name,
            capacity, data_length, "mapped segment opened"
        );

        Ok(Self {
            name,
            file,
            mmap,
            base,
            capacity,
            data_length: AtomicI64::new(data_length),
            growth_quantum,
            views: ViewCache::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current payload length in bytes.
    pub fn len(&self) -> i64 {
        self.data_length.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current mapped size, header included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn format_version(&self) -> u32 {
        match SegmentHeader::from_bytes(&self.mmap[..SEGMENT_HEADER_SIZE]) {
            Ok(header) => header.format_version(),
            Err(_) => 0,
        }
    }

    /// Reserves `size` payload bytes, returning the offset of the reserved
    /// range. The range is zero-initialized. Grows the mapping when needed.
    pub fn allocate(&mut self, size: usize) -> Result<i64> {
        let offset = self.data_length.fetch_add(size as i64, Ordering::AcqRel);
        let required = SEGMENT_HEADER_SIZE + offset as usize + size;
        if required > self.capacity {
            self.remap(required)?;
        }
        self.write_header_length()?;
        Ok(offset)
    }

    /// Returns a scoped range over payload bytes `[offset, offset + len)`.
    pub fn access(&mut self, offset: i64, len: usize) -> Result<Range> {
        ensure!(
            offset >= 0,
            "negative offset {} into segment '{}'",
            offset,
            self.name
        );
        ensure!(
            offset + len as i64 <= self.len(),
            "access {}..{} past data length {} of segment '{}'",
            offset,
            offset + len as i64,
            self.len(),
            self.name
        );
        self.views.acquire(
            self.base,
            self.capacity,
            SEGMENT_HEADER_SIZE + offset as usize,
            len,
        )
    }

    /// True while any `Range` into this segment is alive.
    pub fn has_outstanding_ranges(&self) -> bool {
        self.views.has_outstanding_ranges()
    }

    /// Writes the header through and syncs the mapping to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.write_header_length()?;
        self.mmap
            .flush()
            .wrap_err_with(|| format!("failed to sync segment '{}'", self.name))?;
        trace!(segment = self.name, length = self.len(), "segment flushed");
        Ok(())
    }

    /// Abandons the whole payload: re-zeroes the used region and resets the
    /// data length, preserving the zero-fill guarantee for future
    /// allocations.
    pub fn reset(&mut self) -> Result<()> {
        ensure!(
            !self.views.has_outstanding_ranges(),
            "segment '{}' reset with outstanding ranges",
            self.name
        );
        let used = self.len() as usize;
        let end = (SEGMENT_HEADER_SIZE + used).min(self.capacity);
        self.mmap[SEGMENT_HEADER_SIZE..end].fill(0);
        self.data_length.store(0, Ordering::Release);
        self.write_header_length()?;
        debug!(segment = self.name, "segment reset");
        Ok(())
    }

    fn write_header_length(&mut self) -> Result<()> {
        let length = self.len();
        let header = SegmentHeader::from_bytes_mut(&mut self.mmap[..SEGMENT_HEADER_SIZE])?;
        header.set_data_length(length);
        Ok(())
    }

    fn remap(&mut self, required: usize) -> Result<()> {
        ensure!(
            !self.views.has_outstanding_ranges(),
            "segment '{}' cannot remap with outstanding ranges",
            self.name
        );
        self.views.invalidate();

        self.mmap
            .flush_async()
            .wrap_err_with(|| format!("failed to flush segment '{}' before remap", self.name))?;

        let new_capacity = round_up(required, self.growth_quantum);
        self.file.set_len(new_capacity as u64).wrap_err_with(|| {
            format!(
                "failed to extend segment '{}' to {}",
                self.name, new_capacity
            )
        })?;

        // SAFETY: no range handles exist (checked above) and the cache was
        // invalidated, so nothing points into the old mapping; the file was
        // extended before remapping.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file)
                .wrap_err_with(|| format!("failed to remap segment '{}'", self.name))?
        };
        self.base = self.mmap.as_mut_ptr();

        trace!(
            segment = self.name,
            from = self.capacity,
            to = new_capacity,
            "segment remapped"
        );
        self.capacity = new_capacity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DATA_GROWTH_QUANTUM, INITIAL_SEGMENT_CAPACITY};
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    fn open_fresh(dir: &std::path::Path) -> MappedSegment {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join("seg.data"))
            .unwrap();
        MappedSegment::open("data", file, INITIAL_SEGMENT_CAPACITY, DATA_GROWTH_QUANTUM).unwrap()
    }

    #[test]
    fn fresh_segment_initializes_header() {
        let dir = tempdir().unwrap();
        let segment = open_fresh(dir.path());

        assert_eq!(segment.format_version(), FORMAT_VERSION);
        assert_eq!(segment.len(), 0);
        assert!(segment.capacity() >= INITIAL_SEGMENT_CAPACITY);
        assert_eq!(segment.capacity() % DATA_GROWTH_QUANTUM, 0);
    }

    #[test]
    fn allocate_bumps_length_and_zero_fills() {
        let dir = tempdir().unwrap();
        let mut segment = open_fresh(dir.path());

        let a = segment.allocate(100).unwrap();
        let b = segment.allocate(50).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 100);
        assert_eq!(segment.len(), 150);

        let range = segment.access(a, 150).unwrap();
        assert!(range.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn allocate_grows_capacity_by_quantum() {
        let dir = tempdir().unwrap();
        let mut segment = open_fresh(dir.path());
        let before = segment.capacity();

        segment.allocate(before + 1).unwrap();

        assert!(segment.capacity() > before);
        assert_eq!(segment.capacity() % DATA_GROWTH_QUANTUM, 0);
        assert!(SEGMENT_HEADER_SIZE + segment.len() as usize <= segment.capacity());
    }

    #[test]
    fn writes_survive_remap_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut segment = open_fresh(dir.path());
            let off = segment.allocate(4).unwrap();
            segment
                .access(off, 4)
                .unwrap()
                .as_mut_slice()
                .copy_from_slice(b"abcd");

            // Force a remap, then confirm the payload moved with the file.
            segment.allocate(segment.capacity()).unwrap();
            assert_eq!(segment.access(off, 4).unwrap().as_slice(), b"abcd");
            segment.flush().unwrap();
        }

        let mut reopened = open_fresh(dir.path());
        assert!(reopened.len() > 4);
        assert_eq!(reopened.access(0, 4).unwrap().as_slice(), b"abcd");
    }

    #[test]
    fn access_past_data_length_fails() {
        let dir = tempdir().unwrap();
        let mut segment = open_fresh(dir.path());
        segment.allocate(10).unwrap();

        assert!(segment.access(0, 10).is_ok());
        assert!(segment.access(5, 6).is_err());
        assert!(segment.access(-1, 1).is_err());
    }

    #[test]
    fn remap_with_outstanding_range_fails() {
        let dir = tempdir().unwrap();
        let mut segment = open_fresh(dir.path());
        segment.allocate(16).unwrap();

        let range = segment.access(0, 16).unwrap();
        let result = segment.allocate(segment.capacity());
        assert!(result.is_err());
        drop(range);
    }

    #[test]
    fn unsupported_format_version_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        {
            let mut file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)
                .unwrap();
            file.seek(SeekFrom::Start(0)).unwrap();
            file.write_all(&9u32.to_le_bytes()).unwrap();
            file.set_len(SEGMENT_HEADER_SIZE as u64).unwrap();
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let err = MappedSegment::open("data", file, INITIAL_SEGMENT_CAPACITY, DATA_GROWTH_QUANTUM)
            .unwrap_err();
        match err.downcast_ref::<TangleError>() {
            Some(TangleError::FormatMismatch { found: 9, .. }) => {}
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn reset_zeroes_payload_and_length() {
        let dir = tempdir().unwrap();
        let mut segment = open_fresh(dir.path());

        let off = segment.allocate(8).unwrap();
        segment
            .access(off, 8)
            .unwrap()
            .as_mut_slice()
            .copy_from_slice(&[0xFF; 8]);

        segment.reset().unwrap();
        assert_eq!(segment.len(), 0);

        let again = segment.allocate(8).unwrap();
        assert_eq!(again, 0);
        assert!(segment
            .access(again, 8)
            .unwrap()
            .as_slice()
            .iter()
            .all(|&b| b == 0));
    }
}
