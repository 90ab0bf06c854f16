//! # View Cache
//!
//! Byte-range access to a mapped segment flows through a small FIFO cache of
//! *views*: aligned windows over the mapping, reference-counted so a window
//! stays alive as long as any [`Range`] handed out from it. The cache keeps
//! its own reference to the most recent [`VIEW_CACHE_CAPACITY`] windows, so
//! repeated access to nearby offsets reuses a window instead of creating
//! one per request.
//!
//! A view is an 8 KiB-aligned window sized up to an 8 KiB multiple and
//! clamped to the mapped capacity; with 4 KiB B-tree nodes a node access
//! never straddles two windows.
//!
//! ## Lifetime Discipline
//!
//! `Range` is the only way callers touch segment memory. It holds one view
//! reference and releases it on drop; it is deliberately `!Send` (it embeds
//! a raw pointer) so it cannot escape the worker thread. Before a segment
//! remaps, it asks the cache whether any non-cache reference exists;
//! outstanding ranges at remap time are an engine bug, reported as an error
//! rather than left to dangle.

use std::collections::VecDeque;
use std::sync::Arc;

use eyre::{ensure, Result};

use crate::config::{VIEW_ALIGNMENT, VIEW_CACHE_CAPACITY};

/// One aligned window over the segment mapping. The pointer stays valid for
/// the window's whole life because the owning segment never remaps while a
/// window has outside references.
#[derive(Debug)]
struct ViewWindow {
    ptr: *mut u8,
    offset: usize,
    len: usize,
}

// SAFETY: ViewWindow is a passive descriptor; the raw pointer is only
// dereferenced through Range, which is confined to the worker thread. The
// descriptor itself must cross threads because the segment that owns the
// cache moves into and out of the worker.
unsafe impl Send for ViewWindow {}
unsafe impl Sync for ViewWindow {}

/// Scoped handle to a byte range inside a cached view. Dropping it releases
/// the view reference. Holds a raw pointer, so it is `!Send`: ranges are
/// acquired, used, and released within a single operation on the worker.
#[derive(Debug)]
pub struct Range {
    view: Arc<ViewWindow>,
    ptr: *mut u8,
    len: usize,
}

impl Range {
    fn new(view: Arc<ViewWindow>, offset: usize, len: usize) -> Self {
        // SAFETY: the caller (ViewCache::acquire) guarantees
        // view.offset <= offset && offset + len <= view.offset + view.len,
        // so the add stays inside the window.
        let ptr = unsafe { view.ptr.add(offset - view.offset) };
        Self { view, ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len lie inside a live view (we hold a reference), and
        // the segment never remaps while that reference exists. Worker-side
        // serialization guarantees no concurrent writer.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as for as_slice; exclusive access follows from &mut self
        // plus the single-worker discipline (no two live ranges are written
        // concurrently).
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    #[cfg(test)]
    fn shares_view(&self, other: &Range) -> bool {
        Arc::ptr_eq(&self.view, &other.view)
    }
}

/// Bounded FIFO of cached views for one segment.
#[derive(Debug)]
pub struct ViewCache {
    entries: VecDeque<Arc<ViewWindow>>,
    capacity: usize,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::with_capacity(VIEW_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns a range over `[offset, offset + len)` (absolute segment
    /// offsets, header included), backed by a covering cached view or a
    /// freshly created one.
    pub fn acquire(
        &mut self,
        base: *mut u8,
        mapped_len: usize,
        offset: usize,
        len: usize,
    ) -> Result<Range> {
        ensure!(
            offset + len <= mapped_len,
            "range {}..{} exceeds mapped capacity {}",
            offset,
            offset + len,
            mapped_len
        );

        if let Some(view) = self
            .entries
            .iter()
            .find(|v| v.offset <= offset && offset + len <= v.offset + v.len)
        {
            return Ok(Range::new(Arc::clone(view), offset, len));
        }

        if self.entries.len() >= self.capacity {
            // Drop only the cache's own reference; outstanding ranges keep
            // the evicted view alive until they release.
            self.entries.pop_front();
        }

        let view_offset = offset & !(VIEW_ALIGNMENT - 1);
        let view_end = (offset + len)
            .div_ceil(VIEW_ALIGNMENT)
            .saturating_mul(VIEW_ALIGNMENT)
            .min(mapped_len);

        // SAFETY: view_offset < mapped_len (it is <= offset < mapped_len
        // unless len == 0, in which case offset <= mapped_len keeps the
        // pointer in bounds or one-past-the-end).
        let ptr = unsafe { base.add(view_offset) };
        let view = Arc::new(ViewWindow {
            ptr,
            offset: view_offset,
            len: view_end - view_offset,
        });
        self.entries.push_back(Arc::clone(&view));

        Ok(Range::new(view, offset, len))
    }

    /// True while any `Range` holds a reference to a cached view.
    pub fn has_outstanding_ranges(&self) -> bool {
        self.entries.iter().any(|v| Arc::strong_count(v) > 1)
    }

    /// Forgets every cached view. Called before a remap; outstanding ranges
    /// must already have been released (the segment checks).
    pub fn invalidate(&mut self) {
        debug_assert!(
            !self.has_outstanding_ranges(),
            "view cache invalidated with outstanding ranges"
        );
        self.entries.clear();
    }

    pub fn cached_views(&self) -> usize {
        self.entries.len()
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new()
    }
}
