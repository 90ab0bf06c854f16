//! # Storage Module
//!
//! The storage layer maps one tangle onto three named byte streams
//! (`index`, `keys`, and `data`) produced by a [`StorageSource`]. Each
//! stream is wrapped in a [`MappedSegment`]: a growable memory mapping with
//! a fixed 12-byte header, an append-only `data_length`, and a small FIFO
//! cache of reference-counted views through which all byte-range access
//! flows.
//!
//! ## Safety Model
//!
//! A mapping becomes invalid when the segment grows and remaps. Rather than
//! hazard pointers or epochs, the engine leans on its own scheduling
//! guarantee: allocation (the only trigger for a remap) happens exclusively
//! on the worker thread, and only while no [`Range`] handles are
//! outstanding. The segment asserts this before every remap, turning a
//! violated assumption into an error instead of a dangling pointer.
//!
//! ## Module Organization
//!
//! - `source`: the [`StorageSource`] capability and the directory-backed
//!   implementation
//! - `headers`: the on-disk segment header
//! - `segment`: [`MappedSegment`] itself
//! - `view`: the bounded view cache and the scoped [`Range`] handle

mod headers;
mod segment;
mod source;
mod view;

pub use headers::SegmentHeader;
pub use segment::MappedSegment;
pub use source::{DirectorySource, StorageSource, DATA_STREAM, INDEX_STREAM, KEYS_STREAM};
pub use view::{Range, ViewCache};
