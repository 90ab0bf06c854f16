//! # Typed Error Kinds
//!
//! Fallible paths in this crate return `eyre::Result`; failures that callers
//! are expected to classify carry a [`TangleError`] as the root cause, so
//! `report.downcast_ref::<TangleError>()` distinguishes, say, a missing key
//! from a stale find handle.
//!
//! Storage and mmap failures surface as plain reports with `wrap_err`
//! context; they are fatal to the operation that hit them but the worker
//! keeps draining the queue.

use thiserror::Error;

use crate::key::TangleKey;

#[derive(Debug, Error)]
pub enum TangleError {
    /// The key was absent at read time.
    #[error("key not found: {0}")]
    KeyNotFound(TangleKey),

    /// A `FindResult` outlived a mutation; its saved version no longer
    /// matches the tangle's.
    #[error("tangle modified since find: version was {expected}, now {actual}")]
    TangleModified { expected: u32, actual: u32 },

    /// The caller-supplied codec failed. No slot is created for a fresh
    /// insert, and the old bytes are preserved for a replacement.
    #[error("value codec failed for key {key}: {detail}")]
    SerializerFailed { key: TangleKey, detail: String },

    /// The tangle was torn down while the operation was queued or pending.
    #[error("tangle disposed")]
    TangleDisposed,

    /// The operation's future was dropped or cancelled before the worker
    /// reached it.
    #[error("operation cancelled before execution")]
    Cancelled,

    /// A segment header carries a format version this build does not read.
    #[error("unsupported segment format version {found} (supported: {expected})")]
    FormatMismatch { found: u32, expected: u32 },

    /// A value entry with a status other than `valid` was read. Usually the
    /// footprint of a crash mid-mutation.
    #[error("invalid value entry at node {node} slot {slot}: status {status}")]
    InvalidData { node: i64, slot: usize, status: u8 },
}
