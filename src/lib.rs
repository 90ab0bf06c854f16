//! # Tangle - Embedded Ordered Key/Value Store
//!
//! Tangle is a persistent, embedded, single-process key/value store. A
//! *tangle* is an ordered map from typed byte-string keys to values
//! serialized through a caller-supplied codec, backed by three append-only
//! memory-mapped segments and served by a single background worker thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Public API (Tangle handle)      │  get/set/update/find/scan
//! ├─────────────────────────────────────┤
//! │   Operation Queue (FIFO + worker)    │  barriers, batches, futures
//! ├─────────────────────────────────────┤
//! │          B-Tree Index                │  4KB nodes, 16B value entries
//! ├─────────────────────────────────────┤
//! │   Mapped Segments + View Cache       │  index / keys / data
//! ├─────────────────────────────────────┤
//! │    Storage Source (named streams)    │  one file per stream
//! └─────────────────────────────────────┘
//! ```
//!
//! Every mutating operation is enqueued and executed on one worker thread,
//! so on-disk invariants never need cross-thread synchronization inside the
//! engine. Callers receive an [`OpFuture`] per operation and may wait on it,
//! drop it (cancelling the operation if it has not run yet), or hold it
//! across a [`Barrier`].
//!
//! ## File Layout
//!
//! One tangle is three named byte streams produced by a [`storage::StorageSource`]:
//!
//! ```text
//! directory/
//! ├── <name>.index    # B-tree nodes (node 0 is the root)
//! ├── <name>.keys     # concatenated raw key bytes
//! └── <name>.data     # concatenated serialized values
//! ```
//!
//! Each stream starts with a 12-byte header (format version + data length,
//! little-endian); the rest is payload. All multi-byte integers on disk are
//! little-endian regardless of host.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tangle::{Tangle, Utf8Codec};
//!
//! let tangle: Tangle<String, Utf8Codec> = Tangle::builder()
//!     .directory("./db")
//!     .name("demo")
//!     .codec(Utf8Codec)
//!     .open()?;
//!
//! tangle.set("greeting", "hello".to_string()).wait()?;
//! let value = tangle.get("greeting").wait()?;
//! assert_eq!(value, "hello");
//! ```
//!
//! ## Durability Model
//!
//! Tangle is durable across clean shutdown (segments are flushed when the
//! worker goes idle and on disposal) but does not journal: a crash in the
//! middle of a mutation can leave an entry marked in-modification, which
//! later reads report as invalid data. There is no write-ahead log and no
//! compaction of orphaned value regions; the `wasted_data_bytes` counter
//! tracks what replacement has orphaned.
//!
//! ## Module Overview
//!
//! - [`storage`]: storage sources, mapped segments, the view cache
//! - [`btree`]: the ordered index over the three segments
//! - [`queue`]: operation futures and barriers
//! - [`key`]: typed byte-string keys
//! - [`codec`]: the value serialization contract and shipped codecs

pub mod btree;
pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod queue;
pub mod storage;
pub mod tangle;

pub use codec::{BytesCodec, Codec, PodCodec, Utf8Codec};
pub use error::TangleError;
pub use key::{KeyKind, TangleKey};
pub use queue::{Barrier, BarrierCollection, OpFuture};
pub use tangle::{Decision, FindFuture, FindResult, Tangle, TangleBuilder};
