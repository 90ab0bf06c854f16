//! # Tangle Configuration Constants
//!
//! This module centralizes the constants that define the on-disk format and
//! the runtime geometry of the engine. Constants that depend on each other
//! are co-located and guarded by compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! NODE_SIZE (4096 bytes)
//!       │
//!       ├─> NODE_HEADER_SIZE (12 bytes, fixed)
//!       │
//!       ├─> MAX_VALUES_PER_NODE (derived; must be >= 32)
//!       │     One value entry costs VALUE_ENTRY_SIZE + CHILD_INDEX_SIZE
//!       │     on-node bytes; one extra child index is always present.
//!       │
//!       └─> INDEX_GROWTH_QUANTUM (one node per growth step)
//!
//! SEGMENT_HEADER_SIZE (12 bytes)
//!       │
//!       └─> Every segment payload offset is relative to this header.
//!
//! VIEW_ALIGNMENT (8 KiB)
//!       │
//!       └─> Views are aligned down and sized up to this granule, so a
//!           4 KiB node access never straddles more than one view.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. A fully packed node fits in `NODE_SIZE` (compile-time assertion).
//! 2. `MAX_VALUES_PER_NODE` is even, so a split of an overflowing node
//!    leaves both halves at the minimum fill.
//! 3. `INDEX_GROWTH_QUANTUM` is a multiple of `NODE_SIZE`, so node
//!    allocation never produces a partially mapped node.

use std::time::Duration;

/// On-disk format version written into every segment header.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the fixed segment header: 4-byte format version plus 8-byte
/// data length, both little-endian.
pub const SEGMENT_HEADER_SIZE: usize = 12;

/// Size of one B-tree node on disk.
pub const NODE_SIZE: usize = 4096;

/// Size of the node header (leaf flag, modifying flag, value count,
/// parent index).
pub const NODE_HEADER_SIZE: usize = 12;

/// Size of one value entry inside a node.
pub const VALUE_ENTRY_SIZE: usize = 16;

/// Size of one child node index inside a node.
pub const CHILD_INDEX_SIZE: usize = 8;

/// Number of value entries a node can hold. Derived from the node size and
/// rounded down to an even count so splits leave balanced halves.
pub const MAX_VALUES_PER_NODE: usize =
    ((NODE_SIZE - NODE_HEADER_SIZE - CHILD_INDEX_SIZE) / (VALUE_ENTRY_SIZE + CHILD_INDEX_SIZE))
        & !1;

/// Minimum fill of any non-root node, except transiently during a split.
pub const MIN_VALUES_PER_NODE: usize = MAX_VALUES_PER_NODE / 2;

const _: () = assert!(
    MAX_VALUES_PER_NODE >= 32,
    "node size too small for a useful fanout"
);

const _: () = assert!(
    NODE_HEADER_SIZE
        + MAX_VALUES_PER_NODE * VALUE_ENTRY_SIZE
        + (MAX_VALUES_PER_NODE + 1) * CHILD_INDEX_SIZE
        <= NODE_SIZE,
    "packed node exceeds NODE_SIZE"
);

const _: () = assert!(MAX_VALUES_PER_NODE % 2 == 0, "fanout must be even");

/// Node index of the B-tree root. The root never moves.
pub const ROOT_NODE: i64 = 0;

/// Parent index stored by the root node.
pub const NO_PARENT: i64 = -1;

/// Growth quantum for the index segment. Smaller than the data quantum
/// because index growth is one node at a time.
pub const INDEX_GROWTH_QUANTUM: usize = 4096;

const _: () = assert!(
    INDEX_GROWTH_QUANTUM % NODE_SIZE == 0,
    "index growth must map whole nodes"
);

/// Growth quantum for the keys and data segments.
pub const DATA_GROWTH_QUANTUM: usize = 64 * 1024;

/// Mapped capacity given to a freshly created segment.
pub const INITIAL_SEGMENT_CAPACITY: usize = 32 * 1024;

/// Alignment granule for cached views; views are aligned down and sized up
/// to a multiple of this.
pub const VIEW_ALIGNMENT: usize = 8192;

/// Number of views the per-segment view cache retains.
pub const VIEW_CACHE_CAPACITY: usize = 4;

/// Maximum length of a tangle key in bytes.
pub const MAX_KEY_LENGTH: usize = 65_534;

/// Maximum number of writes a single batch item may carry.
pub const MAX_BATCH_LEN: usize = 256;

/// How long the worker thread lingers on an empty queue before flushing
/// caches and exiting. New work respawns it lazily.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
