//! # B-Tree Index
//!
//! The ordered index over one tangle. Nodes are fixed 4 KiB records laid out
//! as an array in the index segment; child references are 64-bit node
//! indices into that array, and node 0 is always the root.
//!
//! ## Node Layout
//!
//! ```text
//! +---------------------------+
//! | Header (12 B)             |  is_leaf, modifying, num_values, parent
//! +---------------------------+
//! | Value entries (16 B each) |  MAX_VALUES_PER_NODE slots, ascending keys
//! +---------------------------+
//! | Child indices (8 B each)  |  MAX_VALUES_PER_NODE + 1 (internal only)
//! +---------------------------+
//! | Padding to 4096           |
//! +---------------------------+
//! ```
//!
//! A value entry does not carry key or value bytes; it locates them in the
//! keys and data segments by offset and length:
//!
//! ```text
//! ValueEntry (16 B):
//! +------------+------------+-------------+-------------+------+--------+
//! | key_offset | key_length | data_offset | data_length | kind | status |
//! |    u32     |    u16     |     u32     |     u32     |  u8  |   u8   |
//! +------------+------------+-------------+-------------+------+--------+
//! ```
//!
//! `status` is 0 for an empty or deleted slot, 1 for a live entry, and 2
//! while a mutation is in flight; readers accept only 1. `data_length` is
//! the size of the entry's allocated data region: a shrinking in-place
//! replacement zero-pads the tail rather than shrinking the region.
//!
//! ## Search and Mutation
//!
//! Within a node, entries are binary-searched by lexicographic comparison
//! against key bytes fetched from the keys segment. Inserts shift trailing
//! entries right; a full node splits around its median, which is promoted
//! into the parent (allocating two fresh halves when the root itself
//! splits, since the root never moves from index 0).

mod node;
mod tree;

pub use node::{
    NodeMut, NodeRef, NodeSnapshot, ValueEntry, STATUS_EMPTY, STATUS_IN_MODIFICATION, STATUS_VALID,
};
pub use tree::{BTree, ReplaceOutcome, SearchOutcome, SlotId};
