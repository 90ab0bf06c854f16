//! # Node Layout and Accessors
//!
//! On-disk structs for the B-tree node header and value entries, plus the
//! [`NodeRef`]/[`NodeMut`] accessor pair that reads and mutates a node
//! through a scoped segment [`Range`]. All multi-byte fields are
//! little-endian zerocopy types, so a node is valid on any host.
//!
//! `NodeRef` copies small records out (entries are 16 bytes, headers 12);
//! `NodeMut` writes in place and performs the slot-shifting insert. Whole
//! nodes are rewritten through [`NodeMut::store`] during splits.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    CHILD_INDEX_SIZE, MAX_VALUES_PER_NODE, NODE_HEADER_SIZE, NODE_SIZE, VALUE_ENTRY_SIZE,
};
use crate::storage::Range;

/// Entry slot is empty or its key was deleted.
pub const STATUS_EMPTY: u8 = 0;
/// Entry is live and visible to readers.
pub const STATUS_VALID: u8 = 1;
/// A mutation of this entry is in flight; readers must reject it.
pub const STATUS_IN_MODIFICATION: u8 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ValueEntry {
    key_offset: U32,
    key_length: U16,
    data_offset: U32,
    data_length: U32,
    key_kind: u8,
    status: u8,
}

const _: () = assert!(std::mem::size_of::<ValueEntry>() == VALUE_ENTRY_SIZE);

impl ValueEntry {
    pub fn new(
        key_offset: u32,
        key_length: u16,
        data_offset: u32,
        data_length: u32,
        key_kind: u8,
        status: u8,
    ) -> Self {
        Self {
            key_offset: U32::new(key_offset),
            key_length: U16::new(key_length),
            data_offset: U32::new(data_offset),
            data_length: U32::new(data_length),
            key_kind,
            status,
        }
    }

    pub fn key_offset(&self) -> u32 {
        self.key_offset.get()
    }

    pub fn key_length(&self) -> u16 {
        self.key_length.get()
    }

    pub fn data_offset(&self) -> u32 {
        self.data_offset.get()
    }

    pub fn data_length(&self) -> u32 {
        self.data_length.get()
    }

    pub fn set_data_offset(&mut self, offset: u32) {
        self.data_offset = U32::new(offset);
    }

    pub fn set_data_length(&mut self, length: u32) {
        self.data_length = U32::new(length);
    }

    pub fn key_kind(&self) -> u8 {
        self.key_kind
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodeHeader {
    is_leaf: u8,
    modifying: u8,
    num_values: U16,
    parent: I64,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

const ENTRIES_OFFSET: usize = NODE_HEADER_SIZE;
const CHILDREN_OFFSET: usize = ENTRIES_OFFSET + MAX_VALUES_PER_NODE * VALUE_ENTRY_SIZE;

const fn entry_offset(index: usize) -> usize {
    ENTRIES_OFFSET + index * VALUE_ENTRY_SIZE
}

const fn child_offset(index: usize) -> usize {
    CHILDREN_OFFSET + index * CHILD_INDEX_SIZE
}

const _: () = assert!(child_offset(MAX_VALUES_PER_NODE + 1) <= NODE_SIZE);

/// Owned copy of a node's live contents, taken so key comparisons against
/// the keys segment can run without holding an index range.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub is_leaf: bool,
    pub num_values: usize,
    pub parent: i64,
    pub entries: Vec<ValueEntry>,
    pub children: Vec<i64>,
}

/// Read-only accessor over a node range.
#[derive(Debug)]
pub struct NodeRef {
    range: Range,
}

impl NodeRef {
    pub fn new(range: Range) -> Result<Self> {
        ensure!(
            range.len() == NODE_SIZE,
            "node range has length {} (expected {})",
            range.len(),
            NODE_SIZE
        );
        Ok(Self { range })
    }

    fn header(&self) -> Result<&NodeHeader> {
        NodeHeader::ref_from_bytes(&self.range.as_slice()[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read node header: {:?}", e))
    }

    pub fn is_leaf(&self) -> Result<bool> {
        Ok(self.header()?.is_leaf != 0)
    }

    pub fn num_values(&self) -> Result<usize> {
        let n = self.header()?.num_values.get() as usize;
        ensure!(
            n <= MAX_VALUES_PER_NODE,
            "node claims {} values (max {})",
            n,
            MAX_VALUES_PER_NODE
        );
        Ok(n)
    }

    pub fn parent(&self) -> Result<i64> {
        Ok(self.header()?.parent.get())
    }

    pub fn is_modifying(&self) -> Result<bool> {
        Ok(self.header()?.modifying != 0)
    }

    pub fn entry(&self, index: usize) -> Result<ValueEntry> {
        let n = self.num_values()?;
        ensure!(index < n, "entry index {} out of bounds ({} values)", index, n);
        let offset = entry_offset(index);
        ValueEntry::read_from_bytes(&self.range.as_slice()[offset..offset + VALUE_ENTRY_SIZE])
            .map_err(|e| eyre::eyre!("failed to read value entry {}: {:?}", index, e))
    }

    pub fn child(&self, index: usize) -> Result<i64> {
        let n = self.num_values()?;
        ensure!(
            index <= n,
            "child index {} out of bounds ({} values)",
            index,
            n
        );
        let offset = child_offset(index);
        let mut raw = [0u8; CHILD_INDEX_SIZE];
        raw.copy_from_slice(&self.range.as_slice()[offset..offset + CHILD_INDEX_SIZE]);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn snapshot(&self) -> Result<NodeSnapshot> {
        let header = self.header()?;
        let is_leaf = header.is_leaf != 0;
        let parent = header.parent.get();
        let num_values = header.num_values.get() as usize;
        ensure!(
            num_values <= MAX_VALUES_PER_NODE,
            "node claims {} values (max {})",
            num_values,
            MAX_VALUES_PER_NODE
        );

        let data = self.range.as_slice();
        let mut entries = Vec::with_capacity(num_values);
        for i in 0..num_values {
            let offset = entry_offset(i);
            let entry =
                ValueEntry::read_from_bytes(&data[offset..offset + VALUE_ENTRY_SIZE])
                    .map_err(|e| eyre::eyre!("failed to read value entry {}: {:?}", i, e))?;
            entries.push(entry);
        }

        let mut children = Vec::with_capacity(num_values + 1);
        for i in 0..=num_values {
            let offset = child_offset(i);
            let mut raw = [0u8; CHILD_INDEX_SIZE];
            raw.copy_from_slice(&data[offset..offset + CHILD_INDEX_SIZE]);
            children.push(i64::from_le_bytes(raw));
        }

        Ok(NodeSnapshot {
            is_leaf,
            num_values,
            parent,
            entries,
            children,
        })
    }
}

/// Mutable accessor over a node range.
#[derive(Debug)]
pub struct NodeMut {
    range: Range,
}

impl NodeMut {
    pub fn new(range: Range) -> Result<Self> {
        ensure!(
            range.len() == NODE_SIZE,
            "node range has length {} (expected {})",
            range.len(),
            NODE_SIZE
        );
        Ok(Self { range })
    }

    /// Zeroes the node and writes a fresh header.
    pub fn init(range: Range, is_leaf: bool, parent: i64) -> Result<Self> {
        let mut node = Self::new(range)?;
        node.range.as_mut_slice().fill(0);
        {
            let header = node.header_mut()?;
            header.is_leaf = is_leaf as u8;
            header.parent = I64::new(parent);
        }
        Ok(node)
    }

    fn header(&self) -> Result<&NodeHeader> {
        NodeHeader::ref_from_bytes(&self.range.as_slice()[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read node header: {:?}", e))
    }

    fn header_mut(&mut self) -> Result<&mut NodeHeader> {
        NodeHeader::mut_from_bytes(&mut self.range.as_mut_slice()[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read node header: {:?}", e))
    }

    pub fn num_values(&self) -> Result<usize> {
        Ok(self.header()?.num_values.get() as usize)
    }

    pub fn set_parent(&mut self, parent: i64) -> Result<()> {
        self.header_mut()?.parent = I64::new(parent);
        Ok(())
    }

    pub fn set_modifying(&mut self, modifying: bool) -> Result<()> {
        self.header_mut()?.modifying = modifying as u8;
        Ok(())
    }

    pub fn entry(&self, index: usize) -> Result<ValueEntry> {
        let n = self.num_values()?;
        ensure!(index < n, "entry index {} out of bounds ({} values)", index, n);
        let offset = entry_offset(index);
        ValueEntry::read_from_bytes(&self.range.as_slice()[offset..offset + VALUE_ENTRY_SIZE])
            .map_err(|e| eyre::eyre!("failed to read value entry {}: {:?}", index, e))
    }

    pub fn put_entry(&mut self, index: usize, entry: &ValueEntry) -> Result<()> {
        let n = self.num_values()?;
        ensure!(index < n, "entry index {} out of bounds ({} values)", index, n);
        let offset = entry_offset(index);
        self.range.as_mut_slice()[offset..offset + VALUE_ENTRY_SIZE]
            .copy_from_slice(entry.as_bytes());
        Ok(())
    }

    /// Shifts entries (and the child slots to their right) one position
    /// rightward from `index`, then writes the new entry there. For internal
    /// nodes `right_child` becomes the child following the new entry.
    pub fn insert_at(
        &mut self,
        index: usize,
        entry: &ValueEntry,
        right_child: Option<i64>,
    ) -> Result<()> {
        let n = self.num_values()?;
        ensure!(n < MAX_VALUES_PER_NODE, "insert into full node");
        ensure!(index <= n, "insert index {} out of bounds ({} values)", index, n);

        let data = self.range.as_mut_slice();
        data.copy_within(entry_offset(index)..entry_offset(n), entry_offset(index + 1));
        data[entry_offset(index)..entry_offset(index + 1)].copy_from_slice(entry.as_bytes());

        data.copy_within(
            child_offset(index + 1)..child_offset(n + 1),
            child_offset(index + 2),
        );
        let right = right_child.unwrap_or(0);
        data[child_offset(index + 1)..child_offset(index + 2)]
            .copy_from_slice(&right.to_le_bytes());

        self.header_mut()?.num_values = U16::new((n + 1) as u16);
        Ok(())
    }

    /// Rewrites the node wholesale. Used when a split redistributes a
    /// node's contents: the body is rewritten first and the header last, so
    /// a node marked modifying stays marked until the restructure is
    /// complete; the final header write is the unlock.
    pub fn store(
        &mut self,
        is_leaf: bool,
        parent: i64,
        entries: &[ValueEntry],
        children: &[i64],
    ) -> Result<()> {
        ensure!(
            entries.len() <= MAX_VALUES_PER_NODE,
            "{} entries exceed node capacity",
            entries.len()
        );
        ensure!(
            children.len() == entries.len() + 1,
            "{} children for {} entries",
            children.len(),
            entries.len()
        );

        let data = self.range.as_mut_slice();
        data[NODE_HEADER_SIZE..].fill(0);

        for (i, entry) in entries.iter().enumerate() {
            data[entry_offset(i)..entry_offset(i + 1)].copy_from_slice(entry.as_bytes());
        }
        for (i, child) in children.iter().enumerate() {
            data[child_offset(i)..child_offset(i) + CHILD_INDEX_SIZE]
                .copy_from_slice(&child.to_le_bytes());
        }

        let header = self.header_mut()?;
        header.is_leaf = is_leaf as u8;
        header.modifying = 0;
        header.num_values = U16::new(entries.len() as u16);
        header.parent = I64::new(parent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ViewCache;

    fn node_range(buf: &mut Vec<u8>) -> Range {
        let mut cache = ViewCache::new();
        cache.acquire(buf.as_mut_ptr(), buf.len(), 0, NODE_SIZE).unwrap()
    }

    fn entry_with_key(key_offset: u32) -> ValueEntry {
        ValueEntry::new(key_offset, 4, 0, 8, 0, STATUS_VALID)
    }

    #[test]
    fn value_entry_is_16_bytes() {
        assert_eq!(std::mem::size_of::<ValueEntry>(), 16);
    }

    #[test]
    fn node_header_is_12_bytes() {
        assert_eq!(std::mem::size_of::<NodeHeader>(), 12);
    }

    #[test]
    fn packed_node_fits() {
        assert!(child_offset(MAX_VALUES_PER_NODE + 1) <= NODE_SIZE);
        assert!(MAX_VALUES_PER_NODE >= 32);
    }

    #[test]
    fn init_produces_empty_leaf() {
        let mut buf = vec![0xAAu8; NODE_SIZE];
        let node = NodeMut::init(node_range(&mut buf), true, -1).unwrap();
        drop(node);

        let node = NodeRef::new(node_range(&mut buf)).unwrap();
        assert!(node.is_leaf().unwrap());
        assert_eq!(node.num_values().unwrap(), 0);
        assert_eq!(node.parent().unwrap(), -1);
        assert!(!node.is_modifying().unwrap());
    }

    #[test]
    fn insert_at_shifts_entries_and_children() {
        let mut buf = vec![0u8; NODE_SIZE];
        {
            let mut node = NodeMut::init(node_range(&mut buf), false, -1).unwrap();
            node.insert_at(0, &entry_with_key(10), Some(101)).unwrap();
            node.insert_at(1, &entry_with_key(30), Some(103)).unwrap();
            // Insert between: children right of slot 0 must shift.
            node.insert_at(1, &entry_with_key(20), Some(102)).unwrap();
        }

        let node = NodeRef::new(node_range(&mut buf)).unwrap();
        assert_eq!(node.num_values().unwrap(), 3);
        assert_eq!(node.entry(0).unwrap().key_offset(), 10);
        assert_eq!(node.entry(1).unwrap().key_offset(), 20);
        assert_eq!(node.entry(2).unwrap().key_offset(), 30);
        assert_eq!(node.child(1).unwrap(), 101);
        assert_eq!(node.child(2).unwrap(), 102);
        assert_eq!(node.child(3).unwrap(), 103);
    }

    #[test]
    fn store_round_trips_through_snapshot() {
        let mut buf = vec![0u8; NODE_SIZE];
        let entries: Vec<ValueEntry> = (0..5).map(|i| entry_with_key(i * 100)).collect();
        let children: Vec<i64> = (0..6).map(|i| i + 50).collect();

        {
            let mut node = NodeMut::new(node_range(&mut buf)).unwrap();
            node.store(false, 7, &entries, &children).unwrap();
        }

        let snap = NodeRef::new(node_range(&mut buf)).unwrap().snapshot().unwrap();
        assert!(!snap.is_leaf);
        assert_eq!(snap.parent, 7);
        assert_eq!(snap.num_values, 5);
        assert_eq!(snap.entries, entries);
        assert_eq!(snap.children, children);
    }

    #[test]
    fn entry_bounds_are_checked() {
        let mut buf = vec![0u8; NODE_SIZE];
        {
            let mut node = NodeMut::init(node_range(&mut buf), true, -1).unwrap();
            node.insert_at(0, &entry_with_key(1), None).unwrap();
        }

        let node = NodeRef::new(node_range(&mut buf)).unwrap();
        assert!(node.entry(0).is_ok());
        assert!(node.entry(1).is_err());
        assert!(node.child(2).is_err());
    }

    #[test]
    fn status_constants_match_format() {
        assert_eq!(STATUS_EMPTY, 0);
        assert_eq!(STATUS_VALID, 1);
        assert_eq!(STATUS_IN_MODIFICATION, 2);
    }
}
