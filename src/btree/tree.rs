//! # B-Tree Operations
//!
//! The tree borrows the three segments of one tangle for the duration of an
//! operation and performs search, insertion, in-place replacement, ordered
//! scans, and clearing. Node contents are read as owned snapshots so key
//! comparisons against the keys segment never overlap an index range, and
//! so node allocation (which may remap the index segment) always runs with
//! no ranges outstanding.
//!
//! ## Insert and Splits
//!
//! Insertion descends from the root recording the path, writes key and
//! value bytes into their segments, then slots the 16-byte entry into the
//! leaf. A full node splits around its median: the upper half moves to a
//! freshly allocated node and the median is promoted into the parent,
//! recursing up the recorded path. The root never moves from node 0, so a
//! root split allocates *two* nodes and leaves the root holding only the
//! median. Nodes being restructured carry the modifying mark until their
//! final header write.

use std::cmp::Ordering;

use eyre::{bail, ensure, Result};

use crate::config::{MAX_KEY_LENGTH, MAX_VALUES_PER_NODE, NODE_SIZE, NO_PARENT, ROOT_NODE};
use crate::error::TangleError;
use crate::storage::{MappedSegment, Range};

use super::node::{
    NodeMut, NodeRef, NodeSnapshot, ValueEntry, STATUS_IN_MODIFICATION, STATUS_VALID,
};

/// Location of one value entry: node index and slot within the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    pub node: i64,
    pub slot: usize,
}

/// Result of a key search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The key exists at this slot.
    Found(SlotId),
    /// The key is absent; it would be inserted at `slot` of leaf `leaf`.
    Missing { leaf: i64, slot: usize },
}

/// How a replacement was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The new bytes fit the entry's region; the tail was zeroed.
    InPlace,
    /// A fresh region was allocated; the old one is orphaned.
    Relocated { orphaned: u64 },
}

enum SearchResult {
    Found(usize),
    NotFound(usize),
}

pub struct BTree<'a> {
    index: &'a mut MappedSegment,
    keys: &'a mut MappedSegment,
    data: &'a mut MappedSegment,
}

impl<'a> BTree<'a> {
    /// Attaches to the segments, creating the empty root leaf on a fresh
    /// index segment.
    pub fn open(
        index: &'a mut MappedSegment,
        keys: &'a mut MappedSegment,
        data: &'a mut MappedSegment,
    ) -> Result<Self> {
        ensure!(
            index.len() % NODE_SIZE as i64 == 0,
            "index segment length {} is not a whole number of nodes",
            index.len()
        );
        let mut tree = Self { index, keys, data };
        if tree.index.is_empty() {
            let root = tree.allocate_node(true, NO_PARENT)?;
            ensure!(root == ROOT_NODE, "fresh root allocated at node {}", root);
        }
        Ok(tree)
    }

    pub fn node_count(&self) -> i64 {
        self.index.len() / NODE_SIZE as i64
    }

    /// Locates `probe` (raw key bytes) in the tree.
    pub fn find(&mut self, probe: &[u8]) -> Result<SearchOutcome> {
        let mut current = ROOT_NODE;
        loop {
            let snap = self.snapshot(current)?;
            match self.search_in(&snap, probe)? {
                SearchResult::Found(slot) => {
                    return Ok(SearchOutcome::Found(SlotId {
                        node: current,
                        slot,
                    }))
                }
                SearchResult::NotFound(slot) => {
                    if snap.is_leaf {
                        return Ok(SearchOutcome::Missing {
                            leaf: current,
                            slot,
                        });
                    }
                    current = snap.children[slot];
                }
            }
        }
    }

    /// Inserts a new key with its serialized value. The key must be absent
    /// (callers search first and take the replace path on a hit).
    ///
    /// Key bytes and value bytes land in their segments first; the entry is
    /// written in-modification and flipped valid once it is slotted.
    pub fn insert(&mut self, key_bytes: &[u8], key_kind: u8, value: &[u8]) -> Result<SlotId> {
        ensure!(
            key_bytes.len() <= MAX_KEY_LENGTH,
            "key length {} exceeds maximum {}",
            key_bytes.len(),
            MAX_KEY_LENGTH
        );
        ensure!(
            value.len() <= u32::MAX as usize,
            "value length {} exceeds addressable maximum",
            value.len()
        );

        let mut path: Vec<i64> = Vec::new();
        let mut current = ROOT_NODE;
        let slot = loop {
            let snap = self.snapshot(current)?;
            match self.search_in(&snap, key_bytes)? {
                SearchResult::Found(_) => bail!("key already present during insert"),
                SearchResult::NotFound(slot) => {
                    if snap.is_leaf {
                        break slot;
                    }
                    path.push(current);
                    current = snap.children[slot];
                }
            }
        };

        let key_offset = self.keys.allocate(key_bytes.len())?;
        ensure!(
            key_offset + key_bytes.len() as i64 <= u32::MAX as i64,
            "keys segment exceeds addressable size"
        );
        if !key_bytes.is_empty() {
            let mut range = self.keys.access(key_offset, key_bytes.len())?;
            range.as_mut_slice().copy_from_slice(key_bytes);
        }

        let data_offset = self.data.allocate(value.len())?;
        ensure!(
            data_offset + value.len() as i64 <= u32::MAX as i64,
            "data segment exceeds addressable size"
        );
        if !value.is_empty() {
            let mut range = self.data.access(data_offset, value.len())?;
            range.as_mut_slice().copy_from_slice(value);
        }

        let entry = ValueEntry::new(
            key_offset as u32,
            key_bytes.len() as u16,
            data_offset as u32,
            value.len() as u32,
            key_kind,
            STATUS_IN_MODIFICATION,
        );

        let id = self.place_entry(current, &mut path, slot, entry, None)?;
        self.set_entry_status(&id, STATUS_VALID)?;
        Ok(id)
    }

    /// Overwrites the value of an existing entry. New bytes that fit the
    /// entry's allocated region are written in place with the tail zeroed;
    /// larger values relocate to a fresh region, orphaning the old one.
    pub fn replace(&mut self, id: &SlotId, value: &[u8]) -> Result<ReplaceOutcome> {
        let entry = self.entry(id)?;
        ensure!(
            entry.status() == STATUS_VALID,
            TangleError::InvalidData {
                node: id.node,
                slot: id.slot,
                status: entry.status(),
            }
        );

        let region = entry.data_length() as usize;
        if value.len() <= region {
            self.set_entry_status(id, STATUS_IN_MODIFICATION)?;
            {
                let mut range = self.data.access(entry.data_offset() as i64, region)?;
                let slice = range.as_mut_slice();
                slice[..value.len()].copy_from_slice(value);
                slice[value.len()..].fill(0);
            }
            self.set_entry_status(id, STATUS_VALID)?;
            Ok(ReplaceOutcome::InPlace)
        } else {
            ensure!(
                value.len() <= u32::MAX as usize,
                "value length {} exceeds addressable maximum",
                value.len()
            );
            self.set_entry_status(id, STATUS_IN_MODIFICATION)?;

            let new_offset = self.data.allocate(value.len())?;
            ensure!(
                new_offset + value.len() as i64 <= u32::MAX as i64,
                "data segment exceeds addressable size"
            );
            {
                let mut range = self.data.access(new_offset, value.len())?;
                range.as_mut_slice().copy_from_slice(value);
            }

            let mut updated = entry;
            updated.set_data_offset(new_offset as u32);
            updated.set_data_length(value.len() as u32);
            updated.set_status(STATUS_VALID);
            self.write_entry(id, &updated)?;

            Ok(ReplaceOutcome::Relocated {
                orphaned: region as u64,
            })
        }
    }

    /// Reads the entry at a slot.
    pub fn entry(&mut self, id: &SlotId) -> Result<ValueEntry> {
        let node = self.node_ref(id.node)?;
        node.entry(id.slot)
    }

    /// Writes the entry at a slot.
    pub fn write_entry(&mut self, id: &SlotId, entry: &ValueEntry) -> Result<()> {
        let mut node = self.node_mut(id.node)?;
        node.put_entry(id.slot, entry)
    }

    pub fn set_entry_status(&mut self, id: &SlotId, status: u8) -> Result<()> {
        let mut node = self.node_mut(id.node)?;
        let mut entry = node.entry(id.slot)?;
        entry.set_status(status);
        node.put_entry(id.slot, &entry)
    }

    /// Copies an entry's key bytes out of the keys segment.
    pub fn key_bytes(&mut self, entry: &ValueEntry) -> Result<Vec<u8>> {
        let range = self
            .keys
            .access(entry.key_offset() as i64, entry.key_length() as usize)?;
        Ok(range.as_slice().to_vec())
    }

    /// Returns a scoped range over an entry's data region.
    pub fn value_range(&mut self, entry: &ValueEntry) -> Result<Range> {
        self.data
            .access(entry.data_offset() as i64, entry.data_length() as usize)
    }

    /// Collects every entry in ascending key order, with its location.
    pub fn entries_in_order(&mut self) -> Result<Vec<(SlotId, ValueEntry)>> {
        let mut out = Vec::new();
        self.collect_entries(ROOT_NODE, &mut out)?;
        Ok(out)
    }

    /// Resets the tree to a single empty root leaf and abandons all key and
    /// value bytes.
    pub fn clear(&mut self) -> Result<()> {
        self.index.reset()?;
        self.keys.reset()?;
        self.data.reset()?;
        let root = self.allocate_node(true, NO_PARENT)?;
        ensure!(root == ROOT_NODE, "fresh root allocated at node {}", root);
        Ok(())
    }

    fn collect_entries(&mut self, node: i64, out: &mut Vec<(SlotId, ValueEntry)>) -> Result<()> {
        let snap = self.snapshot(node)?;
        if snap.is_leaf {
            for (slot, entry) in snap.entries.iter().enumerate() {
                out.push((SlotId { node, slot }, *entry));
            }
        } else {
            for slot in 0..snap.num_values {
                self.collect_entries(snap.children[slot], out)?;
                out.push((SlotId { node, slot }, snap.entries[slot]));
            }
            self.collect_entries(snap.children[snap.num_values], out)?;
        }
        Ok(())
    }

    fn snapshot(&mut self, node: i64) -> Result<NodeSnapshot> {
        self.node_ref(node)?.snapshot()
    }

    fn node_ref(&mut self, node: i64) -> Result<NodeRef> {
        let range = self.index.access(node * NODE_SIZE as i64, NODE_SIZE)?;
        NodeRef::new(range)
    }

    fn node_mut(&mut self, node: i64) -> Result<NodeMut> {
        let range = self.index.access(node * NODE_SIZE as i64, NODE_SIZE)?;
        NodeMut::new(range)
    }

    fn allocate_node(&mut self, is_leaf: bool, parent: i64) -> Result<i64> {
        let offset = self.index.allocate(NODE_SIZE)?;
        ensure!(
            offset % NODE_SIZE as i64 == 0,
            "node allocation at misaligned offset {}",
            offset
        );
        let node = offset / NODE_SIZE as i64;
        let range = self.index.access(offset, NODE_SIZE)?;
        NodeMut::init(range, is_leaf, parent)?;
        Ok(node)
    }

    fn compare_probe(&mut self, probe: &[u8], entry: &ValueEntry) -> Result<Ordering> {
        let range = self
            .keys
            .access(entry.key_offset() as i64, entry.key_length() as usize)?;
        Ok(probe.cmp(range.as_slice()))
    }

    fn search_in(&mut self, snap: &NodeSnapshot, probe: &[u8]) -> Result<SearchResult> {
        let mut lo = 0usize;
        let mut hi = snap.num_values;
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.compare_probe(probe, &snap.entries[mid])? {
                Ordering::Equal => return Ok(SearchResult::Found(mid)),
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
            }
        }
        Ok(SearchResult::NotFound(lo))
    }

    /// Slots `entry` into `node` at `slot`, splitting on overflow and
    /// promoting medians up the recorded descent path. Returns where the
    /// entry finally landed.
    fn place_entry(
        &mut self,
        node: i64,
        path: &mut Vec<i64>,
        slot: usize,
        entry: ValueEntry,
        right_child: Option<i64>,
    ) -> Result<SlotId> {
        let num_values = {
            let node_ref = self.node_ref(node)?;
            node_ref.num_values()?
        };

        if num_values < MAX_VALUES_PER_NODE {
            {
                let mut node_mut = self.node_mut(node)?;
                node_mut.insert_at(slot, &entry, right_child)?;
            }
            if let Some(child) = right_child {
                let mut child_mut = self.node_mut(child)?;
                child_mut.set_parent(node)?;
            }
            return Ok(SlotId { node, slot });
        }

        self.split_and_place(node, path, slot, entry, right_child)
    }

    fn split_and_place(
        &mut self,
        node: i64,
        path: &mut Vec<i64>,
        slot: usize,
        entry: ValueEntry,
        right_child: Option<i64>,
    ) -> Result<SlotId> {
        let snap = self.snapshot(node)?;

        let mut entries = snap.entries;
        let mut children = snap.children;
        entries.insert(slot, entry);
        children.insert(slot + 1, right_child.unwrap_or(0));

        let mid = entries.len() / 2;
        let median = entries[mid];

        {
            let mut node_mut = self.node_mut(node)?;
            node_mut.set_modifying(true)?;
        }

        if node == ROOT_NODE {
            // The root never moves: both halves go to fresh nodes and the
            // root keeps only the median.
            let left = self.allocate_node(snap.is_leaf, ROOT_NODE)?;
            let right = self.allocate_node(snap.is_leaf, ROOT_NODE)?;

            {
                let mut left_mut = self.node_mut(left)?;
                left_mut.store(snap.is_leaf, ROOT_NODE, &entries[..mid], &children[..=mid])?;
            }
            {
                let mut right_mut = self.node_mut(right)?;
                right_mut.store(
                    snap.is_leaf,
                    ROOT_NODE,
                    &entries[mid + 1..],
                    &children[mid + 1..],
                )?;
            }
            if !snap.is_leaf {
                self.reparent(&children[..=mid], left)?;
                self.reparent(&children[mid + 1..], right)?;
            }
            {
                // Completing header write clears the modifying mark.
                let mut root_mut = self.node_mut(ROOT_NODE)?;
                root_mut.store(false, NO_PARENT, &[median], &[left, right])?;
            }

            return Ok(match slot.cmp(&mid) {
                Ordering::Less => SlotId { node: left, slot },
                Ordering::Equal => SlotId {
                    node: ROOT_NODE,
                    slot: 0,
                },
                Ordering::Greater => SlotId {
                    node: right,
                    slot: slot - mid - 1,
                },
            });
        }

        let right_node = self.allocate_node(snap.is_leaf, snap.parent)?;
        {
            let mut right_mut = self.node_mut(right_node)?;
            right_mut.store(
                snap.is_leaf,
                snap.parent,
                &entries[mid + 1..],
                &children[mid + 1..],
            )?;
        }
        if !snap.is_leaf {
            self.reparent(&children[mid + 1..], right_node)?;
        }
        {
            let mut node_mut = self.node_mut(node)?;
            node_mut.store(snap.is_leaf, snap.parent, &entries[..mid], &children[..=mid])?;
        }

        // Promote the median into the parent recorded on the descent path.
        let parent = match path.pop() {
            Some(parent) => parent,
            None => bail!("non-root node {} has no parent on the descent path", node),
        };
        let median_key = self.key_bytes(&median)?;
        let parent_snap = self.snapshot(parent)?;
        let parent_slot = match self.search_in(&parent_snap, &median_key)? {
            SearchResult::NotFound(slot) => slot,
            SearchResult::Found(_) => bail!("median key already present in parent"),
        };
        let promoted = self.place_entry(parent, path, parent_slot, median, Some(right_node))?;

        Ok(match slot.cmp(&mid) {
            Ordering::Less => SlotId { node, slot },
            Ordering::Equal => promoted,
            Ordering::Greater => SlotId {
                node: right_node,
                slot: slot - mid - 1,
            },
        })
    }

    fn reparent(&mut self, children: &[i64], parent: i64) -> Result<()> {
        for &child in children {
            let mut child_mut = self.node_mut(child)?;
            child_mut.set_parent(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DATA_GROWTH_QUANTUM, INDEX_GROWTH_QUANTUM, INITIAL_SEGMENT_CAPACITY,
    };
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        index: MappedSegment,
        keys: MappedSegment,
        data: MappedSegment,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let open = |name: &'static str, quantum: usize| {
                let file = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(dir.path().join(name))
                    .unwrap();
                MappedSegment::open(name, file, INITIAL_SEGMENT_CAPACITY, quantum).unwrap()
            };
            Self {
                index: open("index", INDEX_GROWTH_QUANTUM),
                keys: open("keys", DATA_GROWTH_QUANTUM),
                data: open("data", DATA_GROWTH_QUANTUM),
                _dir: dir,
            }
        }

        fn tree(&mut self) -> BTree<'_> {
            BTree::open(&mut self.index, &mut self.keys, &mut self.data).unwrap()
        }
    }

    fn insert(tree: &mut BTree<'_>, key: &str, value: &[u8]) {
        tree.insert(key.as_bytes(), 0, value).unwrap();
    }

    fn found(tree: &mut BTree<'_>, key: &str) -> Option<SlotId> {
        match tree.find(key.as_bytes()).unwrap() {
            SearchOutcome::Found(id) => Some(id),
            SearchOutcome::Missing { .. } => None,
        }
    }

    fn keys_in_order(tree: &mut BTree<'_>) -> Vec<String> {
        let entries = tree.entries_in_order().unwrap();
        entries
            .iter()
            .map(|(_, e)| String::from_utf8(tree.key_bytes(e).unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn fresh_tree_has_empty_root() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        assert_eq!(tree.node_count(), 1);
        assert!(found(&mut tree, "anything").is_none());
        assert!(tree.entries_in_order().unwrap().is_empty());
    }

    #[test]
    fn insert_and_find_single_key() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        insert(&mut tree, "hello", b"world");

        let id = found(&mut tree, "hello").unwrap();
        let entry = tree.entry(&id).unwrap();
        assert_eq!(entry.status(), STATUS_VALID);
        assert_eq!(entry.data_length(), 5);
        let range = tree.value_range(&entry).unwrap();
        assert_eq!(range.as_slice(), b"world");
        assert!(found(&mut tree, "other").is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        insert(&mut tree, "key", b"1");
        assert!(tree.insert(b"key", 0, b"2").is_err());
    }

    #[test]
    fn zero_length_value_round_trips() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        insert(&mut tree, "empty", b"");

        let id = found(&mut tree, "empty").unwrap();
        let entry = tree.entry(&id).unwrap();
        assert_eq!(entry.data_length(), 0);
        assert_eq!(tree.value_range(&entry).unwrap().as_slice(), b"");
    }

    #[test]
    fn enumeration_is_sorted_regardless_of_insert_order() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        for key in ["qa", "aa", "za", "ea"] {
            insert(&mut tree, key, key.as_bytes());
        }

        assert_eq!(keys_in_order(&mut tree), vec!["aa", "ea", "qa", "za"]);
    }

    #[test]
    fn sequential_inserts_split_and_stay_findable() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        let count = MAX_VALUES_PER_NODE * 4;
        for i in 0..count {
            let key = format!("key{:06}", i);
            insert(&mut tree, &key, key.as_bytes());
        }

        assert!(tree.node_count() > 1);
        for i in 0..count {
            let key = format!("key{:06}", i);
            let id = found(&mut tree, &key).expect("key lost after splits");
            let entry = tree.entry(&id).unwrap();
            assert_eq!(tree.value_range(&entry).unwrap().as_slice(), key.as_bytes());
        }

        let listed = keys_in_order(&mut tree);
        assert_eq!(listed.len(), count);
        assert!(listed.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn reverse_inserts_enumerate_ascending() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        let count = MAX_VALUES_PER_NODE * 2 + 17;
        for i in (0..count).rev() {
            let key = format!("k{:05}", i);
            insert(&mut tree, &key, b"v");
        }

        let listed = keys_in_order(&mut tree);
        assert_eq!(listed.len(), count);
        assert!(listed.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(listed[0], "k00000");
    }

    #[test]
    fn replace_in_place_zeroes_tail() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        insert(&mut tree, "key", b"abcdefgh");
        let id = found(&mut tree, "key").unwrap();

        let outcome = tree.replace(&id, b"abc").unwrap();
        assert_eq!(outcome, ReplaceOutcome::InPlace);

        let entry = tree.entry(&id).unwrap();
        assert_eq!(entry.data_length(), 8);
        assert_eq!(entry.status(), STATUS_VALID);
        assert_eq!(
            tree.value_range(&entry).unwrap().as_slice(),
            b"abc\0\0\0\0\0"
        );
    }

    #[test]
    fn replace_larger_relocates_and_orphans() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        insert(&mut tree, "key", b"abcd");
        let id = found(&mut tree, "key").unwrap();
        let before = tree.entry(&id).unwrap();

        let outcome = tree.replace(&id, b"abcdefgh").unwrap();
        assert_eq!(outcome, ReplaceOutcome::Relocated { orphaned: 4 });

        let after = tree.entry(&id).unwrap();
        assert_ne!(after.data_offset(), before.data_offset());
        assert_eq!(after.data_length(), 8);
        assert_eq!(tree.value_range(&after).unwrap().as_slice(), b"abcdefgh");
        // Key bytes are never rewritten.
        assert_eq!(after.key_offset(), before.key_offset());
    }

    #[test]
    fn clear_resets_to_empty_root() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        for i in 0..(MAX_VALUES_PER_NODE + 10) {
            let key = format!("key{:05}", i);
            insert(&mut tree, &key, b"v");
        }
        assert!(tree.node_count() > 1);

        tree.clear().unwrap();

        assert_eq!(tree.node_count(), 1);
        assert!(tree.entries_in_order().unwrap().is_empty());
        assert!(found(&mut tree, "key00001").is_none());

        insert(&mut tree, "fresh", b"value");
        assert!(found(&mut tree, "fresh").is_some());
    }

    #[test]
    fn parent_pointers_follow_splits() {
        let mut fx = Fixture::new();
        let mut tree = fx.tree();

        for i in 0..(MAX_VALUES_PER_NODE * 3) {
            let key = format!("key{:06}", i);
            insert(&mut tree, &key, b"v");
        }

        // Walk every node and confirm each child points back at its parent.
        let node_count = tree.node_count();
        for node in 0..node_count {
            let snap = tree.snapshot(node).unwrap();
            if !snap.is_leaf {
                for &child in &snap.children {
                    let child_snap = tree.snapshot(child).unwrap();
                    assert_eq!(child_snap.parent, node, "child {} of node {}", child, node);
                }
            }
        }
    }
}
