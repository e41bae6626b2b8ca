//! # B+Tree
//!
//! Ordered unique-key index over buffer-pool pages. One header page pins
//! down the root; interior pages route by separator; leaves hold the
//! entries and chain left-to-right for range scans.
//!
//! ## Concurrency Protocol
//!
//! Every operation runs one of two descents:
//!
//! - **Optimistic** (the default): read guards from the root down, released
//!   crab-style as soon as the child is latched; only the leaf is write
//!   latched. If the leaf turns out to need structural work (split on
//!   insert, underflow on remove) the operation releases everything and
//!   retries pessimistically.
//! - **Pessimistic**: the header page's write guard plus write guards down
//!   the path. Ancestors (and the header) are released the moment a node is
//!   proved *safe* — an interior with room for one more child on insert, or
//!   more than the minimum (more than two for the root) on remove — because
//!   no split or merge can propagate past a safe node.
//!
//! All latches are acquired root-to-leaf, so writers cannot deadlock.
//!
//! ## Structural Operations
//!
//! - Leaf split: the left leaf keeps `ceil((max+1)/2)` of the `max+1`
//!   entries; the new right leaf's first key is promoted to the parent.
//! - Interior split: the median separator is *extracted* — promoted without
//!   remaining in either half — including the case where the freshly
//!   promoted key is itself the median.
//! - Underflow: borrow from the left sibling first, then the right, with
//!   the parent separator updated (leaves) or rotated through (interiors);
//!   otherwise merge into the left sibling (or pull the right sibling in)
//!   and recurse upward.
//! - Root shrink: an interior root left with one child is discarded and the
//!   child becomes the root, under the header write guard.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use super::header;
use super::interior::{interior_capacity, InteriorPage, InteriorPageMut};
use super::iterator::BPlusTreeIter;
use super::keys::{IndexKey, IndexValue};
use super::leaf::{is_leaf, leaf_capacity, LeafPage, LeafPageMut};
use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::config::{PageId, INVALID_PAGE_ID};

pub struct BPlusTree<K, V> {
    bpm: BufferPoolManager,
    header_page_id: PageId,
    leaf_max_size: u32,
    interior_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K: IndexKey, V: IndexValue> BPlusTree<K, V> {
    /// Creates an empty tree with page-filling node capacities.
    pub fn create(bpm: BufferPoolManager) -> Result<Self> {
        let leaf_max = leaf_capacity::<K, V>();
        let interior_max = interior_capacity::<K>();
        Self::create_with_sizes(bpm, leaf_max, interior_max)
    }

    /// Creates an empty tree with explicit node capacities. Structural
    /// tests use tiny capacities to force deep trees on few keys.
    pub fn create_with_sizes(
        bpm: BufferPoolManager,
        leaf_max_size: u32,
        interior_max_size: u32,
    ) -> Result<Self> {
        ensure!(leaf_max_size >= 2, "leaf capacity must be at least 2");
        ensure!(interior_max_size >= 3, "interior capacity must be at least 3");

        let header_page_id = bpm.new_page();
        ensure!(
            header_page_id != INVALID_PAGE_ID,
            "buffer pool exhausted while creating b+tree"
        );
        {
            let mut guard = bpm.write_page(header_page_id)?;
            header::init(guard.data_mut());
        }
        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            interior_max_size,
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn is_empty(&self) -> Result<bool> {
        let guard = self.bpm.read_page(self.header_page_id)?;
        Ok(header::root_page_id(guard.data()) == INVALID_PAGE_ID)
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root = header::root_page_id(header_guard.data());
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.read_page(root)?;
        drop(header_guard);
        loop {
            if is_leaf(guard.data()) {
                let leaf = LeafPage::<K, V>::from_page(guard.data())?;
                return Ok(leaf.find(key).map(|idx| leaf.value_at(idx)));
            }
            let child = InteriorPage::<K>::from_page(guard.data())?.child_for(key);
            // The assignment latches the child before the parent guard is
            // dropped: classic crab order.
            guard = self.bpm.read_page(child)?;
        }
    }

    /// Inserts a unique key. Returns `false` (leaving the tree untouched)
    /// when the key already exists.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        match self.try_optimistic_insert(&key, &value)? {
            Some(done) => Ok(done),
            None => self.pessimistic_insert(key, value),
        }
    }

    /// Removes a key. Returns `false` when the key is absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        match self.try_optimistic_remove(key)? {
            Some(done) => Ok(done),
            None => self.pessimistic_remove(key),
        }
    }

    /// Iterator over all entries in key order.
    pub fn iter(&self) -> Result<BPlusTreeIter<K, V>> {
        BPlusTreeIter::at_start(self)
    }

    /// Iterator over entries with keys `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIter<K, V>> {
        BPlusTreeIter::at_key(self, key)
    }

    pub(crate) fn buffer_pool(&self) -> &BufferPoolManager {
        &self.bpm
    }

    /// Read-latched descent to the leaf that would contain `key`; used by
    /// the iterators.
    pub(crate) fn find_leaf(&self, key: Option<&K>) -> Result<Option<crate::buffer::ReadPageGuard>> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root = header::root_page_id(header_guard.data());
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.bpm.read_page(root)?;
        drop(header_guard);
        loop {
            if is_leaf(guard.data()) {
                return Ok(Some(guard));
            }
            let interior = InteriorPage::<K>::from_page(guard.data())?;
            let child = match key {
                Some(key) => interior.child_for(key),
                None => interior.child_at(0),
            };
            guard = self.bpm.read_page(child)?;
        }
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// `Some(result)` when the leaf absorbed the operation in place; `None`
    /// when a split is needed and the caller must retake pessimistically.
    fn try_optimistic_insert(&self, key: &K, value: &V) -> Result<Option<bool>> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root = header::root_page_id(header_guard.data());
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let first = self.bpm.read_page(root)?;
        if is_leaf(first.data()) {
            // Root leaf: the header read guard keeps the root id stable
            // across the read-to-write relatch.
            drop(first);
            let mut guard = self.bpm.write_page(root)?;
            let mut leaf = LeafPageMut::<K, V>::from_page(guard.data_mut())?;
            return Ok(Self::leaf_insert_in_place(&mut leaf, key, value));
        }
        drop(header_guard);

        let mut parent = first;
        loop {
            let interior = InteriorPage::<K>::from_page(parent.data())?;
            let child_pid = interior.child_for(key);
            let child = self.bpm.read_page(child_pid)?;
            if !is_leaf(child.data()) {
                parent = child;
                continue;
            }
            // The parent's read guard keeps the leaf's key range stable
            // while the leaf latch is upgraded from read to write.
            drop(child);
            let mut guard = self.bpm.write_page(child_pid)?;
            drop(parent);
            let mut leaf = LeafPageMut::<K, V>::from_page(guard.data_mut())?;
            return Ok(Self::leaf_insert_in_place(&mut leaf, key, value));
        }
    }

    fn leaf_insert_in_place(leaf: &mut LeafPageMut<K, V>, key: &K, value: &V) -> Option<bool> {
        if leaf.as_read().find(key).is_some() {
            return Some(false);
        }
        if leaf.as_read().size() < leaf.as_read().max_size() {
            let idx = leaf.as_read().lower_bound(key);
            leaf.insert_at(idx, *key, *value);
            return Some(true);
        }
        None
    }

    fn pessimistic_insert(&self, key: K, value: V) -> Result<bool> {
        let mut header_guard = Some(self.bpm.write_page(self.header_page_id)?);
        let root = header::root_page_id(header_guard.as_ref().expect("held").data());

        if root == INVALID_PAGE_ID {
            let root_pid = self.allocate_page()?;
            let mut guard = self.bpm.write_page(root_pid)?;
            let mut leaf = LeafPageMut::<K, V>::init(guard.data_mut(), self.leaf_max_size)?;
            leaf.insert_at(0, key, value);
            let mut header = header_guard.take().expect("held");
            header::set_root_page_id(header.data_mut(), root_pid);
            return Ok(true);
        }

        // (guard, index of the child we descended into)
        let mut path: Vec<(WritePageGuard, u32)> = Vec::new();
        let mut current = self.bpm.write_page(root)?;
        while !is_leaf(current.data()) {
            let interior = InteriorPage::<K>::from_page(current.data())?;
            if interior.size() < interior.max_size() {
                // Safe: a split below stops here. Everything above, header
                // included, can go.
                header_guard = None;
                path.clear();
            }
            let idx = interior.child_index_for(&key);
            let child_pid = interior.child_at(idx);
            path.push((current, idx));
            current = self.bpm.write_page(child_pid)?;
        }

        let mut leaf = LeafPageMut::<K, V>::from_page(current.data_mut())?;
        if leaf.as_read().find(&key).is_some() {
            return Ok(false);
        }
        if leaf.as_read().size() < leaf.as_read().max_size() {
            let idx = leaf.as_read().lower_bound(&key);
            leaf.insert_at(idx, key, value);
            return Ok(true);
        }

        // Leaf split: left keeps ceil((max+1)/2) of the max+1 entries.
        let mut entries = leaf.as_read().entries();
        let pos = entries.partition_point(|(k, _)| *k < key);
        entries.insert(pos, (key, value));
        let keep_left = (entries.len() + 1) / 2;

        let new_pid = self.allocate_page()?;
        let old_next = leaf.as_read().next_page_id();
        leaf.set_entries(&entries[..keep_left]);
        leaf.set_next_page_id(new_pid);
        {
            let mut guard = self.bpm.write_page(new_pid)?;
            let mut new_leaf = LeafPageMut::<K, V>::init(guard.data_mut(), self.leaf_max_size)?;
            new_leaf.set_entries(&entries[keep_left..]);
            new_leaf.set_next_page_id(old_next);
        }

        let promoted = entries[keep_left].0;
        let left_pid = current.page_id();
        drop(current);
        self.insert_into_parent(promoted, left_pid, new_pid, path, header_guard)?;
        Ok(true)
    }

    fn insert_into_parent(
        &self,
        key: K,
        left_pid: PageId,
        right_pid: PageId,
        mut path: Vec<(WritePageGuard, u32)>,
        mut header_guard: Option<WritePageGuard>,
    ) -> Result<()> {
        let mut key = key;
        let mut left = left_pid;
        let mut right = right_pid;

        while let Some((mut parent_guard, _)) = path.pop() {
            let mut interior = InteriorPageMut::<K>::from_page(parent_guard.data_mut())?;
            if interior.as_read().size() < interior.as_read().max_size() {
                interior.insert_separator(key, right);
                return Ok(());
            }

            // Interior split: the median separator is promoted without
            // landing in either half.
            let read = interior.as_read();
            let mut seps = read.separators();
            let mut kids = read.children();
            let pos = seps.partition_point(|s| *s < key);
            seps.insert(pos, key);
            kids.insert(pos + 1, right);

            let keep_left = (kids.len() + 1) / 2;
            let promoted = seps[keep_left - 1];
            let new_pid = self.allocate_page()?;

            interior.set_contents(&seps[..keep_left - 1], &kids[..keep_left]);
            {
                let mut guard = self.bpm.write_page(new_pid)?;
                let mut new_interior =
                    InteriorPageMut::<K>::init(guard.data_mut(), self.interior_max_size)?;
                new_interior.set_contents(&seps[keep_left..], &kids[keep_left..]);
            }

            key = promoted;
            left = parent_guard.page_id();
            right = new_pid;
        }

        // Split reached the top: grow a new root.
        let mut header = header_guard
            .take()
            .expect("header write guard held whenever the root can split");
        let new_root = self.allocate_page()?;
        {
            let mut guard = self.bpm.write_page(new_root)?;
            let mut root = InteriorPageMut::<K>::init(guard.data_mut(), self.interior_max_size)?;
            root.init_root(key, left, right);
        }
        header::set_root_page_id(header.data_mut(), new_root);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    fn try_optimistic_remove(&self, key: &K) -> Result<Option<bool>> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root = header::root_page_id(header_guard.data());
        if root == INVALID_PAGE_ID {
            return Ok(Some(false));
        }

        let first = self.bpm.read_page(root)?;
        if is_leaf(first.data()) {
            drop(first);
            let mut guard = self.bpm.write_page(root)?;
            let mut leaf = LeafPageMut::<K, V>::from_page(guard.data_mut())?;
            let Some(idx) = leaf.as_read().find(key) else {
                return Ok(Some(false));
            };
            if leaf.as_read().size() > 1 {
                leaf.remove_at(idx);
                return Ok(Some(true));
            }
            // Removing the last entry empties the root: root change.
            return Ok(None);
        }
        drop(header_guard);

        let mut parent = first;
        loop {
            let interior = InteriorPage::<K>::from_page(parent.data())?;
            let child_pid = interior.child_for(key);
            let child = self.bpm.read_page(child_pid)?;
            if !is_leaf(child.data()) {
                parent = child;
                continue;
            }
            drop(child);
            let mut guard = self.bpm.write_page(child_pid)?;
            drop(parent);
            let mut leaf = LeafPageMut::<K, V>::from_page(guard.data_mut())?;
            let Some(idx) = leaf.as_read().find(key) else {
                return Ok(Some(false));
            };
            if leaf.as_read().size() > leaf.as_read().min_size() {
                leaf.remove_at(idx);
                return Ok(Some(true));
            }
            return Ok(None);
        }
    }

    fn pessimistic_remove(&self, key: &K) -> Result<bool> {
        let mut header_guard = Some(self.bpm.write_page(self.header_page_id)?);
        let root = header::root_page_id(header_guard.as_ref().expect("held").data());
        if root == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut path: Vec<(WritePageGuard, u32)> = Vec::new();
        let mut current = self.bpm.write_page(root)?;
        while !is_leaf(current.data()) {
            let interior = InteriorPage::<K>::from_page(current.data())?;
            let safe = if path.is_empty() {
                // The root shrinks only when it would drop to one child.
                interior.size() > 2
            } else {
                interior.size() > interior.min_size()
            };
            if safe {
                header_guard = None;
                path.clear();
            }
            let idx = interior.child_index_for(key);
            let child_pid = interior.child_at(idx);
            path.push((current, idx));
            current = self.bpm.write_page(child_pid)?;
        }

        let mut leaf = LeafPageMut::<K, V>::from_page(current.data_mut())?;
        let Some(idx) = leaf.as_read().find(key) else {
            return Ok(false);
        };
        leaf.remove_at(idx);

        if path.is_empty() {
            // Root leaf: empty tree when the last entry goes.
            if leaf.as_read().size() == 0 {
                let mut header = header_guard
                    .take()
                    .expect("header write guard held while the root can empty");
                header::set_root_page_id(header.data_mut(), INVALID_PAGE_ID);
                self.release_and_delete(current);
            }
            return Ok(true);
        }

        if leaf.as_read().size() >= leaf.as_read().min_size() {
            return Ok(true);
        }
        self.rebalance_leaf(current, path, header_guard)?;
        Ok(true)
    }

    /// Restores the leaf invariant after an underflowing delete: borrow
    /// left, borrow right, else merge. `node` is the underflowing leaf.
    fn rebalance_leaf(
        &self,
        mut node: WritePageGuard,
        mut path: Vec<(WritePageGuard, u32)>,
        header_guard: Option<WritePageGuard>,
    ) -> Result<()> {
        let (mut parent_guard, child_idx) = path.pop().expect("leaf rebalance needs a parent");
        let (left_pid, right_pid, parent_size) = {
            let parent = InteriorPage::<K>::from_page(parent_guard.data())?;
            let left = (child_idx > 0).then(|| parent.child_at(child_idx - 1));
            let right = (child_idx + 1 < parent.size()).then(|| parent.child_at(child_idx + 1));
            (left, right, parent.size())
        };
        debug_assert!(parent_size >= 2);

        // Borrow from the left sibling first.
        let mut left_guard = match left_pid {
            Some(pid) => Some(self.bpm.write_page(pid)?),
            None => None,
        };
        if let Some(lg) = left_guard.as_mut() {
            let mut left = LeafPageMut::<K, V>::from_page(lg.data_mut())?;
            if left.as_read().size() > left.as_read().min_size() {
                let last = left.as_read().size() - 1;
                let (k, v) = (left.as_read().key_at(last), left.as_read().value_at(last));
                left.remove_at(last);
                let mut leaf = LeafPageMut::<K, V>::from_page(node.data_mut())?;
                leaf.insert_at(0, k, v);
                let mut parent = InteriorPageMut::<K>::from_page(parent_guard.data_mut())?;
                parent.set_key_at(child_idx, k);
                return Ok(());
            }
        }

        // Then the right sibling.
        let mut right_guard = match right_pid {
            Some(pid) => Some(self.bpm.write_page(pid)?),
            None => None,
        };
        if let Some(rg) = right_guard.as_mut() {
            let mut right = LeafPageMut::<K, V>::from_page(rg.data_mut())?;
            if right.as_read().size() > right.as_read().min_size() {
                let (k, v) = (right.as_read().key_at(0), right.as_read().value_at(0));
                right.remove_at(0);
                let new_right_first = right.as_read().key_at(0);
                let mut leaf = LeafPageMut::<K, V>::from_page(node.data_mut())?;
                let end = leaf.as_read().size();
                leaf.insert_at(end, k, v);
                let mut parent = InteriorPageMut::<K>::from_page(parent_guard.data_mut())?;
                parent.set_key_at(child_idx + 1, new_right_first);
                return Ok(());
            }
        }

        // Merge: into the left sibling when one exists, else pull the right
        // sibling in.
        if let Some(mut lg) = left_guard {
            let entries = LeafPage::<K, V>::from_page(node.data())?.entries();
            let next = LeafPage::<K, V>::from_page(node.data())?.next_page_id();
            let mut left = LeafPageMut::<K, V>::from_page(lg.data_mut())?;
            let mut merged = left.as_read().entries();
            merged.extend(entries);
            left.set_entries(&merged);
            left.set_next_page_id(next);
            {
                let mut parent = InteriorPageMut::<K>::from_page(parent_guard.data_mut())?;
                parent.remove_at(child_idx);
            }
            self.release_and_delete(node);
        } else {
            let mut rg = right_guard.expect("a non-root leaf has at least one sibling");
            let (r_entries, r_next) = {
                let right = LeafPage::<K, V>::from_page(rg.data())?;
                (right.entries(), right.next_page_id())
            };
            let mut leaf = LeafPageMut::<K, V>::from_page(node.data_mut())?;
            let mut merged = leaf.as_read().entries();
            merged.extend(r_entries);
            leaf.set_entries(&merged);
            leaf.set_next_page_id(r_next);
            {
                let mut parent = InteriorPageMut::<K>::from_page(parent_guard.data_mut())?;
                parent.remove_at(child_idx + 1);
            }
            self.release_and_delete(rg);
        }

        self.rebalance_interior(parent_guard, path, header_guard)
    }

    /// Restores interior invariants upward after a child was removed from
    /// `node`.
    fn rebalance_interior(
        &self,
        mut node: WritePageGuard,
        mut path: Vec<(WritePageGuard, u32)>,
        mut header_guard: Option<WritePageGuard>,
    ) -> Result<()> {
        loop {
            let (size, min_size, first_child) = {
                let view = InteriorPage::<K>::from_page(node.data())?;
                (view.size(), view.min_size(), view.child_at(0))
            };

            if path.is_empty() {
                // `node` is the root.
                if size == 1 {
                    let mut header = header_guard
                        .take()
                        .expect("header write guard held while the root can shrink");
                    header::set_root_page_id(header.data_mut(), first_child);
                    self.release_and_delete(node);
                }
                return Ok(());
            }
            if size >= min_size {
                return Ok(());
            }

            let (mut parent_guard, child_idx) = path.pop().expect("non-root node has a parent");
            let (left_pid, right_pid) = {
                let parent = InteriorPage::<K>::from_page(parent_guard.data())?;
                (
                    (child_idx > 0).then(|| parent.child_at(child_idx - 1)),
                    (child_idx + 1 < parent.size()).then(|| parent.child_at(child_idx + 1)),
                )
            };

            let mut node_seps = InteriorPage::<K>::from_page(node.data())?.separators();
            let mut node_kids = InteriorPage::<K>::from_page(node.data())?.children();

            // Borrow from the left: the parent separator rotates down into
            // this node and the left sibling's last separator rotates up.
            let mut left_guard = match left_pid {
                Some(pid) => Some(self.bpm.write_page(pid)?),
                None => None,
            };
            if let Some(lg) = left_guard.as_mut() {
                let mut left = InteriorPageMut::<K>::from_page(lg.data_mut())?;
                if left.as_read().size() > left.as_read().min_size() {
                    let mut l_seps = left.as_read().separators();
                    let mut l_kids = left.as_read().children();
                    let sep_down =
                        InteriorPage::<K>::from_page(parent_guard.data())?.key_at(child_idx);

                    node_kids.insert(0, l_kids.pop().expect("left sibling has children"));
                    node_seps.insert(0, sep_down);
                    let sep_up = l_seps.pop().expect("left sibling has separators");

                    left.set_contents(&l_seps, &l_kids);
                    InteriorPageMut::<K>::from_page(node.data_mut())?
                        .set_contents(&node_seps, &node_kids);
                    InteriorPageMut::<K>::from_page(parent_guard.data_mut())?
                        .set_key_at(child_idx, sep_up);
                    return Ok(());
                }
            }

            let mut right_guard = match right_pid {
                Some(pid) => Some(self.bpm.write_page(pid)?),
                None => None,
            };
            if let Some(rg) = right_guard.as_mut() {
                let mut right = InteriorPageMut::<K>::from_page(rg.data_mut())?;
                if right.as_read().size() > right.as_read().min_size() {
                    let mut r_seps = right.as_read().separators();
                    let mut r_kids = right.as_read().children();
                    let sep_down =
                        InteriorPage::<K>::from_page(parent_guard.data())?.key_at(child_idx + 1);

                    node_kids.push(r_kids.remove(0));
                    node_seps.push(sep_down);
                    let sep_up = r_seps.remove(0);

                    right.set_contents(&r_seps, &r_kids);
                    InteriorPageMut::<K>::from_page(node.data_mut())?
                        .set_contents(&node_seps, &node_kids);
                    InteriorPageMut::<K>::from_page(parent_guard.data_mut())?
                        .set_key_at(child_idx + 1, sep_up);
                    return Ok(());
                }
            }

            // Merge. The separating key is pulled down between the halves.
            if let Some(mut lg) = left_guard {
                let sep_down = InteriorPage::<K>::from_page(parent_guard.data())?.key_at(child_idx);
                let mut left = InteriorPageMut::<K>::from_page(lg.data_mut())?;
                let mut seps = left.as_read().separators();
                let mut kids = left.as_read().children();
                seps.push(sep_down);
                seps.extend(node_seps);
                kids.extend(node_kids);
                left.set_contents(&seps, &kids);
                InteriorPageMut::<K>::from_page(parent_guard.data_mut())?.remove_at(child_idx);
                self.release_and_delete(node);
            } else {
                let mut rg = right_guard.expect("a non-root interior has at least one sibling");
                let sep_down =
                    InteriorPage::<K>::from_page(parent_guard.data())?.key_at(child_idx + 1);
                let right = InteriorPage::<K>::from_page(rg.data())?;
                node_seps.push(sep_down);
                node_seps.extend(right.separators());
                node_kids.extend(right.children());
                InteriorPageMut::<K>::from_page(node.data_mut())?
                    .set_contents(&node_seps, &node_kids);
                InteriorPageMut::<K>::from_page(parent_guard.data_mut())?.remove_at(child_idx + 1);
                self.release_and_delete(rg);
            }

            node = parent_guard;
        }
    }

    fn allocate_page(&self) -> Result<PageId> {
        let pid = self.bpm.new_page();
        ensure!(
            pid != INVALID_PAGE_ID,
            "buffer pool exhausted while growing b+tree"
        );
        Ok(pid)
    }

    /// Drops the guard and returns the page to the pool's free pages. A
    /// concurrent iterator may still pin the page; the delete is then
    /// skipped (the page is unreachable from the tree either way).
    fn release_and_delete(&self, guard: WritePageGuard) {
        let pid = guard.page_id();
        drop(guard);
        if !self.bpm.delete_page(pid) {
            log::debug!("unlinked b+tree page {pid} still pinned; leaving to the replacer");
        }
    }

    // ------------------------------------------------------------------
    // Invariant checking (tests)
    // ------------------------------------------------------------------

    /// Walks the whole tree verifying the structural invariants: sorted
    /// keys, separator containment, size bounds, uniform leaf depth, and an
    /// ascending leaf chain.
    pub fn verify_integrity(&self) -> Result<()> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let root = header::root_page_id(header_guard.data());
        if root == INVALID_PAGE_ID {
            return Ok(());
        }
        let mut leaf_depth = None;
        self.verify_node(root, None, None, true, 0, &mut leaf_depth)?;

        // Leaf chain must be globally ascending.
        let mut last: Option<K> = None;
        for entry in self.iter()? {
            let (key, _) = entry?;
            if let Some(prev) = last {
                ensure!(prev < key, "leaf chain out of order: {prev:?} !< {key:?}");
            }
            last = Some(key);
        }
        Ok(())
    }

    fn verify_node(
        &self,
        pid: PageId,
        lower: Option<K>,
        upper: Option<K>,
        is_root: bool,
        depth: u32,
        leaf_depth: &mut Option<u32>,
    ) -> Result<()> {
        let guard = self.bpm.read_page(pid)?;
        if is_leaf(guard.data()) {
            let leaf = LeafPage::<K, V>::from_page(guard.data())?;
            match leaf_depth {
                Some(expected) => {
                    ensure!(*expected == depth, "leaves at depths {expected} and {depth}")
                }
                None => *leaf_depth = Some(depth),
            }
            if !is_root {
                ensure!(
                    leaf.size() >= leaf.min_size(),
                    "leaf {pid} below min size: {} < {}",
                    leaf.size(),
                    leaf.min_size()
                );
            }
            for i in 0..leaf.size() {
                let key = leaf.key_at(i);
                if i > 0 {
                    ensure!(leaf.key_at(i - 1) < key, "leaf {pid} keys out of order");
                }
                if let Some(lower) = lower {
                    ensure!(lower <= key, "leaf {pid} key below separator");
                }
                if let Some(upper) = upper {
                    ensure!(key < upper, "leaf {pid} key above separator");
                }
            }
            return Ok(());
        }

        let interior = InteriorPage::<K>::from_page(guard.data())?;
        if is_root {
            ensure!(interior.size() >= 2, "interior root with a single child");
        } else {
            ensure!(
                interior.size() >= interior.min_size(),
                "interior {pid} below min size"
            );
        }
        for i in 1..interior.size() {
            let key = interior.key_at(i);
            if i > 1 {
                ensure!(interior.key_at(i - 1) < key, "interior {pid} separators out of order");
            }
            if let Some(lower) = lower {
                ensure!(lower <= key, "interior {pid} separator below bound");
            }
            if let Some(upper) = upper {
                ensure!(key < upper, "interior {pid} separator above bound");
            }
        }
        for i in 0..interior.size() {
            let child_lower = if i == 0 { lower } else { Some(interior.key_at(i)) };
            let child_upper = if i + 1 < interior.size() {
                Some(interior.key_at(i + 1))
            } else {
                upper
            };
            self.verify_node(interior.child_at(i), child_lower, child_upper, false, depth + 1, leaf_depth)?;
        }
        Ok(())
    }
}

impl<K: IndexKey, V: IndexValue> std::fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("header_page_id", &self.header_page_id)
            .field("leaf_max_size", &self.leaf_max_size)
            .field("interior_max_size", &self.interior_max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn tree(leaf_max: u32, interior_max: u32) -> (tempfile::TempDir, BPlusTree<i64, u64>) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(64, 2, disk);
        let tree = BPlusTree::create_with_sizes(bpm, leaf_max, interior_max).unwrap();
        (dir, tree)
    }

    fn collect(tree: &BPlusTree<i64, u64>) -> Vec<i64> {
        tree.iter()
            .unwrap()
            .map(|e| e.unwrap().0)
            .collect()
    }

    #[test]
    fn empty_tree_lookups() {
        let (_dir, tree) = tree(4, 4);
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.get(&42).unwrap(), None);
        assert!(!tree.remove(&42).unwrap());
        assert_eq!(collect(&tree), Vec::<i64>::new());
    }

    #[test]
    fn insert_get_round_trip() {
        let (_dir, tree) = tree(4, 4);
        assert!(tree.insert(10, 100).unwrap());
        assert!(tree.insert(5, 50).unwrap());
        assert!(tree.insert(20, 200).unwrap());

        assert_eq!(tree.get(&10).unwrap(), Some(100));
        assert_eq!(tree.get(&5).unwrap(), Some(50));
        assert_eq!(tree.get(&20).unwrap(), Some(200));
        assert_eq!(tree.get(&15).unwrap(), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (_dir, tree) = tree(4, 4);
        assert!(tree.insert(1, 10).unwrap());
        assert!(!tree.insert(1, 99).unwrap());
        assert_eq!(tree.get(&1).unwrap(), Some(10));
    }

    #[test]
    fn sequential_inserts_split_correctly() {
        let (_dir, tree) = tree(4, 4);
        for key in 1..=13 {
            assert!(tree.insert(key, key as u64).unwrap(), "insert {key}");
            tree.verify_integrity().unwrap();
        }
        assert_eq!(collect(&tree), (1..=13).collect::<Vec<_>>());
        for key in 1..=13 {
            assert_eq!(tree.get(&key).unwrap(), Some(key as u64));
        }
    }

    #[test]
    fn reverse_inserts_split_correctly() {
        let (_dir, tree) = tree(4, 4);
        for key in (1..=40).rev() {
            assert!(tree.insert(key, key as u64).unwrap());
        }
        tree.verify_integrity().unwrap();
        assert_eq!(collect(&tree), (1..=40).collect::<Vec<_>>());
    }

    #[test]
    fn delete_rebalances_without_breaking_order() {
        let (_dir, tree) = tree(4, 4);
        for key in 1..=13 {
            tree.insert(key, key as u64).unwrap();
        }
        assert!(tree.remove(&8).unwrap());
        tree.verify_integrity().unwrap();
        assert!(tree.remove(&9).unwrap());
        tree.verify_integrity().unwrap();

        assert_eq!(collect(&tree), vec![1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13]);
        assert!(!tree.remove(&9).unwrap(), "remove is idempotent");
    }

    #[test]
    fn delete_everything_empties_the_tree() {
        let (_dir, tree) = tree(4, 4);
        for key in 1..=30 {
            tree.insert(key, key as u64).unwrap();
        }
        for key in 1..=30 {
            assert!(tree.remove(&key).unwrap(), "remove {key}");
            tree.verify_integrity().unwrap();
        }
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.get(&15).unwrap(), None);

        // The tree is still usable afterwards.
        assert!(tree.insert(7, 70).unwrap());
        assert_eq!(tree.get(&7).unwrap(), Some(70));
    }

    #[test]
    fn interleaved_inserts_and_deletes_hold_invariants() {
        let (_dir, tree) = tree(4, 5);
        // Deterministic pseudo-random walk.
        let mut present = std::collections::BTreeSet::new();
        let mut state = 0x9E37u64;
        for _ in 0..600 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let key = (state >> 33) as i64 % 200;
            if state & 4 == 0 && present.contains(&key) {
                assert!(tree.remove(&key).unwrap());
                present.remove(&key);
            } else if !present.contains(&key) {
                assert!(tree.insert(key, key as u64).unwrap());
                present.insert(key);
            }
        }
        tree.verify_integrity().unwrap();
        assert_eq!(collect(&tree), present.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn iterator_seeks_to_key() {
        let (_dir, tree) = tree(4, 4);
        for key in (2..=20).step_by(2) {
            tree.insert(key, key as u64).unwrap();
        }

        let from_hit: Vec<i64> = tree.iter_from(&8).unwrap().map(|e| e.unwrap().0).collect();
        assert_eq!(from_hit, vec![8, 10, 12, 14, 16, 18, 20]);

        let from_gap: Vec<i64> = tree.iter_from(&9).unwrap().map(|e| e.unwrap().0).collect();
        assert_eq!(from_gap, vec![10, 12, 14, 16, 18, 20]);

        let past_end: Vec<i64> = tree.iter_from(&99).unwrap().map(|e| e.unwrap().0).collect();
        assert!(past_end.is_empty());
    }

    #[test]
    fn concurrent_disjoint_inserts() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(128, 2, disk);
        let tree = std::sync::Arc::new(BPlusTree::<i64, u64>::create_with_sizes(bpm, 8, 8).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let tree = std::sync::Arc::clone(&tree);
                std::thread::spawn(move || {
                    for i in 0..200i64 {
                        let key = i * 4 + t;
                        assert!(tree.insert(key, key as u64).unwrap());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        tree.verify_integrity().unwrap();
        assert_eq!(collect(&tree), (0..800).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_mixed_workload() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(128, 2, disk);
        let tree = std::sync::Arc::new(BPlusTree::<i64, u64>::create_with_sizes(bpm, 6, 6).unwrap());

        for key in 0..300i64 {
            tree.insert(key, key as u64).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let tree = std::sync::Arc::clone(&tree);
                std::thread::spawn(move || match t {
                    0 => {
                        for key in 0..150i64 {
                            tree.remove(&(key * 2)).unwrap();
                        }
                    }
                    1 => {
                        for key in 300..450i64 {
                            tree.insert(key, key as u64).unwrap();
                        }
                    }
                    _ => {
                        for key in 0..300i64 {
                            // Readers only observe fully applied operations.
                            let _ = tree.get(&key).unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        tree.verify_integrity().unwrap();
        let expected: Vec<i64> = (0..300).filter(|k| k % 2 == 1).chain(300..450).collect();
        assert_eq!(collect(&tree), expected);
    }
}
