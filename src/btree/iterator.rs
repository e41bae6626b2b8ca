//! # B+Tree Forward Iterator
//!
//! Walks the leaf chain in key order. The iterator holds a read guard on
//! the current leaf and an index into it; crossing a leaf boundary releases
//! the guard before latching the successor, so at most one leaf is pinned
//! at a time.
//!
//! Iterators are snapshots of nothing: a concurrent structural change to
//! the traversed chain (split, merge) may skip or repeat entries. Callers
//! that need stability hold their own locks above the tree.

use eyre::Result;

use super::keys::{IndexKey, IndexValue};
use super::leaf::LeafPage;
use super::tree::BPlusTree;
use crate::buffer::ReadPageGuard;
use crate::config::INVALID_PAGE_ID;

pub struct BPlusTreeIter<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    guard: Option<ReadPageGuard>,
    idx: u32,
}

impl<'a, K: IndexKey, V: IndexValue> BPlusTreeIter<'a, K, V> {
    pub(crate) fn at_start(tree: &'a BPlusTree<K, V>) -> Result<Self> {
        let guard = tree.find_leaf(None)?;
        Ok(Self { tree, guard, idx: 0 })
    }

    pub(crate) fn at_key(tree: &'a BPlusTree<K, V>, key: &K) -> Result<Self> {
        let guard = tree.find_leaf(Some(key))?;
        let idx = match &guard {
            Some(g) => LeafPage::<K, V>::from_page(g.data())?.lower_bound(key),
            None => 0,
        };
        Ok(Self { tree, guard, idx })
    }

    fn step(&mut self) -> Result<Option<(K, V)>> {
        loop {
            let Some(guard) = self.guard.as_ref() else {
                return Ok(None);
            };
            let leaf = LeafPage::<K, V>::from_page(guard.data())?;
            if self.idx < leaf.size() {
                let entry = (leaf.key_at(self.idx), leaf.value_at(self.idx));
                self.idx += 1;
                return Ok(Some(entry));
            }
            let next = leaf.next_page_id();
            // Release before latching the successor; holding both would
            // pin two leaves for no benefit.
            self.guard = None;
            if next == INVALID_PAGE_ID {
                return Ok(None);
            }
            self.guard = Some(self.tree.buffer_pool().read_page(next)?);
            self.idx = 0;
        }
    }
}

impl<'a, K: IndexKey, V: IndexValue> Iterator for BPlusTreeIter<'a, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                // Surface the error once, then fuse.
                self.guard = None;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn tree() -> (tempfile::TempDir, BPlusTree<i64, u64>) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(64, 2, disk);
        (dir, BPlusTree::create_with_sizes(bpm, 4, 4).unwrap())
    }

    #[test]
    fn iterates_across_leaf_boundaries() {
        let (_dir, tree) = tree();
        for key in 0..50i64 {
            tree.insert(key, (key * 2) as u64).unwrap();
        }

        let entries: Vec<(i64, u64)> = tree.iter().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 50);
        for (i, (k, v)) in entries.iter().enumerate() {
            assert_eq!(*k, i as i64);
            assert_eq!(*v, (i * 2) as u64);
        }
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let (_dir, tree) = tree();
        assert_eq!(tree.iter().unwrap().count(), 0);
    }

    #[test]
    fn seek_lands_mid_leaf_and_runs_to_end() {
        let (_dir, tree) = tree();
        for key in 0..20i64 {
            tree.insert(key, key as u64).unwrap();
        }
        let tail: Vec<i64> = tree.iter_from(&17).unwrap().map(|e| e.unwrap().0).collect();
        assert_eq!(tail, vec![17, 18, 19]);
    }
}
