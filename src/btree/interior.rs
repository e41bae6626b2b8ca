//! # B+Tree Interior Pages
//!
//! Interior layout (little-endian):
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------
//! 0       4     page_type (1 = interior)
//! 4       4     size       (children in use)
//! 8       4     max_size   (child capacity)
//! 12      K*max keys[0..max_size]     keys[0] is unused
//! 12+K*max 4*max children[0..max_size]
//! ```
//!
//! `keys[i]` (for `i >= 1`) separates `children[i-1]` from `children[i]`:
//! child `i` holds exactly the keys in `[keys[i], keys[i+1])`, open on the
//! left for child 0 and on the right for the last child. `size` counts
//! children, so a page carries `size - 1` usable separators.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use super::keys::{read_at, write_at, IndexKey};
use super::leaf::{page_type, shift_left, shift_right, INTERIOR_PAGE_TYPE};
use crate::config::{PageId, PAGE_SIZE};

const INTERIOR_HEADER_SIZE: usize = 12;

/// Child capacity of an interior page when `max_size` is not overridden.
pub fn interior_capacity<K>() -> u32 {
    ((PAGE_SIZE - INTERIOR_HEADER_SIZE) / (size_of::<K>() + size_of::<PageId>())) as u32
}

pub struct InteriorPage<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InteriorPage<'a, K> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            page_type(data) == INTERIOR_PAGE_TYPE,
            "page is not a b+tree interior page (type {})",
            page_type(data)
        );
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn size(&self) -> u32 {
        read_at::<u32>(self.data, 4)
    }

    pub fn max_size(&self) -> u32 {
        read_at::<u32>(self.data, 8)
    }

    pub fn min_size(&self) -> u32 {
        self.max_size().div_ceil(2)
    }

    /// Separator `idx`, valid for `1 <= idx < size`.
    pub fn key_at(&self, idx: u32) -> K {
        debug_assert!(idx >= 1 && idx < self.size());
        read_at(self.data, key_offset::<K>(idx))
    }

    pub fn child_at(&self, idx: u32) -> PageId {
        debug_assert!(idx < self.size());
        read_at(self.data, child_offset::<K>(self.max_size(), idx))
    }

    /// Index of the child whose range contains `key`.
    pub fn child_index_for(&self, key: &K) -> u32 {
        // First separator greater than `key`; the child to its left covers
        // the key.
        let mut lo = 1;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo - 1
    }

    pub fn child_for(&self, key: &K) -> PageId {
        self.child_at(self.child_index_for(key))
    }

    /// Copies out the separators (`keys[1..size]`).
    pub fn separators(&self) -> Vec<K> {
        (1..self.size()).map(|i| self.key_at(i)).collect()
    }

    /// Copies out all child page ids.
    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.child_at(i)).collect()
    }
}

pub struct InteriorPageMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InteriorPageMut<'a, K> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            page_type(data) == INTERIOR_PAGE_TYPE,
            "page is not a b+tree interior page (type {})",
            page_type(data)
        );
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    /// Formats an empty interior page with the given child capacity.
    pub fn init(data: &'a mut [u8], max_size: u32) -> Result<Self> {
        let needed =
            INTERIOR_HEADER_SIZE + max_size as usize * (size_of::<K>() + size_of::<PageId>());
        ensure!(
            max_size >= 3 && needed <= PAGE_SIZE,
            "interior capacity {max_size} does not fit a page ({needed} > {PAGE_SIZE} bytes)"
        );
        write_at::<u32>(data, 0, INTERIOR_PAGE_TYPE);
        write_at::<u32>(data, 4, 0);
        write_at::<u32>(data, 8, max_size);
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn as_read(&self) -> InteriorPage<'_, K> {
        InteriorPage {
            data: self.data,
            _marker: PhantomData,
        }
    }

    fn set_size(&mut self, size: u32) {
        write_at::<u32>(self.data, 4, size);
    }

    pub fn set_key_at(&mut self, idx: u32, key: K) {
        debug_assert!(idx >= 1 && idx < self.as_read().size());
        write_at(self.data, key_offset::<K>(idx), key);
    }

    pub fn set_child_at(&mut self, idx: u32, child: PageId) {
        let max = self.as_read().max_size();
        write_at(self.data, child_offset::<K>(max, idx), child);
    }

    /// Rebuilds the page from parallel separator/child arrays
    /// (`children.len() == separators.len() + 1`).
    pub fn set_contents(&mut self, separators: &[K], children: &[PageId]) {
        debug_assert_eq!(children.len(), separators.len() + 1);
        debug_assert!(children.len() <= self.as_read().max_size() as usize);
        let max = self.as_read().max_size();
        for (i, child) in children.iter().enumerate() {
            write_at(self.data, child_offset::<K>(max, i as u32), *child);
        }
        for (i, sep) in separators.iter().enumerate() {
            write_at(self.data, key_offset::<K>(i as u32 + 1), *sep);
        }
        self.set_size(children.len() as u32);
    }

    /// Installs the two children of a fresh root: `[left, right]` split by
    /// `key`.
    pub fn init_root(&mut self, key: K, left: PageId, right: PageId) {
        self.set_contents(&[key], &[left, right]);
    }

    /// Inserts separator `key` with `right` as the child to its right.
    /// The caller ensures the page is not full.
    pub fn insert_separator(&mut self, key: K, right: PageId) {
        let read = self.as_read();
        let size = read.size();
        debug_assert!(size < read.max_size());

        // Position among separators 1..size; the new child lands at the
        // same index in the child array.
        let mut idx = 1;
        while idx < size && read.key_at(idx) < key {
            idx += 1;
        }

        let max = read.max_size();
        shift_right::<K>(self.data, key_offset::<K>(0), idx, size);
        shift_right::<PageId>(self.data, child_offset::<K>(max, 0), idx, size);
        write_at(self.data, key_offset::<K>(idx), key);
        write_at(self.data, child_offset::<K>(max, idx), right);
        self.set_size(size + 1);
    }

    /// Removes separator `idx` and child `idx` together (the child to the
    /// right of the separator), shifting the remainder left.
    pub fn remove_at(&mut self, idx: u32) {
        let read = self.as_read();
        let size = read.size();
        debug_assert!(idx >= 1 && idx < size);

        let max = read.max_size();
        shift_left::<K>(self.data, key_offset::<K>(0), idx, size);
        shift_left::<PageId>(self.data, child_offset::<K>(max, 0), idx, size);
        self.set_size(size - 1);
    }
}

fn key_offset<K>(idx: u32) -> usize {
    INTERIOR_HEADER_SIZE + idx as usize * size_of::<K>()
}

fn child_offset<K>(max_size: u32, idx: u32) -> usize {
    INTERIOR_HEADER_SIZE + max_size as usize * size_of::<K>() + idx as usize * size_of::<PageId>()
}
