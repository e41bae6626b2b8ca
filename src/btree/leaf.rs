//! # B+Tree Leaf Pages
//!
//! Leaf layout (all fields little-endian):
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------
//! 0       4     page_type (2 = leaf)
//! 4       4     size       (entries in use)
//! 8       4     max_size   (entry capacity)
//! 12      4     next_page_id
//! 16      K*max keys[0..max_size]
//! 16+K*max V*max values[0..max_size]
//! ```
//!
//! Keys are sorted ascending; `values[i]` belongs to `keys[i]`. Leaves of a
//! tree form a singly linked list through `next_page_id` in key order.
//!
//! The views below never hand out references into the page: keys and
//! values are copied in and out, which keeps alignment irrelevant and the
//! borrow story trivial under page guards.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use super::keys::{read_at, write_at, IndexKey, IndexValue};
use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

pub const LEAF_PAGE_TYPE: u32 = 2;
pub const INTERIOR_PAGE_TYPE: u32 = 1;
const LEAF_HEADER_SIZE: usize = 16;

/// Entry capacity of a leaf when `max_size` is not overridden.
pub fn leaf_capacity<K, V>() -> u32 {
    ((PAGE_SIZE - LEAF_HEADER_SIZE) / (size_of::<K>() + size_of::<V>())) as u32
}

pub(crate) fn page_type(data: &[u8]) -> u32 {
    read_at::<u32>(data, 0)
}

pub(crate) fn is_leaf(data: &[u8]) -> bool {
    page_type(data) == LEAF_PAGE_TYPE
}

pub struct LeafPage<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> LeafPage<'a, K, V> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            page_type(data) == LEAF_PAGE_TYPE,
            "page is not a b+tree leaf (type {})",
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
        self.max_size() / 2
    }

    pub fn next_page_id(&self) -> PageId {
        read_at::<PageId>(self.data, 12)
    }

    pub fn key_at(&self, idx: u32) -> K {
        debug_assert!(idx < self.size());
        read_at(self.data, key_offset::<K>(idx))
    }

    pub fn value_at(&self, idx: u32) -> V {
        debug_assert!(idx < self.size());
        read_at(self.data, value_offset::<K, V>(self.max_size(), idx))
    }

    /// Index of the first key `>= key`; `size()` when all keys are smaller.
    pub fn lower_bound(&self, key: &K) -> u32 {
        let mut lo = 0;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Position of `key` if present.
    pub fn find(&self, key: &K) -> Option<u32> {
        let idx = self.lower_bound(key);
        (idx < self.size() && self.key_at(idx) == *key).then_some(idx)
    }

    /// Copies out all entries, in order. Split/merge paths work on this.
    pub fn entries(&self) -> Vec<(K, V)> {
        (0..self.size())
            .map(|i| (self.key_at(i), self.value_at(i)))
            .collect()
    }
}

pub struct LeafPageMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> LeafPageMut<'a, K, V> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            page_type(data) == LEAF_PAGE_TYPE,
            "page is not a b+tree leaf (type {})",
            page_type(data)
        );
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    /// Formats an empty leaf with the given capacity.
    pub fn init(data: &'a mut [u8], max_size: u32) -> Result<Self> {
        let needed = LEAF_HEADER_SIZE + max_size as usize * (size_of::<K>() + size_of::<V>());
        ensure!(
            max_size >= 2 && needed <= PAGE_SIZE,
            "leaf capacity {max_size} does not fit a page ({needed} > {PAGE_SIZE} bytes)"
        );
        write_at::<u32>(data, 0, LEAF_PAGE_TYPE);
        write_at::<u32>(data, 4, 0);
        write_at::<u32>(data, 8, max_size);
        write_at::<PageId>(data, 12, INVALID_PAGE_ID);
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn as_read(&self) -> LeafPage<'_, K, V> {
        LeafPage {
            data: self.data,
            _marker: PhantomData,
        }
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        write_at::<PageId>(self.data, 12, next);
    }

    fn set_size(&mut self, size: u32) {
        write_at::<u32>(self.data, 4, size);
    }

    pub fn set_entry(&mut self, idx: u32, key: K, value: V) {
        let max = self.as_read().max_size();
        write_at(self.data, key_offset::<K>(idx), key);
        write_at(self.data, value_offset::<K, V>(max, idx), value);
    }

    /// Inserts at the sorted position, shifting later entries right.
    /// The caller ensures the leaf is not full and the key is absent.
    pub fn insert_at(&mut self, idx: u32, key: K, value: V) {
        let read = self.as_read();
        let size = read.size();
        let max = read.max_size();
        debug_assert!(size < max && idx <= size);

        shift_right::<K>(self.data, key_offset::<K>(0), idx, size);
        shift_right::<V>(self.data, value_offset::<K, V>(max, 0), idx, size);
        self.set_entry(idx, key, value);
        self.set_size(size + 1);
    }

    /// Removes the entry at `idx`, shifting later entries left.
    pub fn remove_at(&mut self, idx: u32) {
        let read = self.as_read();
        let size = read.size();
        let max = read.max_size();
        debug_assert!(idx < size);

        shift_left::<K>(self.data, key_offset::<K>(0), idx, size);
        shift_left::<V>(self.data, value_offset::<K, V>(max, 0), idx, size);
        self.set_size(size - 1);
    }

    /// Replaces the whole entry array. Split and merge rebuild pages with
    /// this.
    pub fn set_entries(&mut self, entries: &[(K, V)]) {
        debug_assert!(entries.len() <= self.as_read().max_size() as usize);
        for (i, (k, v)) in entries.iter().enumerate() {
            self.set_entry(i as u32, *k, *v);
        }
        self.set_size(entries.len() as u32);
    }
}

fn key_offset<K>(idx: u32) -> usize {
    LEAF_HEADER_SIZE + idx as usize * size_of::<K>()
}

fn value_offset<K, V>(max_size: u32, idx: u32) -> usize {
    LEAF_HEADER_SIZE + max_size as usize * size_of::<K>() + idx as usize * size_of::<V>()
}

/// Opens a hole at `idx` in an array of `size` elements of `T` based at
/// `base`.
pub(crate) fn shift_right<T>(data: &mut [u8], base: usize, idx: u32, size: u32) {
    let stride = size_of::<T>();
    let start = base + idx as usize * stride;
    let end = base + size as usize * stride;
    data.copy_within(start..end, start + stride);
}

/// Closes the hole at `idx` in an array of `size` elements.
pub(crate) fn shift_left<T>(data: &mut [u8], base: usize, idx: u32, size: u32) {
    let stride = size_of::<T>();
    let start = base + (idx as usize + 1) * stride;
    let end = base + size as usize * stride;
    data.copy_within(start..end, start - stride);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_leaf(max: u32) -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE];
        LeafPageMut::<i64, u64>::init(&mut data, max).unwrap();
        data
    }

    #[test]
    fn init_writes_header() {
        let data = empty_leaf(8);
        let leaf = LeafPage::<i64, u64>::from_page(&data).unwrap();
        assert_eq!(leaf.size(), 0);
        assert_eq!(leaf.max_size(), 8);
        assert_eq!(leaf.next_page_id(), INVALID_PAGE_ID);
        assert!(is_leaf(&data));
    }

    #[test]
    fn sorted_insert_and_lookup() {
        let mut data = empty_leaf(8);
        let mut leaf = LeafPageMut::<i64, u64>::from_page(&mut data).unwrap();

        for key in [30i64, 10, 20, 40] {
            let idx = leaf.as_read().lower_bound(&key);
            leaf.insert_at(idx, key, key as u64 * 10);
        }

        let read = leaf.as_read();
        assert_eq!(read.entries(), vec![(10, 100), (20, 200), (30, 300), (40, 400)]);
        assert_eq!(read.find(&20), Some(1));
        assert_eq!(read.find(&25), None);
        assert_eq!(read.lower_bound(&25), 2);
        assert_eq!(read.lower_bound(&99), 4);
    }

    #[test]
    fn remove_shifts_entries() {
        let mut data = empty_leaf(8);
        let mut leaf = LeafPageMut::<i64, u64>::from_page(&mut data).unwrap();
        for (i, key) in [1i64, 2, 3].iter().enumerate() {
            leaf.insert_at(i as u32, *key, 0);
        }

        leaf.remove_at(1);
        let read = leaf.as_read();
        assert_eq!(read.size(), 2);
        assert_eq!(read.key_at(0), 1);
        assert_eq!(read.key_at(1), 3);
    }

    #[test]
    fn oversized_capacity_is_rejected() {
        let mut data = vec![0u8; PAGE_SIZE];
        assert!(LeafPageMut::<i64, u64>::init(&mut data, 100_000).is_err());
    }

    #[test]
    fn default_capacity_fills_the_page() {
        let cap = leaf_capacity::<i64, u64>();
        assert_eq!(cap, ((PAGE_SIZE - 16) / 16) as u32);
        let mut data = vec![0u8; PAGE_SIZE];
        assert!(LeafPageMut::<i64, u64>::init(&mut data, cap).is_ok());
    }
}
