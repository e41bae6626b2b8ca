//! # Hash Table Bucket Page
//!
//! Bottom level of the extendible hash index: an unordered array of
//! `(key, value)` entries.
//!
//! ```text
//! Offset  Size             Field
//! ------  ---------------  ---------------------------
//! 0       4                size
//! 4       4                max_size
//! 8       (K+V) * max_size entries
//! ```
//!
//! Lookup is a linear scan; removal swaps the last entry into the hole, so
//! entry order is never meaningful.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use crate::btree::keys::{read_at, write_at, IndexValue};
use crate::config::PAGE_SIZE;

use super::table::HashKey;

const BUCKET_HEADER_SIZE: usize = 8;

/// Entry capacity of a bucket when `max_size` is not overridden.
pub fn bucket_capacity<K, V>() -> u32 {
    ((PAGE_SIZE - BUCKET_HEADER_SIZE) / (size_of::<K>() + size_of::<V>())) as u32
}

fn key_offset<K, V>(idx: u32) -> usize {
    BUCKET_HEADER_SIZE + idx as usize * (size_of::<K>() + size_of::<V>())
}

fn value_offset<K, V>(idx: u32) -> usize {
    key_offset::<K, V>(idx) + size_of::<K>()
}

pub struct BucketPage<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: HashKey, V: IndexValue> BucketPage<'a, K, V> {
    pub fn from_page(data: &'a [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> u32 {
        read_at::<u32>(self.data, 0)
    }

    pub fn max_size(&self) -> u32 {
        read_at::<u32>(self.data, 4)
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn key_at(&self, idx: u32) -> K {
        debug_assert!(idx < self.size());
        read_at(self.data, key_offset::<K, V>(idx))
    }

    pub fn value_at(&self, idx: u32) -> V {
        debug_assert!(idx < self.size());
        read_at(self.data, value_offset::<K, V>(idx))
    }

    pub fn find(&self, key: &K) -> Option<u32> {
        (0..self.size()).find(|&i| self.key_at(i) == *key)
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        (0..self.size())
            .map(|i| (self.key_at(i), self.value_at(i)))
            .collect()
    }
}

pub struct BucketPageMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: HashKey, V: IndexValue> BucketPageMut<'a, K, V> {
    pub fn from_page(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn init(data: &'a mut [u8], max_size: u32) -> Result<Self> {
        let needed = key_offset::<K, V>(max_size);
        ensure!(
            max_size >= 1 && needed <= PAGE_SIZE,
            "bucket capacity {max_size} does not fit a page"
        );
        write_at::<u32>(data, 0, 0);
        write_at::<u32>(data, 4, max_size);
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn as_read(&self) -> BucketPage<'_, K, V> {
        BucketPage {
            data: self.data,
            _marker: PhantomData,
        }
    }

    /// Appends an entry. The caller checks capacity and uniqueness.
    pub fn insert(&mut self, key: K, value: V) {
        let size = self.as_read().size();
        debug_assert!(size < self.as_read().max_size());
        write_at(self.data, key_offset::<K, V>(size), key);
        write_at(self.data, value_offset::<K, V>(size), value);
        write_at::<u32>(self.data, 0, size + 1);
    }

    /// Removes the entry at `idx` by swapping the last entry in.
    pub fn remove_at(&mut self, idx: u32) {
        let size = self.as_read().size();
        debug_assert!(idx < size);
        let last = size - 1;
        if idx != last {
            let (k, v) = {
                let read = self.as_read();
                (read.key_at(last), read.value_at(last))
            };
            write_at(self.data, key_offset::<K, V>(idx), k);
            write_at(self.data, value_offset::<K, V>(idx), v);
        }
        write_at::<u32>(self.data, 0, last);
    }

    /// Empties the bucket, keeping its capacity.
    pub fn clear(&mut self) {
        write_at::<u32>(self.data, 0, 0);
    }
}
