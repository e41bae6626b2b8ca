//! # Hash Table Directory Page
//!
//! Middle level of the extendible hash index. The directory routes the
//! **low** `global_depth` bits of the hash to a bucket page, and tracks a
//! local depth per bucket:
//!
//! ```text
//! Offset        Size      Field
//! ------------  --------  ---------------------------
//! 0             4         max_depth
//! 4             4         global_depth
//! 8             2^max     local_depths  (one byte each)
//! 8 + 2^max     4 * 2^max bucket_page_ids
//! ```
//!
//! ## Depth Invariants
//!
//! For every slot `i` with local depth `L`: all `2^(global - L)` slots
//! whose low `L` bits equal `i mod 2^L` share one bucket page and carry the
//! same `L`. Doubling copies the lower half of both arrays into the upper
//! half; shrinking just decrements `global_depth` once no slot's local
//! depth reaches it.

use eyre::{ensure, Result};

use crate::btree::keys::{read_at, write_at};
use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

const DIR_HEADER_SIZE: usize = 8;

fn depth_offset(idx: u32) -> usize {
    DIR_HEADER_SIZE + idx as usize
}

fn bucket_offset(max_depth: u32, idx: u32) -> usize {
    DIR_HEADER_SIZE + (1usize << max_depth) + idx as usize * 4
}

pub struct DirectoryPage<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryPage<'a> {
    pub fn from_page(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn max_depth(&self) -> u32 {
        read_at::<u32>(self.data, 0)
    }

    pub fn global_depth(&self) -> u32 {
        read_at::<u32>(self.data, 4)
    }

    pub fn size(&self) -> u32 {
        1 << self.global_depth()
    }

    /// Bucket slot for a hash: the low `global_depth` bits.
    pub fn bucket_index(&self, hash: u32) -> u32 {
        hash & (self.size() - 1)
    }

    pub fn local_depth(&self, idx: u32) -> u32 {
        debug_assert!(idx < self.size());
        read_at::<u8>(self.data, depth_offset(idx)) as u32
    }

    pub fn bucket_page_id(&self, idx: u32) -> PageId {
        debug_assert!(idx < self.size());
        read_at::<PageId>(self.data, bucket_offset(self.max_depth(), idx))
    }

    /// The slot whose bucket is this slot's split image: the index with the
    /// `local_depth - 1` bit flipped.
    pub fn split_image_index(&self, idx: u32) -> u32 {
        let depth = self.local_depth(idx);
        debug_assert!(depth > 0);
        idx ^ (1 << (depth - 1))
    }

    /// True when no bucket uses every global bit, so the directory can
    /// halve.
    pub fn can_shrink(&self) -> bool {
        let global = self.global_depth();
        global > 0 && (0..self.size()).all(|i| self.local_depth(i) < global)
    }

    /// Checks the extendible-hashing invariants across all slots.
    pub fn verify_integrity(&self) -> Result<()> {
        let global = self.global_depth();
        ensure!(global <= self.max_depth(), "global depth above max depth");
        for i in 0..self.size() {
            let ld = self.local_depth(i);
            let pid = self.bucket_page_id(i);
            ensure!(ld <= global, "slot {i}: local depth {ld} above global {global}");
            ensure!(pid != INVALID_PAGE_ID, "slot {i}: unassigned bucket");

            let expected_sharers = 1u32 << (global - ld);
            let sharers = (0..self.size())
                .filter(|&j| self.bucket_page_id(j) == pid)
                .count() as u32;
            ensure!(
                sharers == expected_sharers,
                "bucket {pid}: {sharers} slots point at it, expected {expected_sharers}"
            );
            for j in 0..self.size() {
                if self.bucket_page_id(j) == pid {
                    ensure!(
                        self.local_depth(j) == ld,
                        "slots {i} and {j} share a bucket with different local depths"
                    );
                    ensure!(
                        j & ((1 << ld) - 1) == i & ((1 << ld) - 1),
                        "slots {i} and {j} share a bucket across depth classes"
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct DirectoryPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryPageMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn init(data: &'a mut [u8], max_depth: u32) -> Result<Self> {
        let needed = bucket_offset(max_depth, 1 << max_depth);
        ensure!(
            needed <= PAGE_SIZE,
            "hash directory with max_depth {max_depth} does not fit a page"
        );
        write_at::<u32>(data, 0, max_depth);
        write_at::<u32>(data, 4, 0);
        for idx in 0..(1u32 << max_depth) {
            write_at::<u8>(data, depth_offset(idx), 0);
            write_at::<PageId>(data, bucket_offset(max_depth, idx), INVALID_PAGE_ID);
        }
        Ok(Self { data })
    }

    pub fn as_read(&self) -> DirectoryPage<'_> {
        DirectoryPage { data: self.data }
    }

    pub fn set_local_depth(&mut self, idx: u32, depth: u32) {
        debug_assert!(idx < self.as_read().size());
        debug_assert!(depth <= self.as_read().max_depth());
        write_at::<u8>(self.data, depth_offset(idx), depth as u8);
    }

    pub fn set_bucket_page_id(&mut self, idx: u32, page_id: PageId) {
        debug_assert!(idx < self.as_read().size());
        let max_depth = self.as_read().max_depth();
        write_at::<PageId>(self.data, bucket_offset(max_depth, idx), page_id);
    }

    /// Doubles the directory: the upper half mirrors the lower half.
    pub fn incr_global_depth(&mut self) -> Result<()> {
        let read = self.as_read();
        let global = read.global_depth();
        ensure!(
            global < read.max_depth(),
            "directory already at max depth {global}"
        );
        let half = read.size();
        let max_depth = read.max_depth();
        for idx in 0..half {
            let depth = read_at::<u8>(self.data, depth_offset(idx));
            let pid = read_at::<PageId>(self.data, bucket_offset(max_depth, idx));
            write_at::<u8>(self.data, depth_offset(half + idx), depth);
            write_at::<PageId>(self.data, bucket_offset(max_depth, half + idx), pid);
        }
        write_at::<u32>(self.data, 4, global + 1);
        Ok(())
    }

    /// Halves the directory. Caller checks [`DirectoryPage::can_shrink`].
    pub fn decr_global_depth(&mut self) {
        let global = self.as_read().global_depth();
        debug_assert!(global > 0);
        write_at::<u32>(self.data, 4, global - 1);
    }
}
