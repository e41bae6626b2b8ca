//! # Disk-Backed Extendible Hash Table
//!
//! Unordered unique-key index with the three-level page structure
//! header → directory → bucket. The 32-bit hash is a downcast of a 64-bit
//! non-cryptographic hash; its **top** bits pick the directory, its **low**
//! `global_depth` bits pick the bucket.
//!
//! ```text
//! [Header] ──top bits──► [Directory g=2] ──low bits──► [Bucket]
//!                          │ slots: 00 01 10 11
//!                          │ local depths per bucket
//! ```
//!
//! ## Growth and Shrinkage
//!
//! A full bucket splits on its `local_depth`-th hash bit; when the bucket
//! already uses every directory bit the directory doubles first (up to
//! `max_depth`). Removal merges a bucket with its split image while either
//! of the pair is empty and their depths agree, then shrinks the directory
//! while no bucket uses the top global bit.
//!
//! ## Latching
//!
//! Lookups crab read guards down the three levels. Mutations take the
//! directory's write guard for their whole run (plus bucket write guards),
//! so split/merge bookkeeping is single-writer per directory. The header
//! is write-latched only while proving a directory slot absent and
//! installing a fresh directory page.

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use eyre::{ensure, Result};

use super::bucket::{bucket_capacity, BucketPage, BucketPageMut};
use super::directory::{DirectoryPage, DirectoryPageMut};
use super::header::{HeaderPage, HeaderPageMut};
use crate::btree::keys::IndexValue;
use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::config::{
    PageId, HTABLE_DIRECTORY_MAX_DEPTH, HTABLE_HEADER_MAX_DEPTH, INVALID_PAGE_ID,
};

/// Key bound for the hash index: hashable, comparable, fixed zerocopy
/// layout.
pub trait HashKey:
    Eq
    + Hash
    + Copy
    + std::fmt::Debug
    + zerocopy::FromBytes
    + zerocopy::IntoBytes
    + zerocopy::Immutable
    + Send
    + Sync
    + 'static
{
}

impl<T> HashKey for T where
    T: Eq
        + Hash
        + Copy
        + std::fmt::Debug
        + zerocopy::FromBytes
        + zerocopy::IntoBytes
        + zerocopy::Immutable
        + Send
        + Sync
        + 'static
{
}

/// Pluggable hash function. The default downcasts hashbrown's 64-bit
/// foldhash; tests inject an identity hash to steer keys into chosen
/// buckets.
pub trait KeyHash<K>: Default + Send + Sync {
    fn hash_of(&self, key: &K) -> u32;
}

#[derive(Default)]
pub struct DefaultKeyHash(hashbrown::DefaultHashBuilder);

impl<K: Hash> KeyHash<K> for DefaultKeyHash {
    fn hash_of(&self, key: &K) -> u32 {
        self.0.hash_one(key) as u32
    }
}

pub struct DiskHashTable<K, V, H = DefaultKeyHash> {
    bpm: BufferPoolManager,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> DiskHashTable<K, V, H>
where
    K: HashKey,
    V: IndexValue,
    H: KeyHash<K>,
{
    /// Creates an empty table with page-filling depths and bucket size.
    pub fn create(bpm: BufferPoolManager) -> Result<Self> {
        let bucket_max = bucket_capacity::<K, V>();
        Self::create_with_shape(
            bpm,
            HTABLE_HEADER_MAX_DEPTH,
            HTABLE_DIRECTORY_MAX_DEPTH,
            bucket_max,
        )
    }

    /// Creates an empty table with explicit depth bounds and bucket
    /// capacity; structural tests shrink these to force splits early.
    pub fn create_with_shape(
        bpm: BufferPoolManager,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<Self> {
        let header_page_id = bpm.new_page();
        ensure!(
            header_page_id != INVALID_PAGE_ID,
            "buffer pool exhausted while creating hash table"
        );
        {
            let mut guard = bpm.write_page(header_page_id)?;
            HeaderPageMut::init(guard.data_mut(), header_max_depth)?;
        }
        Ok(Self {
            bpm,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            hasher: H::default(),
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Point lookup.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let hash = self.hasher.hash_of(key);
        let Some(dir_pid) = self.directory_page(hash)? else {
            return Ok(None);
        };

        let dir_guard = self.bpm.read_page(dir_pid)?;
        let dir = DirectoryPage::from_page(dir_guard.data());
        let bucket_pid = dir.bucket_page_id(dir.bucket_index(hash));
        // Latch the bucket before releasing the directory so a concurrent
        // merge cannot free it under us.
        let bucket_guard = self.bpm.read_page(bucket_pid)?;
        drop(dir_guard);

        let bucket = BucketPage::<K, V>::from_page(bucket_guard.data());
        Ok(bucket.find(key).map(|idx| bucket.value_at(idx)))
    }

    /// Inserts a unique key. `false` when the key exists or the bucket can
    /// no longer split (directory at max depth).
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let hash = self.hasher.hash_of(&key);
        let dir_pid = self.directory_page_or_create(hash)?;
        let mut dir_guard = self.bpm.write_page(dir_pid)?;

        loop {
            let (bucket_idx, bucket_pid) = {
                let dir = DirectoryPage::from_page(dir_guard.data());
                let idx = dir.bucket_index(hash);
                (idx, dir.bucket_page_id(idx))
            };

            {
                let mut bucket_guard = self.bpm.write_page(bucket_pid)?;
                let mut bucket = BucketPageMut::<K, V>::from_page(bucket_guard.data_mut());
                if bucket.as_read().find(&key).is_some() {
                    return Ok(false);
                }
                if !bucket.as_read().is_full() {
                    bucket.insert(key, value);
                    return Ok(true);
                }
            }

            // Full bucket: make room by splitting, doubling the directory
            // first when the bucket already uses every global bit.
            let (local, global, max) = {
                let dir = DirectoryPage::from_page(dir_guard.data());
                (dir.local_depth(bucket_idx), dir.global_depth(), dir.max_depth())
            };
            if local == global {
                if global >= max {
                    return Ok(false);
                }
                DirectoryPageMut::from_page(dir_guard.data_mut()).incr_global_depth()?;
            }
            self.split_bucket(&mut dir_guard, bucket_idx, bucket_pid)?;
        }
    }

    /// Removes a key, merging and shrinking on the way out. `false` when
    /// the key is absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let hash = self.hasher.hash_of(key);
        let Some(dir_pid) = self.directory_page(hash)? else {
            return Ok(false);
        };
        let mut dir_guard = self.bpm.write_page(dir_pid)?;

        let mut bucket_idx = {
            let dir = DirectoryPage::from_page(dir_guard.data());
            dir.bucket_index(hash)
        };
        {
            let bucket_pid = DirectoryPage::from_page(dir_guard.data()).bucket_page_id(bucket_idx);
            let mut bucket_guard = self.bpm.write_page(bucket_pid)?;
            let mut bucket = BucketPageMut::<K, V>::from_page(bucket_guard.data_mut());
            let Some(idx) = bucket.as_read().find(key) else {
                return Ok(false);
            };
            bucket.remove_at(idx);
        }

        // Merge while this bucket or its split image is empty and the pair
        // agrees on depth.
        loop {
            let dir = DirectoryPage::from_page(dir_guard.data());
            let local = dir.local_depth(bucket_idx);
            if local == 0 {
                break;
            }
            let image_idx = dir.split_image_index(bucket_idx);
            if dir.local_depth(image_idx) != local {
                break;
            }
            let bucket_pid = dir.bucket_page_id(bucket_idx);
            let image_pid = dir.bucket_page_id(image_idx);
            if bucket_pid == image_pid {
                break;
            }

            let bucket_empty = {
                let guard = self.bpm.read_page(bucket_pid)?;
                BucketPage::<K, V>::from_page(guard.data()).is_empty()
            };
            let image_empty = {
                let guard = self.bpm.read_page(image_pid)?;
                BucketPage::<K, V>::from_page(guard.data()).is_empty()
            };
            if !bucket_empty && !image_empty {
                break;
            }

            let (survivor, dead) = if bucket_empty {
                (image_pid, bucket_pid)
            } else {
                (bucket_pid, image_pid)
            };
            let size = dir.size();
            let mut dir_mut = DirectoryPageMut::from_page(dir_guard.data_mut());
            for i in 0..size {
                if dir_mut.as_read().bucket_page_id(i) == dead {
                    dir_mut.set_bucket_page_id(i, survivor);
                }
            }
            for i in 0..size {
                if dir_mut.as_read().bucket_page_id(i) == survivor {
                    dir_mut.set_local_depth(i, local - 1);
                }
            }
            if !self.bpm.delete_page(dead) {
                log::debug!("merged hash bucket {dead} still pinned; leaving to the replacer");
            }
            bucket_idx &= (1 << (local - 1)) - 1;
        }

        loop {
            let dir = DirectoryPage::from_page(dir_guard.data());
            if !dir.can_shrink() {
                break;
            }
            DirectoryPageMut::from_page(dir_guard.data_mut()).decr_global_depth();
        }
        Ok(true)
    }

    /// Splits the bucket at `bucket_idx` on its `local_depth`-th hash bit.
    /// The directory's global depth already exceeds the bucket's local
    /// depth.
    fn split_bucket(
        &self,
        dir_guard: &mut WritePageGuard,
        bucket_idx: u32,
        bucket_pid: PageId,
    ) -> Result<()> {
        let (local, size) = {
            let dir = DirectoryPage::from_page(dir_guard.data());
            (dir.local_depth(bucket_idx), dir.size())
        };
        let split_bit = 1u32 << local;
        let new_local = local + 1;

        let new_pid = self.allocate_page()?;
        {
            let mut new_guard = self.bpm.write_page(new_pid)?;
            let mut new_bucket = BucketPageMut::<K, V>::init(new_guard.data_mut(), self.bucket_max_size)?;

            let mut old_guard = self.bpm.write_page(bucket_pid)?;
            let mut old_bucket = BucketPageMut::<K, V>::from_page(old_guard.data_mut());
            let entries = old_bucket.as_read().entries();
            old_bucket.clear();
            for (k, v) in entries {
                if self.hasher.hash_of(&k) & split_bit != 0 {
                    new_bucket.insert(k, v);
                } else {
                    old_bucket.insert(k, v);
                }
            }
        }

        let mut dir = DirectoryPageMut::from_page(dir_guard.data_mut());
        for i in 0..size {
            if dir.as_read().bucket_page_id(i) == bucket_pid {
                dir.set_local_depth(i, new_local);
                if i & split_bit != 0 {
                    dir.set_bucket_page_id(i, new_pid);
                }
            }
        }
        Ok(())
    }

    /// Resolves the directory for `hash` without creating it.
    fn directory_page(&self, hash: u32) -> Result<Option<PageId>> {
        let guard = self.bpm.read_page(self.header_page_id)?;
        let header = HeaderPage::from_page(guard.data());
        let pid = header.directory_page_id(header.directory_index(hash));
        Ok((pid != INVALID_PAGE_ID).then_some(pid))
    }

    /// Resolves the directory for `hash`, installing a fresh directory
    /// (with one empty bucket) under the header write guard if the slot is
    /// vacant.
    fn directory_page_or_create(&self, hash: u32) -> Result<PageId> {
        if let Some(pid) = self.directory_page(hash)? {
            return Ok(pid);
        }

        let mut header_guard = self.bpm.write_page(self.header_page_id)?;
        let idx = HeaderPage::from_page(header_guard.data()).directory_index(hash);
        let existing = HeaderPage::from_page(header_guard.data()).directory_page_id(idx);
        if existing != INVALID_PAGE_ID {
            // Lost the race to another inserter.
            return Ok(existing);
        }

        let dir_pid = self.allocate_page()?;
        let bucket_pid = self.allocate_page()?;
        {
            let mut bucket_guard = self.bpm.write_page(bucket_pid)?;
            BucketPageMut::<K, V>::init(bucket_guard.data_mut(), self.bucket_max_size)?;
        }
        {
            let mut dir_guard = self.bpm.write_page(dir_pid)?;
            let mut dir = DirectoryPageMut::init(dir_guard.data_mut(), self.directory_max_depth)?;
            dir.set_bucket_page_id(0, bucket_pid);
            dir.set_local_depth(0, 0);
        }
        HeaderPageMut::from_page(header_guard.data_mut()).set_directory_page_id(idx, dir_pid);
        Ok(dir_pid)
    }

    fn allocate_page(&self) -> Result<PageId> {
        let pid = self.bpm.new_page();
        ensure!(
            pid != INVALID_PAGE_ID,
            "buffer pool exhausted while growing hash table"
        );
        Ok(pid)
    }

    /// Walks every directory checking the extendible-hashing invariants.
    pub fn verify_integrity(&self) -> Result<()> {
        let header_guard = self.bpm.read_page(self.header_page_id)?;
        let header = HeaderPage::from_page(header_guard.data());
        for idx in 0..header.slot_count() {
            let dir_pid = header.directory_page_id(idx);
            if dir_pid == INVALID_PAGE_ID {
                continue;
            }
            let dir_guard = self.bpm.read_page(dir_pid)?;
            let dir = DirectoryPage::from_page(dir_guard.data());
            dir.verify_integrity()?;
            for slot in 0..dir.size() {
                let bucket_guard = self.bpm.read_page(dir.bucket_page_id(slot))?;
                let bucket = BucketPage::<K, V>::from_page(bucket_guard.data());
                ensure!(
                    bucket.size() <= bucket.max_size(),
                    "bucket over capacity"
                );
            }
        }
        Ok(())
    }
}
