//! # Buffer Pool Manager
//!
//! Maps pages of the backing file into a fixed set of in-memory frames and
//! hands out RAII guards for scoped access. The pool owns three coupled
//! structures — the page table, the free list, and the LRU-K replacer — all
//! protected by one mutex that is **never held across disk I/O**.
//!
//! ## Frame Anatomy
//!
//! ```text
//! Frame
//! ├── pin_count: AtomicUsize     // live guards + in-flight fetches
//! ├── is_dirty:  AtomicBool      // set by every write guard
//! └── data: Arc<RwLock<PageBuf>> // the frame latch; guards own a lock on it
//! ```
//!
//! Pin counts and the replacer's evictable flags are always updated together
//! under the pool latch, so "pinned" and "non-evictable" cannot drift apart.
//!
//! ## Miss Protocol
//!
//! A fetch that misses picks a frame (free list first, else the replacer's
//! victim), unmaps the victim *before* releasing the pool latch, and only
//! then performs I/O under the frame's write latch:
//!
//! 1. Victim write-back (if dirty) completes before any other thread may
//!    read the victim page from disk — concurrent fetches of that page wait
//!    on a condvar keyed by the in-flight write-back set.
//! 2. The new mapping is published only after the page's bytes are in the
//!    frame, so no thread ever observes a frame whose contents disagree
//!    with the page table.
//! 3. If another thread published the same page first, the local frame is
//!    returned to the free list and the fetch retries as a hit.
//!
//! A failed disk read restores the frame to the free list and surfaces as
//! `None` from the checked accessors.
//!
//! ## Eviction Safety
//!
//! A frame is selectable as a victim only while its pin count is zero and
//! it is marked evictable; both transitions happen under the pool latch.
//! Hit paths pin and mark non-evictable before touching the frame latch, so
//! a frame can never be repurposed between a hit and its latch acquisition.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{eyre, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex, RwLock};

use super::lru_k_replacer::{AccessType, LruKReplacer};
use super::page_guard::{FrameWriteLatch, ReadPageGuard, WritePageGuard};
use crate::config::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::{DiskManager, DiskScheduler, PageBuf};

pub(crate) struct Frame {
    pub(crate) pin_count: AtomicUsize,
    pub(crate) is_dirty: AtomicBool,
    pub(crate) data: Arc<RwLock<PageBuf>>,
}

impl Frame {
    fn new() -> Self {
        Self {
            pin_count: AtomicUsize::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }
}

pub(crate) struct PoolInner {
    pub(crate) page_table: HashMap<PageId, FrameId>,
    /// Inverse of `page_table`, indexed by frame. `INVALID_PAGE_ID` marks a
    /// free or in-transition frame.
    pub(crate) frame_page: Vec<PageId>,
    pub(crate) free_list: Vec<FrameId>,
    /// Victim pages whose dirty bytes are still on their way to disk. A
    /// fetch of such a page must wait, or it would read a stale image.
    writing_back: HashSet<PageId>,
}

pub(crate) struct PoolCore {
    pub(crate) frames: Vec<Frame>,
    pub(crate) inner: Mutex<PoolInner>,
    pub(crate) replacer: LruKReplacer,
    writeback_done: Condvar,
    scheduler: DiskScheduler,
    next_page_id: AtomicU32,
}

impl PoolCore {
    /// Pin `frame_id` and mark it non-evictable. Caller holds the pool latch.
    fn pin_locked(&self, frame_id: FrameId) {
        self.frames[frame_id].pin_count.fetch_add(1, Ordering::AcqRel);
        self.replacer.record_access(frame_id, AccessType::Lookup);
        self.replacer.set_evictable(frame_id, false);
    }

    /// Drop one pin; the last pin out marks the frame evictable. Called from
    /// guard drops and internal error paths.
    pub(crate) fn unpin(&self, frame_id: FrameId) {
        let _inner = self.inner.lock();
        let prev = self.frames[frame_id].pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pin count underflow on frame {frame_id}");
        if prev == 1 {
            self.replacer.set_evictable(frame_id, true);
        }
    }

    fn write_back(&self, page_id: PageId, data: PageBuf) -> Result<()> {
        let result = self.scheduler.write(page_id, data)?.wait();
        let mut inner = self.inner.lock();
        inner.writing_back.remove(&page_id);
        drop(inner);
        self.writeback_done.notify_all();
        result
    }
}

enum LoadKind {
    /// Fill the frame with zeroes (fresh allocation).
    Zero,
    /// Fetch the page's bytes from disk.
    FromDisk,
}

/// Shared handle to the pool. Cloning is cheap; all clones address the same
/// frames.
#[derive(Clone)]
pub struct BufferPoolManager {
    core: Arc<PoolCore>,
}

impl BufferPoolManager {
    pub fn new(num_frames: usize, k: usize, disk: DiskManager) -> Self {
        let frames = (0..num_frames).map(|_| Frame::new()).collect();
        let core = PoolCore {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(num_frames),
                frame_page: vec![INVALID_PAGE_ID; num_frames],
                free_list: (0..num_frames).rev().collect(),
                writing_back: HashSet::new(),
            }),
            replacer: LruKReplacer::new(num_frames, k),
            writeback_done: Condvar::new(),
            scheduler: DiskScheduler::new(disk),
            next_page_id: AtomicU32::new(0),
        };
        Self { core: Arc::new(core) }
    }

    /// Number of frames in the pool.
    pub fn size(&self) -> usize {
        self.core.frames.len()
    }

    /// Allocates a fresh page id and materializes its zero page in a frame.
    /// The page is resident but unpinned on return. Returns
    /// `INVALID_PAGE_ID` when every frame is pinned.
    pub fn new_page(&self) -> PageId {
        let page_id = self.core.next_page_id.fetch_add(1, Ordering::AcqRel);
        match self.acquire_frame(page_id, LoadKind::Zero) {
            Some((frame_id, guard)) => {
                drop(guard);
                self.core.unpin(frame_id);
                page_id
            }
            None => INVALID_PAGE_ID,
        }
    }

    /// Drops a page from the pool: flushes it if dirty, forgets its frame's
    /// access history, and returns the frame to the free list. Returns
    /// `false` (without side effects) when the page is pinned; `true` when
    /// the page was dropped or was not resident at all.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let frame_id = {
            let mut inner = self.core.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return true;
            };
            if self.core.frames[frame_id].pin_count.load(Ordering::Acquire) > 0 {
                return false;
            }
            inner.page_table.remove(&page_id);
            inner.frame_page[frame_id] = INVALID_PAGE_ID;
            self.core.replacer.remove(frame_id);
            // Hold a pin through the flush so debug assertions on the pin
            // discipline stay meaningful; the frame is unreachable anyway.
            self.core.frames[frame_id].pin_count.fetch_add(1, Ordering::AcqRel);
            frame_id
        };

        let frame = &self.core.frames[frame_id];
        let mut latch = frame.data.write_arc();
        if frame.is_dirty.swap(false, Ordering::AcqRel) {
            let copy: PageBuf = Box::new(**latch);
            if let Err(err) = self
                .core
                .scheduler
                .write(page_id, copy)
                .and_then(|c| c.wait())
            {
                log::warn!("flush of deleted page {page_id} failed: {err:#}");
            }
        }
        latch.fill(0);
        drop(latch);

        let mut inner = self.core.inner.lock();
        inner.free_list.push(frame_id);
        frame.pin_count.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// Fetches `page_id` for shared access. `None` when no frame can be
    /// obtained or the disk read fails.
    pub fn checked_read_page(&self, page_id: PageId) -> Option<ReadPageGuard> {
        match self.lookup_or_load(page_id)? {
            Fetched::Hit(frame_id) => {
                let latch = self.core.frames[frame_id].data.read_arc();
                Some(ReadPageGuard::new(Arc::clone(&self.core), page_id, frame_id, latch))
            }
            Fetched::Loaded(frame_id, write_latch) => {
                let latch = FrameWriteLatch::downgrade(write_latch);
                Some(ReadPageGuard::new(Arc::clone(&self.core), page_id, frame_id, latch))
            }
        }
    }

    /// Fetches `page_id` for exclusive access and marks the frame dirty.
    /// `None` when no frame can be obtained or the disk read fails.
    pub fn checked_write_page(&self, page_id: PageId) -> Option<WritePageGuard> {
        let (frame_id, latch) = match self.lookup_or_load(page_id)? {
            Fetched::Hit(frame_id) => {
                let latch = self.core.frames[frame_id].data.write_arc();
                (frame_id, latch)
            }
            Fetched::Loaded(frame_id, latch) => (frame_id, latch),
        };
        self.core.frames[frame_id].is_dirty.store(true, Ordering::Release);
        Some(WritePageGuard::new(Arc::clone(&self.core), page_id, frame_id, latch))
    }

    /// Like [`checked_read_page`](Self::checked_read_page), but converts
    /// exhaustion into an error.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.checked_read_page(page_id)
            .ok_or_else(|| eyre!("buffer pool exhausted while reading page {page_id}"))
    }

    /// Like [`checked_write_page`](Self::checked_write_page), but converts
    /// exhaustion into an error.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.checked_write_page(page_id)
            .ok_or_else(|| eyre!("buffer pool exhausted while writing page {page_id}"))
    }

    /// Synchronously writes `page_id` out if it is resident and dirty.
    /// Returns `false` when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let frame_id = {
            let inner = self.core.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return false;
            };
            self.core.pin_locked(frame_id);
            frame_id
        };

        let frame = &self.core.frames[frame_id];
        {
            let latch = frame.data.read_arc();
            if frame.is_dirty.swap(false, Ordering::AcqRel) {
                let copy: PageBuf = Box::new(**latch);
                if let Err(err) = self
                    .core
                    .scheduler
                    .write(page_id, copy)
                    .and_then(|c| c.wait())
                {
                    log::warn!("flush of page {page_id} failed: {err:#}");
                    frame.is_dirty.store(true, Ordering::Release);
                }
            }
        }
        self.core.unpin(frame_id);
        true
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) {
        let resident: Vec<PageId> = {
            let inner = self.core.inner.lock();
            inner.page_table.keys().copied().collect()
        };
        for page_id in resident {
            self.flush_page(page_id);
        }
    }

    /// Thread-safe pin-count probe; `None` when the page is not resident.
    /// Test instrumentation only.
    pub fn pin_count(&self, page_id: PageId) -> Option<usize> {
        let inner = self.core.inner.lock();
        let &frame_id = inner.page_table.get(&page_id)?;
        Some(self.core.frames[frame_id].pin_count.load(Ordering::Acquire))
    }

    fn lookup_or_load(&self, page_id: PageId) -> Option<Fetched> {
        match self.acquire_frame(page_id, LoadKind::FromDisk)? {
            (frame_id, Some(latch)) => Some(Fetched::Loaded(frame_id, latch)),
            (frame_id, None) => Some(Fetched::Hit(frame_id)),
        }
    }

    /// The shared hit/miss helper. On a hit, pins the resident frame and
    /// returns it without a latch (the caller picks read or write). On a
    /// miss, loads the page into a frame and returns the write latch held
    /// during the load.
    fn acquire_frame(
        &self,
        page_id: PageId,
        kind: LoadKind,
    ) -> Option<(FrameId, Option<FrameWriteLatch>)> {
        let core = &self.core;
        loop {
            let mut inner = core.inner.lock();

            // A previous owner of this page id may still be writing its
            // bytes back to disk; reading now would race that write.
            while inner.writing_back.contains(&page_id) {
                core.writeback_done.wait(&mut inner);
            }

            if let Some(&frame_id) = inner.page_table.get(&page_id) {
                core.pin_locked(frame_id);
                return Some((frame_id, None));
            }

            let frame_id = match inner.free_list.pop() {
                Some(frame_id) => frame_id,
                None => core.replacer.evict()?,
            };
            let victim_pid = inner.frame_page[frame_id];
            let victim_dirty = core.frames[frame_id].is_dirty.load(Ordering::Acquire);
            if victim_pid != INVALID_PAGE_ID {
                inner.page_table.remove(&victim_pid);
                inner.frame_page[frame_id] = INVALID_PAGE_ID;
                if victim_dirty {
                    inner.writing_back.insert(victim_pid);
                }
            }
            core.frames[frame_id].pin_count.fetch_add(1, Ordering::AcqRel);
            drop(inner);

            // The victim had no pins and is unmapped, so this cannot block.
            let mut latch = core.frames[frame_id].data.write_arc();

            if victim_pid != INVALID_PAGE_ID && victim_dirty {
                let copy: PageBuf = Box::new(**latch);
                core.frames[frame_id].is_dirty.store(false, Ordering::Release);
                if let Err(err) = core.write_back(victim_pid, copy) {
                    log::warn!("write-back of evicted page {victim_pid} failed: {err:#}");
                    // The victim's bytes are lost to disk but the fetch can
                    // still proceed; durability here is best-effort by design
                    // of the flush-based persistence model.
                }
            }

            match kind {
                LoadKind::Zero => latch.fill(0),
                LoadKind::FromDisk => {
                    match core.scheduler.read(page_id).and_then(|c| c.wait()) {
                        Ok(buf) => **latch = *buf,
                        Err(err) => {
                            log::warn!("disk read of page {page_id} failed: {err:#}");
                            drop(latch);
                            let mut inner = core.inner.lock();
                            inner.free_list.push(frame_id);
                            core.frames[frame_id].pin_count.fetch_sub(1, Ordering::AcqRel);
                            return None;
                        }
                    }
                }
            }

            let mut inner = core.inner.lock();
            if inner.page_table.contains_key(&page_id) {
                // Lost the race to another loader: hand the frame back and
                // retry; the next pass will hit.
                inner.free_list.push(frame_id);
                core.frames[frame_id].pin_count.fetch_sub(1, Ordering::AcqRel);
                drop(inner);
                drop(latch);
                continue;
            }
            inner.page_table.insert(page_id, frame_id);
            inner.frame_page[frame_id] = page_id;
            core.replacer.record_access(frame_id, AccessType::Lookup);
            core.replacer.set_evictable(frame_id, false);
            return Some((frame_id, Some(latch)));
        }
    }
}

enum Fetched {
    Hit(FrameId),
    Loaded(FrameId, FrameWriteLatch),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(frames: usize) -> (tempfile::TempDir, BufferPoolManager) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        (dir, BufferPoolManager::new(frames, 2, disk))
    }

    #[test]
    fn new_page_allocates_monotonic_ids() {
        let (_dir, bpm) = pool(4);
        let a = bpm.new_page();
        let b = bpm.new_page();
        let c = bpm.new_page();
        assert!(a < b && b < c);
    }

    #[test]
    fn written_bytes_survive_eviction() {
        let (_dir, bpm) = pool(2);
        let pid = bpm.new_page();

        {
            let mut guard = bpm.checked_write_page(pid).unwrap();
            guard.data_mut()[0] = 0xEE;
        }

        // Thrash the two frames so pid is evicted and written back.
        for _ in 0..4 {
            let other = bpm.new_page();
            let _g = bpm.checked_read_page(other).unwrap();
        }

        let guard = bpm.checked_read_page(pid).unwrap();
        assert_eq!(guard.data()[0], 0xEE);
    }

    #[test]
    fn pool_exhaustion_returns_invalid_and_none() {
        let (_dir, bpm) = pool(3);
        let a = bpm.new_page();
        let b = bpm.new_page();
        let c = bpm.new_page();

        let ga = bpm.checked_write_page(a).unwrap();
        let gb = bpm.checked_write_page(b).unwrap();
        let gc = bpm.checked_write_page(c).unwrap();

        assert_eq!(bpm.new_page(), INVALID_PAGE_ID);
        assert!(bpm.checked_read_page(a.wrapping_add(100)).is_none());

        drop(ga);
        let d = bpm.new_page();
        assert_ne!(d, INVALID_PAGE_ID);

        drop(gb);
        drop(gc);
        // `a` was evicted for `d`; fetching it again reads the flushed bytes.
        let guard = bpm.checked_read_page(a).unwrap();
        assert_eq!(guard.page_id(), a);
    }

    #[test]
    fn pin_count_follows_guard_lifetimes() {
        let (_dir, bpm) = pool(4);
        let pid = bpm.new_page();
        assert_eq!(bpm.pin_count(pid), Some(0));

        let r1 = bpm.checked_read_page(pid).unwrap();
        let r2 = bpm.checked_read_page(pid).unwrap();
        assert_eq!(bpm.pin_count(pid), Some(2));

        drop(r1);
        assert_eq!(bpm.pin_count(pid), Some(1));
        drop(r2);
        assert_eq!(bpm.pin_count(pid), Some(0));
    }

    #[test]
    fn delete_page_refuses_pinned_pages() {
        let (_dir, bpm) = pool(4);
        let pid = bpm.new_page();

        let guard = bpm.checked_read_page(pid).unwrap();
        assert!(!bpm.delete_page(pid));
        drop(guard);

        assert!(bpm.delete_page(pid));
        // Not resident anymore: delete is a no-op success.
        assert!(bpm.delete_page(pid));
        assert_eq!(bpm.pin_count(pid), None);
    }

    #[test]
    fn flush_page_clears_dirty_state() {
        let (_dir, bpm) = pool(4);
        let pid = bpm.new_page();
        {
            let mut guard = bpm.checked_write_page(pid).unwrap();
            guard.data_mut()[10] = 0x77;
        }
        assert!(bpm.flush_page(pid));
        assert!(!bpm.flush_page(INVALID_PAGE_ID - 1));
    }

    #[test]
    fn page_table_matches_frame_contents_after_churn() {
        let (_dir, bpm) = pool(3);
        let pids: Vec<PageId> = (0..10).map(|_| bpm.new_page()).collect();

        for (i, &pid) in pids.iter().enumerate() {
            let mut guard = bpm.checked_write_page(pid).unwrap();
            guard.data_mut()[0] = i as u8;
        }
        for (i, &pid) in pids.iter().enumerate() {
            let guard = bpm.checked_read_page(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8, "page {pid} corrupted");
        }
    }

    #[test]
    fn concurrent_readers_and_writers_keep_pages_consistent() {
        let (_dir, bpm) = pool(8);
        let pids: Vec<PageId> = (0..16).map(|_| bpm.new_page()).collect();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bpm = bpm.clone();
                let pids = pids.clone();
                std::thread::spawn(move || {
                    for round in 0..50 {
                        for &pid in &pids {
                            if (round + t) % 2 == 0 {
                                let mut g = bpm.checked_write_page(pid).unwrap();
                                let v = g.data()[0].wrapping_add(1);
                                g.data_mut()[0] = v;
                                g.data_mut()[1] = v;
                            } else {
                                let g = bpm.checked_read_page(pid).unwrap();
                                assert_eq!(g.data()[0], g.data()[1], "torn page observed");
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // 4 threads * 50 rounds, half of them writes.
        let total: u32 = pids
            .iter()
            .map(|&pid| bpm.checked_read_page(pid).unwrap().data()[0] as u32)
            .sum();
        assert_eq!(total, (4 * 25 % 256) * pids.len() as u32);
    }
}
