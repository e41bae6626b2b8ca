//! # Table Heap
//!
//! A table's tuples live in a singly linked list of slotted pages. The heap
//! is append-only at the page level: inserts go to the last page, a full
//! last page links a fresh one, and RIDs handed out are stable forever
//! (deletion is a tombstone in the slot metadata).
//!
//! ```text
//! first_page ──► page ──► page ──► last_page
//!                 │ slots: (meta, bytes)
//!                 ▼
//!            Rid = (page_id, slot)
//! ```
//!
//! ## Concurrency
//!
//! Readers fetch pages through read guards and never block appenders except
//! at the frame latch. Appends serialize on a last-page mutex so two
//! inserts cannot both decide to extend the chain. Metadata updates take
//! the page's write guard only.

use parking_lot::Mutex;

use eyre::{ensure, eyre, Result};

use super::page::{TablePage, TablePageMut, MAX_TUPLE_SIZE};
use super::tuple::{Rid, Tuple, TupleMeta};
use crate::buffer::BufferPoolManager;
use crate::config::{PageId, INVALID_PAGE_ID};

pub struct TableHeap {
    bpm: BufferPoolManager,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Creates an empty heap with one formatted page.
    pub fn new(bpm: BufferPoolManager) -> Result<Self> {
        let first_page_id = bpm.new_page();
        ensure!(
            first_page_id != INVALID_PAGE_ID,
            "buffer pool exhausted while creating table heap"
        );
        {
            let mut guard = bpm.write_page(first_page_id)?;
            TablePageMut::init(guard.data_mut());
        }
        Ok(Self {
            bpm,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a tuple, extending the page chain when the last page is
    /// full. Returns the new tuple's RID.
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: &Tuple) -> Result<Rid> {
        ensure!(
            tuple.len() <= MAX_TUPLE_SIZE,
            "tuple of {} bytes exceeds page capacity {}",
            tuple.len(),
            MAX_TUPLE_SIZE
        );

        let mut last = self.last_page_id.lock();
        let mut guard = self.bpm.write_page(*last)?;
        let mut page = TablePageMut::from_page(guard.data_mut());

        if let Some(slot) = page.insert_tuple(meta, tuple) {
            return Ok(Rid::new(*last, slot));
        }

        // Last page is full: chain a fresh one while still holding its
        // write guard, so no reader can see a dangling next pointer.
        let new_page_id = self.bpm.new_page();
        ensure!(
            new_page_id != INVALID_PAGE_ID,
            "buffer pool exhausted while growing table heap"
        );
        page.set_next_page_id(new_page_id);
        drop(guard);

        let mut guard = self.bpm.write_page(new_page_id)?;
        let mut page = TablePageMut::init(guard.data_mut());
        let slot = page
            .insert_tuple(meta, tuple)
            .ok_or_else(|| eyre!("tuple does not fit in an empty page"))?;
        *last = new_page_id;
        Ok(Rid::new(new_page_id, slot))
    }

    pub fn tuple(&self, rid: Rid) -> Result<(TupleMeta, Tuple)> {
        let guard = self.bpm.read_page(rid.page_id)?;
        TablePage::from_page(guard.data()).tuple(rid.slot)
    }

    pub fn tuple_meta(&self, rid: Rid) -> Result<TupleMeta> {
        let guard = self.bpm.read_page(rid.page_id)?;
        TablePage::from_page(guard.data()).meta(rid.slot)
    }

    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> Result<()> {
        let mut guard = self.bpm.write_page(rid.page_id)?;
        TablePageMut::from_page(guard.data_mut()).update_meta(rid.slot, meta)
    }

    /// Rewrites a tuple's bytes and metadata in place (MVCC update path).
    /// The payload may shrink but never grow.
    pub fn update_tuple_in_place(&self, meta: TupleMeta, tuple: &Tuple, rid: Rid) -> Result<()> {
        let mut guard = self.bpm.write_page(rid.page_id)?;
        TablePageMut::from_page(guard.data_mut()).update_tuple_in_place(rid.slot, meta, tuple)
    }

    /// Snapshot of every RID currently in the heap, in chain order. The
    /// sequential scan takes this at `init`; tuples appended afterwards are
    /// not part of the scan.
    pub fn scan_rids(&self) -> Result<Vec<Rid>> {
        let mut rids = Vec::new();
        let mut page_id = self.first_page_id;
        while page_id != INVALID_PAGE_ID {
            let guard = self.bpm.read_page(page_id)?;
            let page = TablePage::from_page(guard.data());
            for slot in 0..page.tuple_count() as u32 {
                rids.push(Rid::new(page_id, slot));
            }
            page_id = page.next_page_id();
        }
        Ok(rids)
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.bpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn heap() -> (tempfile::TempDir, TableHeap) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(8, 2, disk);
        let heap = TableHeap::new(bpm).unwrap();
        (dir, heap)
    }

    fn bytes(n: u8, len: usize) -> Tuple {
        Tuple::from_bytes(vec![n; len])
    }

    #[test]
    fn insert_and_fetch_round_trips() {
        let (_dir, heap) = heap();
        let rid = heap.insert_tuple(TupleMeta::new(3, false), &bytes(7, 10)).unwrap();

        let (meta, tuple) = heap.tuple(rid).unwrap();
        assert_eq!(meta, TupleMeta::new(3, false));
        assert_eq!(tuple.data(), &[7u8; 10][..]);
    }

    #[test]
    fn heap_grows_across_pages() {
        let (_dir, heap) = heap();

        let mut rids = Vec::new();
        for i in 0..40u8 {
            rids.push(heap.insert_tuple(TupleMeta::new(0, false), &bytes(i, 300)).unwrap());
        }
        let distinct_pages: std::collections::HashSet<_> =
            rids.iter().map(|r| r.page_id).collect();
        assert!(distinct_pages.len() > 1, "expected multi-page heap");

        for (i, rid) in rids.iter().enumerate() {
            let (_, t) = heap.tuple(*rid).unwrap();
            assert_eq!(t.data()[0], i as u8);
        }
        assert_eq!(heap.scan_rids().unwrap(), rids);
    }

    #[test]
    fn meta_updates_are_visible() {
        let (_dir, heap) = heap();
        let rid = heap.insert_tuple(TupleMeta::new(1, false), &bytes(1, 8)).unwrap();

        heap.update_tuple_meta(TupleMeta::new(9, true), rid).unwrap();
        assert_eq!(heap.tuple_meta(rid).unwrap(), TupleMeta::new(9, true));
    }

    #[test]
    fn in_place_update_rewrites_bytes() {
        let (_dir, heap) = heap();
        let rid = heap.insert_tuple(TupleMeta::new(1, false), &bytes(1, 8)).unwrap();

        heap.update_tuple_in_place(TupleMeta::new(2, false), &bytes(9, 8), rid)
            .unwrap();
        let (meta, tuple) = heap.tuple(rid).unwrap();
        assert_eq!(meta.ts, 2);
        assert_eq!(tuple.data(), &[9u8; 8][..]);
    }

    #[test]
    fn concurrent_appends_do_not_lose_tuples() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(16, 2, disk);
        let heap = std::sync::Arc::new(TableHeap::new(bpm).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let heap = std::sync::Arc::clone(&heap);
                std::thread::spawn(move || {
                    for i in 0..100u8 {
                        heap.insert_tuple(TupleMeta::new(t as u64, false), &bytes(i, 64))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(heap.scan_rids().unwrap().len(), 400);
    }
}
