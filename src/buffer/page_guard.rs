//! # Page Guards
//!
//! Scoped access to a frame's bytes. A guard owns three things at once: a
//! pin on the frame (taken by the pool before the guard exists), the
//! frame's reader or writer latch, and a handle back to the pool so the
//! drop can restore the pin/evictable bookkeeping.
//!
//! ```text
//! ReadPageGuard            WritePageGuard
//! ├── shared frame latch   ├── exclusive frame latch
//! ├── pin (shared)         ├── pin (shared)
//! └── data(): &[u8]        ├── data_mut(): &mut [u8]
//!                          └── frame marked dirty at construction
//! ```
//!
//! ## Drop Protocol
//!
//! Dropping a guard releases the frame latch first, then — under the pool
//! latch — decrements the pin count and marks the frame evictable when the
//! last pin leaves. Rust's move semantics stand in for the invalidation
//! dance a manually managed guard would need: a moved-from guard no longer
//! exists, so double-drop cannot happen by construction.
//!
//! Only the buffer pool constructs guards; there is no "empty" guard state
//! to misuse.

use std::sync::Arc;

use crate::config::{FrameId, PageId};
use crate::storage::PageBuf;

use super::pool::PoolCore;

pub(crate) type FrameReadLatch =
    parking_lot::lock_api::ArcRwLockReadGuard<parking_lot::RawRwLock, PageBuf>;
pub(crate) type FrameWriteLatch =
    parking_lot::lock_api::ArcRwLockWriteGuard<parking_lot::RawRwLock, PageBuf>;

/// Shared access to one resident page.
pub struct ReadPageGuard {
    core: Arc<PoolCore>,
    page_id: PageId,
    frame_id: FrameId,
    latch: Option<FrameReadLatch>,
}

impl ReadPageGuard {
    pub(crate) fn new(
        core: Arc<PoolCore>,
        page_id: PageId,
        frame_id: FrameId,
        latch: FrameReadLatch,
    ) -> Self {
        Self {
            core,
            page_id,
            frame_id,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        self.latch
            .as_deref()
            .expect("guard latch present until drop")
            .as_slice()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch released before the pool bookkeeping runs; evictability is
        // only published once nothing holds the frame.
        self.latch.take();
        self.core.unpin(self.frame_id);
    }
}

impl std::fmt::Debug for ReadPageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

/// Exclusive access to one resident page. The frame is marked dirty when the
/// guard is constructed, so take one only to mutate.
pub struct WritePageGuard {
    core: Arc<PoolCore>,
    page_id: PageId,
    frame_id: FrameId,
    latch: Option<FrameWriteLatch>,
}

impl WritePageGuard {
    pub(crate) fn new(
        core: Arc<PoolCore>,
        page_id: PageId,
        frame_id: FrameId,
        latch: FrameWriteLatch,
    ) -> Self {
        Self {
            core,
            page_id,
            frame_id,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        self.latch
            .as_deref()
            .expect("guard latch present until drop")
            .as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.latch
            .as_deref_mut()
            .expect("guard latch present until drop")
            .as_mut_slice()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.latch.take();
        self.core.unpin(self.frame_id);
    }
}

impl std::fmt::Debug for WritePageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}
