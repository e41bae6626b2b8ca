//! # LRU-K Replacer
//!
//! Picks eviction victims by **backward K-distance**: the elapsed logical
//! time since a frame's K-th most recent access. A frame with fewer than K
//! recorded accesses has infinite distance and is preferred; ties among
//! infinite-distance frames fall back to classic LRU on the earliest
//! recorded access.
//!
//! ## Why Not Plain LRU?
//!
//! A sequential scan touches every page exactly once. Under LRU each page
//! it reads becomes most-recently-used and pushes out the working set.
//! LRU-K keeps a page "hot" only after it has been touched K times, so
//! scan pages (one access, infinite distance) are evicted first.
//!
//! ## State Machine
//!
//! Frames enter the replacer on their first `record_access` and start
//! **non-evictable** — the buffer pool flips them evictable only once the
//! pin count reaches zero. `evict` considers evictable frames only and
//! forgets the victim entirely; `remove` forgets a frame without the
//! distance ceremony (page deletion).
//!
//! ## Concurrency
//!
//! Every operation serializes on one internal mutex. The buffer pool calls
//! in while holding its own latch; the replacer never calls out, so the
//! lock order is trivially acyclic.

use std::collections::VecDeque;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::FrameId;

#[derive(Debug)]
struct FrameHistory {
    /// Most recent access last. Capped at K entries.
    history: VecDeque<u64>,
    evictable: bool,
}

#[derive(Debug)]
struct ReplacerInner {
    frames: HashMap<FrameId, FrameHistory>,
    current_timestamp: u64,
    evictable_count: usize,
}

#[derive(Debug)]
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
    capacity: usize,
    k: usize,
}

/// How a frame was touched. Recorded for symmetry with the access paths;
/// the distance computation treats all types alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Lookup,
    Scan,
}

impl LruKReplacer {
    /// Creates a replacer tracking up to `capacity` frames with parameter `k`.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            inner: Mutex::new(ReplacerInner {
                frames: HashMap::with_capacity(capacity),
                current_timestamp: 0,
                evictable_count: 0,
            }),
            capacity,
            k,
        }
    }

    /// Records an access to `frame_id` at the next logical timestamp.
    ///
    /// Panics if `frame_id` is out of range; that is a programmer error, not
    /// a recoverable condition.
    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        assert!(
            frame_id < self.capacity,
            "frame id {frame_id} out of range (capacity {})",
            self.capacity
        );

        let mut inner = self.inner.lock();
        let now = inner.current_timestamp;
        inner.current_timestamp += 1;

        let entry = inner.frames.entry(frame_id).or_insert_with(|| FrameHistory {
            history: VecDeque::with_capacity(self.k),
            evictable: false,
        });
        if entry.history.len() == self.k {
            entry.history.pop_front();
        }
        entry.history.push_back(now);
    }

    /// Flags `frame_id` as evictable or pinned. Unknown frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.frames.get_mut(&frame_id) {
            if entry.evictable != evictable {
                entry.evictable = evictable;
                if evictable {
                    inner.evictable_count += 1;
                } else {
                    inner.evictable_count -= 1;
                }
            }
        }
    }

    /// Forgets `frame_id` entirely. No-op for unknown frames.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.frames.remove(&frame_id) {
            if entry.evictable {
                inner.evictable_count -= 1;
            }
        }
    }

    /// Evicts the evictable frame with the largest backward K-distance and
    /// forgets it. Among frames with fewer than K accesses (distance
    /// +infinity) the one with the earliest recorded access wins.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        let mut victim: Option<FrameId> = None;
        // (has_infinite_distance, ordering key): +inf candidates compare by
        // earliest first access, finite ones by k-th most recent access.
        let mut best: Option<(bool, u64)> = None;

        for (&frame_id, entry) in inner.frames.iter() {
            if !entry.evictable {
                continue;
            }
            let candidate = if entry.history.len() < self.k {
                (true, *entry.history.front().expect("recorded frame has history"))
            } else {
                (false, *entry.history.front().expect("recorded frame has history"))
            };
            let better = match best {
                None => true,
                // An infinite distance beats any finite one; within a class,
                // the older timestamp (smaller) wins.
                Some((best_inf, best_ts)) => match (candidate.0, best_inf) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => candidate.1 < best_ts,
                },
            };
            if better {
                best = Some(candidate);
                victim = Some(frame_id);
            }
        }

        if let Some(frame_id) = victim {
            inner.frames.remove(&frame_id);
            inner.evictable_count -= 1;
        }
        victim
    }

    /// Number of frames currently evictable.
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}
