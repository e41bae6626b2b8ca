//! # Table Storage
//!
//! Tuples, their on-page slotted layout, and the linked-list heap that
//! owns them. Everything MVCC builds on lives here: stable RIDs, per-slot
//! `(timestamp, tombstone)` metadata, and in-place rewrite for version
//! stamping.

mod heap;
mod page;
mod tuple;

pub use heap::TableHeap;
pub use page::{TablePage, TablePageMut, MAX_TUPLE_SIZE};
pub use tuple::{Rid, Tuple, TupleMeta};
