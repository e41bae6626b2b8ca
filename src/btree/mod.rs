//! # B+Tree Index
//!
//! Ordered key→value index over buffer-pool pages with latch-coupled
//! concurrent access. See [`tree`] for the concurrency protocol and the
//! structural operations, [`leaf`]/[`interior`] for the page layouts.
//!
//! ```text
//!              [Header: root_page_id]
//!                       │
//!              [Interior  (5 | 9)]
//!              /        │        \
//!     [Leaf 1..4] → [Leaf 5..8] → [Leaf 9..12]   (next_page_id chain)
//! ```

mod header;
mod interior;
mod iterator;
pub(crate) mod keys;
mod leaf;
mod tree;

pub use iterator::BPlusTreeIter;
pub use keys::{IndexKey, IndexValue};
pub use tree::BPlusTree;
