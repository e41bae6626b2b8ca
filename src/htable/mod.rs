//! # Extendible Hash Index
//!
//! Disk-backed unordered unique-key index. Three page levels — header,
//! directory, bucket — with depth-based split and merge; see [`table`] for
//! the algorithms and latching, and the sibling modules for the page
//! layouts.

mod bucket;
mod directory;
mod header;
mod table;

pub use table::{DefaultKeyHash, DiskHashTable, HashKey, KeyHash};
