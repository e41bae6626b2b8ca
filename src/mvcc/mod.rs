//! # Multi-Version Concurrency Control
//!
//! Snapshot isolation over the table heap. Readers never block: each
//! transaction reads the newest version committed at or below its
//! snapshot, rebuilt from undo deltas when the base tuple is newer.
//! Writers stamp tuples with a temporary timestamp and push undo logs
//! onto per-RID version chains; commit rewrites the stamps, abort
//! restores the pre-images.
//!
//! ```text
//! begin ──► Running ──commit──► Committed (stamps become commit_ts)
//!              │  ╲
//!              │   ╲ conflict
//!           abort   ▼
//!              │  Tainted ──abort──► Aborted (pre-images restored)
//!              ▼
//!           Aborted
//! ```
//!
//! Pieces: [`Transaction`] (snapshot, write set, undo buffer),
//! [`TransactionManager`] (timestamps, chain heads, commit/abort, GC),
//! [`Watermark`] (oldest active snapshot), and the version-chain
//! read-side in [`version`].

mod manager;
mod transaction;
pub mod version;
mod watermark;

pub use manager::TransactionManager;
pub use transaction::{IsolationLevel, Transaction, TransactionState, UndoLink, UndoLog};
pub use watermark::Watermark;
