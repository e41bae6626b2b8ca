//! # Storage Layer
//!
//! The foundation the buffer pool sits on: a single backing file of 4 KiB
//! pages ([`DiskManager`]) and a background worker that serializes all page
//! I/O ([`DiskScheduler`]).
//!
//! ```text
//! buffer pool ──► DiskScheduler ──► worker thread ──► DiskManager ──► file
//! ```
//!
//! Nothing above this layer touches the file directly; every read and write
//! flows through the scheduler so I/O ordering has a single authority.

mod disk_manager;
mod disk_scheduler;

pub use disk_manager::{zeroed_page, DiskManager, PageBuf};
pub use disk_scheduler::{Completion, DiskRequest, DiskScheduler};
