//! # Disk Manager
//!
//! Owns the single backing file and performs page-granular positional I/O.
//! All pages live in one file at offset `page_id * PAGE_SIZE`; the file is
//! grown in `DISK_GROW_PAGES` increments the first time a write lands past
//! the current capacity, so sequential allocation does not trigger a
//! `set_len` per page.
//!
//! ## Read Semantics
//!
//! A page id that has been allocated but never written maps to a region the
//! file may not cover yet. Reads zero-fill past EOF instead of failing, so
//! freshly allocated pages always read back as the zero page.
//!
//! ## Thread Safety
//!
//! `DiskManager` takes `&mut self` for every operation. The disk scheduler
//! owns it exclusively on the worker thread; `flush`-type callers go through
//! the scheduler rather than touching the file directly.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

use crate::config::{PageId, DISK_GROW_PAGES, PAGE_SIZE};

/// A heap-allocated page-sized buffer. Boxed so moving one between threads
/// (through the disk scheduler) moves a pointer, not 4 KiB.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Returns a zeroed page buffer.
pub fn zeroed_page() -> PageBuf {
    Box::new([0u8; PAGE_SIZE])
}

#[derive(Debug)]
pub struct DiskManager {
    file: File,
    path: PathBuf,
    capacity_pages: u64,
}

impl DiskManager {
    /// Opens (or creates) the backing file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err("failed to stat database file")?
            .len();

        Ok(Self {
            file,
            path,
            capacity_pages: len / PAGE_SIZE as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of whole pages the file currently covers.
    pub fn capacity_pages(&self) -> u64 {
        self.capacity_pages
    }

    /// Reads page `page_id` into `buf`, zero-filling any part the file does
    /// not cover yet.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "read buffer is {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let file_len = self.capacity_pages * PAGE_SIZE as u64;

        if offset >= file_len {
            buf.fill(0);
            return Ok(());
        }

        let available = ((file_len - offset) as usize).min(PAGE_SIZE);
        self.file
            .read_exact_at(&mut buf[..available], offset)
            .wrap_err_with(|| format!("failed to read page {page_id}"))?;
        buf[available..].fill(0);
        Ok(())
    }

    /// Writes page `page_id` from `buf`, growing the file first if needed.
    pub fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "write buffer is {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );

        if page_id as u64 >= self.capacity_pages {
            self.grow_to(page_id as u64 + 1)?;
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file
            .write_all_at(buf, offset)
            .wrap_err_with(|| format!("failed to write page {page_id}"))
    }

    /// Flushes file contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data().wrap_err("fsync failed")
    }

    fn grow_to(&mut self, min_pages: u64) -> Result<()> {
        let new_capacity = min_pages.div_ceil(DISK_GROW_PAGES) * DISK_GROW_PAGES;
        self.file
            .set_len(new_capacity * PAGE_SIZE as u64)
            .wrap_err_with(|| format!("failed to grow database file to {new_capacity} pages"))?;
        self.capacity_pages = new_capacity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_of_unwritten_page_is_zeroed() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut buf = [0xFFu8; PAGE_SIZE];
        dm.read_page(42, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        dm.write_page(7, &page).unwrap();

        let mut back = [0u8; PAGE_SIZE];
        dm.read_page(7, &mut back).unwrap();
        assert_eq!(back[0], 0xAB);
        assert_eq!(back[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn file_grows_in_fixed_increments() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let page = [0u8; PAGE_SIZE];
        dm.write_page(0, &page).unwrap();
        assert_eq!(dm.capacity_pages(), DISK_GROW_PAGES);

        dm.write_page(DISK_GROW_PAGES as PageId, &page).unwrap();
        assert_eq!(dm.capacity_pages(), 2 * DISK_GROW_PAGES);
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::open(&path).unwrap();
            let mut page = [0u8; PAGE_SIZE];
            page[100] = 0x42;
            dm.write_page(3, &page).unwrap();
            dm.sync().unwrap();
        }

        let mut dm = DiskManager::open(&path).unwrap();
        let mut back = [0u8; PAGE_SIZE];
        dm.read_page(3, &mut back).unwrap();
        assert_eq!(back[100], 0x42);
    }
}
