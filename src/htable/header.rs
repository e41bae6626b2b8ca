//! # Hash Table Header Page
//!
//! Top level of the extendible hash index. The header fans out to
//! directory pages by the **top** `max_depth` bits of the 32-bit hash:
//!
//! ```text
//! Offset  Size        Field
//! ------  ----------  ---------------------------
//! 0       4           max_depth
//! 4       4 * 2^max   directory_page_ids
//! ```
//!
//! A `max_depth` of zero collapses the header to a single directory slot.

use eyre::{ensure, Result};

use crate::btree::keys::{read_at, write_at};
use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

const HEADER_SIZE: usize = 4;

pub struct HeaderPage<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn from_page(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn max_depth(&self) -> u32 {
        read_at::<u32>(self.data, 0)
    }

    pub fn slot_count(&self) -> u32 {
        1 << self.max_depth()
    }

    /// Directory slot for a hash: the top `max_depth` bits.
    pub fn directory_index(&self, hash: u32) -> u32 {
        let depth = self.max_depth();
        if depth == 0 {
            0
        } else {
            hash >> (32 - depth)
        }
    }

    pub fn directory_page_id(&self, idx: u32) -> PageId {
        debug_assert!(idx < self.slot_count());
        read_at::<PageId>(self.data, HEADER_SIZE + idx as usize * 4)
    }
}

pub struct HeaderPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPageMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn init(data: &'a mut [u8], max_depth: u32) -> Result<Self> {
        let needed = HEADER_SIZE + (1usize << max_depth) * 4;
        ensure!(
            needed <= PAGE_SIZE,
            "hash header with max_depth {max_depth} does not fit a page"
        );
        write_at::<u32>(data, 0, max_depth);
        for idx in 0..(1u32 << max_depth) {
            write_at::<PageId>(data, HEADER_SIZE + idx as usize * 4, INVALID_PAGE_ID);
        }
        Ok(Self { data })
    }

    pub fn as_read(&self) -> HeaderPage<'_> {
        HeaderPage { data: self.data }
    }

    pub fn set_directory_page_id(&mut self, idx: u32, page_id: PageId) {
        debug_assert!(idx < self.as_read().slot_count());
        write_at::<PageId>(self.data, HEADER_SIZE + idx as usize * 4, page_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_index_uses_top_bits() {
        let mut data = vec![0u8; PAGE_SIZE];
        HeaderPageMut::init(&mut data, 2).unwrap();
        let header = HeaderPage::from_page(&data);

        assert_eq!(header.slot_count(), 4);
        assert_eq!(header.directory_index(0x0000_0000), 0);
        assert_eq!(header.directory_index(0x4000_0001), 1);
        assert_eq!(header.directory_index(0x8000_0000), 2);
        assert_eq!(header.directory_index(0xFFFF_FFFF), 3);
    }

    #[test]
    fn zero_depth_maps_everything_to_slot_zero() {
        let mut data = vec![0u8; PAGE_SIZE];
        HeaderPageMut::init(&mut data, 0).unwrap();
        let header = HeaderPage::from_page(&data);
        assert_eq!(header.slot_count(), 1);
        assert_eq!(header.directory_index(0xDEAD_BEEF), 0);
        assert_eq!(header.directory_page_id(0), INVALID_PAGE_ID);
    }

    #[test]
    fn slots_round_trip() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut header = HeaderPageMut::init(&mut data, 1).unwrap();
        header.set_directory_page_id(1, 33);
        assert_eq!(header.as_read().directory_page_id(1), 33);
        assert_eq!(header.as_read().directory_page_id(0), INVALID_PAGE_ID);
    }
}
