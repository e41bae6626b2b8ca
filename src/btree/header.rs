//! # B+Tree Header Page
//!
//! A one-field page holding the tree's `root_page_id` at offset 0. The
//! header exists so the root can move (root split, root shrink) without
//! the tree's owner ever learning a new page id: every descent starts by
//! latching the header, and any operation that may move the root keeps the
//! header's write guard until the new root is installed.

use super::keys::{read_at, write_at};
use crate::config::{PageId, INVALID_PAGE_ID};

pub fn root_page_id(data: &[u8]) -> PageId {
    read_at::<PageId>(data, 0)
}

pub fn set_root_page_id(data: &mut [u8], root: PageId) {
    write_at::<PageId>(data, 0, root);
}

/// Formats a header for an empty tree.
pub fn init(data: &mut [u8]) {
    set_root_page_id(data, INVALID_PAGE_ID);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    #[test]
    fn root_round_trips() {
        let mut data = vec![0u8; PAGE_SIZE];
        init(&mut data);
        assert_eq!(root_page_id(&data), INVALID_PAGE_ID);

        set_root_page_id(&mut data, 17);
        assert_eq!(root_page_id(&data), 17);
    }
}
