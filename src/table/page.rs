//! # Slotted Table Pages
//!
//! The on-disk layout of one table heap page. Slots grow down from the
//! header; tuple bytes grow up from the end of the page:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  --------------------------------------------
//! 0       4     next_page_id   (LE, INVALID_PAGE_ID at tail)
//! 4       2     tuple_count
//! 6       2     deleted_count
//! 8       16*N  slot array: (offset, size, ts, flags) per slot
//! ...           free space
//! ...           tuple bytes, packed toward PAGE_SIZE
//! ```
//!
//! Slots are append-only: deletion is a tombstone flag in the slot's
//! metadata, never a compaction, so RIDs stay stable for the version
//! chains built above this layer.
//!
//! All multi-byte fields are explicit little-endian via zerocopy's
//! byteorder types, so the accessors work at any alignment.

use eyre::{ensure, Result};
use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::tuple::{Tuple, TupleMeta};
use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

pub const TABLE_PAGE_HEADER_SIZE: usize = 8;
pub const SLOT_SIZE: usize = 16;

/// Largest tuple a single page can hold.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - TABLE_PAGE_HEADER_SIZE - SLOT_SIZE;

const FLAG_DELETED: u8 = 0x01;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct PageHeader {
    next_page_id: U32,
    tuple_count: U16,
    deleted_count: U16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct Slot {
    offset: U16,
    size: U16,
    ts: U64,
    flags: u8,
    _pad: [u8; 3],
}

impl Slot {
    fn meta(&self) -> TupleMeta {
        TupleMeta::new(self.ts.get(), self.flags & FLAG_DELETED != 0)
    }

    fn set_meta(&mut self, meta: TupleMeta) {
        self.ts.set(meta.ts);
        if meta.is_deleted {
            self.flags |= FLAG_DELETED;
        } else {
            self.flags &= !FLAG_DELETED;
        }
    }
}

fn header(data: &[u8]) -> PageHeader {
    PageHeader::read_from_bytes(&data[..TABLE_PAGE_HEADER_SIZE]).expect("header size is fixed")
}

fn write_header(data: &mut [u8], h: PageHeader) {
    data[..TABLE_PAGE_HEADER_SIZE].copy_from_slice(h.as_bytes());
}

fn slot_range(idx: usize) -> std::ops::Range<usize> {
    let start = TABLE_PAGE_HEADER_SIZE + idx * SLOT_SIZE;
    start..start + SLOT_SIZE
}

fn read_slot(data: &[u8], idx: usize) -> Slot {
    Slot::read_from_bytes(&data[slot_range(idx)]).expect("slot size is fixed")
}

fn write_slot(data: &mut [u8], idx: usize, slot: Slot) {
    data[slot_range(idx)].copy_from_slice(slot.as_bytes());
}

/// Read-only view over a table page's bytes.
pub struct TablePage<'a> {
    data: &'a [u8],
}

impl<'a> TablePage<'a> {
    pub fn from_page(data: &'a [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn next_page_id(&self) -> PageId {
        header(self.data).next_page_id.get()
    }

    pub fn tuple_count(&self) -> usize {
        header(self.data).tuple_count.get() as usize
    }

    pub fn deleted_count(&self) -> usize {
        header(self.data).deleted_count.get() as usize
    }

    pub fn meta(&self, slot: u32) -> Result<TupleMeta> {
        self.check_slot(slot)?;
        Ok(read_slot(self.data, slot as usize).meta())
    }

    pub fn tuple(&self, slot: u32) -> Result<(TupleMeta, Tuple)> {
        self.check_slot(slot)?;
        let s = read_slot(self.data, slot as usize);
        let start = s.offset.get() as usize;
        let end = start + s.size.get() as usize;
        ensure!(end <= PAGE_SIZE, "slot {slot} points past the page end");
        Ok((s.meta(), Tuple::from_bytes(self.data[start..end].to_vec())))
    }

    fn check_slot(&self, slot: u32) -> Result<()> {
        ensure!(
            (slot as usize) < self.tuple_count(),
            "slot {slot} out of range (page has {})",
            self.tuple_count()
        );
        Ok(())
    }
}

/// Mutable view over a table page's bytes.
pub struct TablePageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePageMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    /// Formats an empty page.
    pub fn init(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        write_header(
            data,
            PageHeader {
                next_page_id: U32::new(INVALID_PAGE_ID),
                tuple_count: U16::new(0),
                deleted_count: U16::new(0),
            },
        );
        Self { data }
    }

    pub fn as_read(&self) -> TablePage<'_> {
        TablePage { data: self.data }
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        let mut h = header(self.data);
        h.next_page_id.set(next);
        write_header(self.data, h);
    }

    /// Byte offset where the next tuple's data would start, growing down.
    fn data_floor(&self) -> usize {
        let count = self.as_read().tuple_count();
        if count == 0 {
            PAGE_SIZE
        } else {
            read_slot(self.data, count - 1).offset.get() as usize
        }
    }

    pub fn free_space(&self) -> usize {
        let count = self.as_read().tuple_count();
        let slots_end = TABLE_PAGE_HEADER_SIZE + count * SLOT_SIZE;
        self.data_floor().saturating_sub(slots_end)
    }

    /// Appends a tuple; `None` when the page lacks room for the bytes plus
    /// a slot entry.
    pub fn insert_tuple(&mut self, meta: TupleMeta, tuple: &Tuple) -> Option<u32> {
        let size = tuple.len();
        if self.free_space() < size + SLOT_SIZE {
            return None;
        }

        let mut h = header(self.data);
        let idx = h.tuple_count.get() as usize;
        let offset = self.data_floor() - size;

        self.data[offset..offset + size].copy_from_slice(tuple.data());
        let mut slot = Slot {
            offset: U16::new(offset as u16),
            size: U16::new(size as u16),
            ts: U64::new(0),
            flags: 0,
            _pad: [0; 3],
        };
        slot.set_meta(meta);
        write_slot(self.data, idx, slot);

        h.tuple_count.set(idx as u16 + 1);
        if meta.is_deleted {
            h.deleted_count.set(h.deleted_count.get() + 1);
        }
        write_header(self.data, h);
        Some(idx as u32)
    }

    pub fn update_meta(&mut self, slot: u32, meta: TupleMeta) -> Result<()> {
        self.as_read().check_slot(slot)?;
        let mut s = read_slot(self.data, slot as usize);
        let was_deleted = s.meta().is_deleted;
        s.set_meta(meta);
        write_slot(self.data, slot as usize, s);

        if was_deleted != meta.is_deleted {
            let mut h = header(self.data);
            let delta = if meta.is_deleted { 1 } else { u16::MAX };
            h.deleted_count.set(h.deleted_count.get().wrapping_add(delta));
            write_header(self.data, h);
        }
        Ok(())
    }

    /// Overwrites a tuple's bytes and metadata. The payload may shrink or
    /// grow back into the slot's slack (up to the floor of the previous
    /// slot's data); RIDs never move.
    pub fn update_tuple_in_place(&mut self, slot: u32, meta: TupleMeta, tuple: &Tuple) -> Result<()> {
        self.as_read().check_slot(slot)?;
        let s = read_slot(self.data, slot as usize);
        let ceiling = if slot == 0 {
            PAGE_SIZE
        } else {
            read_slot(self.data, slot as usize - 1).offset.get() as usize
        };
        ensure!(
            s.offset.get() as usize + tuple.len() <= ceiling,
            "in-place update grows tuple past its slot region ({} > {} bytes)",
            tuple.len(),
            ceiling - s.offset.get() as usize
        );

        let start = s.offset.get() as usize;
        self.data[start..start + tuple.len()].copy_from_slice(tuple.data());

        let mut s = s;
        s.size.set(tuple.len() as u16);
        write_slot(self.data, slot as usize, s);
        self.update_meta(slot, meta)
    }
}
