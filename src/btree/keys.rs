//! # Index Key and Value Bounds
//!
//! B+tree and hash-index pages store keys and values as raw little-endian
//! bytes at computed offsets. The bounds below say exactly what a type
//! needs for that to be safe: a fixed zerocopy layout, `Copy` (accessors
//! copy values out rather than reference into the page, so alignment never
//! matters), and enough of an ordering/equality story for the structure
//! using it.
//!
//! Primitive integers and [`Rid`](crate::table::Rid) satisfy these out of
//! the box; composite keys only need the zerocopy derives plus `Ord`.

use std::fmt::Debug;

use zerocopy::{FromBytes, Immutable, IntoBytes};

/// An ordered index key.
pub trait IndexKey:
    Ord + Copy + Debug + FromBytes + IntoBytes + Immutable + Send + Sync + 'static
{
}

impl<T> IndexKey for T where
    T: Ord + Copy + Debug + FromBytes + IntoBytes + Immutable + Send + Sync + 'static
{
}

/// A payload stored next to a key.
pub trait IndexValue:
    PartialEq + Copy + Debug + FromBytes + IntoBytes + Immutable + Send + Sync + 'static
{
}

impl<T> IndexValue for T where
    T: PartialEq + Copy + Debug + FromBytes + IntoBytes + Immutable + Send + Sync + 'static
{
}

/// Reads a `T` stored at `offset`.
pub(crate) fn read_at<T: FromBytes + Copy>(data: &[u8], offset: usize) -> T {
    T::read_from_bytes(&data[offset..offset + size_of::<T>()]).expect("sized read")
}

/// Writes `value` at `offset`.
pub(crate) fn write_at<T: IntoBytes + Immutable>(data: &mut [u8], offset: usize, value: T) {
    data[offset..offset + size_of::<T>()].copy_from_slice(value.as_bytes());
}
