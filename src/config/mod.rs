//! Crate-wide configuration constants and core identifier types.

mod constants;

pub use constants::*;
