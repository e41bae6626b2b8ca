//! # Type System
//!
//! The small value and schema model the executors evaluate over: typed
//! columns ([`Column`], [`Schema`]) and runtime values ([`Value`]) with SQL
//! NULL comparison semantics plus the total orders sorting and hashing
//! need.

mod schema;
mod value;

pub use schema::{Column, DataType, Schema, SchemaRef};
pub use value::Value;
