//! # Column and Schema Definitions
//!
//! A [`Schema`] is an ordered list of typed columns describing how a tuple's
//! bytes are laid out. The executors carry schemas by `Arc`; projections and
//! undo-log partial schemas are built by copying a column subset.
//!
//! ## Serialized Widths
//!
//! | Type    | Width on the wire                |
//! |---------|----------------------------------|
//! | Boolean | 1 byte                           |
//! | Integer | 4 bytes (LE)                     |
//! | BigInt  | 8 bytes (LE)                     |
//! | Double  | 8 bytes (LE bits)                |
//! | Varchar | 4-byte LE length + bytes         |
//!
//! `max_serialized_size` is the bound the sort executor uses for its
//! fixed-stride sort pages; for varchar columns it assumes the declared
//! maximum length.

use std::sync::Arc;

use eyre::{ensure, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Varchar,
}

impl DataType {
    /// Fixed serialized width, `None` for variable-length types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            DataType::Boolean => Some(1),
            DataType::Integer => Some(4),
            DataType::BigInt => Some(8),
            DataType::Double => Some(8),
            DataType::Varchar => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    data_type: DataType,
    /// Declared maximum byte length; only meaningful for varchar.
    length: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        debug_assert!(
            data_type != DataType::Varchar,
            "varchar columns need a declared length"
        );
        Self {
            name: name.into(),
            data_type,
            length: data_type.fixed_size().unwrap_or(0),
        }
    }

    pub fn varchar(name: impl Into<String>, max_length: usize) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Varchar,
            length: max_length,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Upper bound on this column's serialized width.
    pub fn max_serialized_size(&self) -> usize {
        match self.data_type.fixed_size() {
            Some(n) => n,
            None => 4 + self.length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| eyre::eyre!("no column named '{name}'"))
    }

    /// Builds the schema containing exactly the columns whose flag is set,
    /// in declaration order. Used for undo-log partial tuples.
    pub fn project(&self, included: &[bool]) -> Result<Schema> {
        ensure!(
            included.len() == self.columns.len(),
            "projection mask has {} entries for {} columns",
            included.len(),
            self.columns.len()
        );
        let columns = self
            .columns
            .iter()
            .zip(included)
            .filter(|(_, &keep)| keep)
            .map(|(c, _)| c.clone())
            .collect();
        Ok(Schema { columns })
    }

    /// The schema of a joined row: left columns followed by right columns.
    pub fn join(left: &Schema, right: &Schema) -> Schema {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());
        Schema { columns }
    }

    /// Upper bound on the serialized size of any tuple of this schema,
    /// including the null bitmap.
    pub fn max_serialized_size(&self) -> usize {
        let bitmap = self.columns.len().div_ceil(8);
        bitmap + self.columns.iter().map(Column::max_serialized_size).sum::<usize>()
    }
}

/// Shared schema handle, the form the executors pass around.
pub type SchemaRef = Arc<Schema>;
