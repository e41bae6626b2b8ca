//! # Tuples, RIDs, and Tuple Metadata
//!
//! A [`Tuple`] is a schema-described byte string. The layout is a null
//! bitmap (one bit per column, set = NULL) followed by each non-null
//! column's serialization in declaration order: fixed-width LE for
//! booleans/integers/doubles, a 4-byte LE length prefix plus bytes for
//! varchar.
//!
//! [`Rid`] addresses a tuple slot in the table heap; [`TupleMeta`] carries
//! the MVCC timestamp and tombstone flag stored alongside each slot.

use eyre::{bail, ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{PageId, Timestamp};
use crate::types::{DataType, Schema, Value};

/// Record identifier: which page, which slot.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromBytes, IntoBytes, Immutable,
    KnownLayout,
)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Per-slot metadata: the (commit or temporary) timestamp of the version in
/// the heap and whether it is a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    pub ts: Timestamp,
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn new(ts: Timestamp, is_deleted: bool) -> Self {
        Self { ts, is_deleted }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Serializes `values` according to `schema`.
    pub fn from_values(values: &[Value], schema: &Schema) -> Result<Tuple> {
        ensure!(
            values.len() == schema.column_count(),
            "tuple has {} values for {} columns",
            values.len(),
            schema.column_count()
        );

        let bitmap_len = schema.column_count().div_ceil(8);
        let mut data = vec![0u8; bitmap_len];

        for (idx, (value, column)) in values.iter().zip(schema.columns()).enumerate() {
            match value {
                Value::Null => data[idx / 8] |= 1 << (idx % 8),
                Value::Boolean(b) => {
                    ensure_type(column.data_type(), DataType::Boolean, idx)?;
                    data.push(*b as u8);
                }
                Value::Integer(v) => {
                    ensure_type(column.data_type(), DataType::Integer, idx)?;
                    data.extend_from_slice(&v.to_le_bytes());
                }
                Value::BigInt(v) => {
                    ensure_type(column.data_type(), DataType::BigInt, idx)?;
                    data.extend_from_slice(&v.to_le_bytes());
                }
                Value::Double(v) => {
                    ensure_type(column.data_type(), DataType::Double, idx)?;
                    data.extend_from_slice(&v.to_bits().to_le_bytes());
                }
                Value::Varchar(s) => {
                    ensure_type(column.data_type(), DataType::Varchar, idx)?;
                    ensure!(
                        s.len() <= column.length(),
                        "varchar value of {} bytes exceeds declared length {} of column '{}'",
                        s.len(),
                        column.length(),
                        column.name()
                    );
                    data.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    data.extend_from_slice(s.as_bytes());
                }
            }
        }
        Ok(Tuple { data })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Deserializes the value of column `idx`.
    pub fn value(&self, schema: &Schema, idx: usize) -> Result<Value> {
        ensure!(
            idx < schema.column_count(),
            "column index {idx} out of range"
        );
        let mut cursor = Cursor::new(&self.data, schema)?;
        for i in 0..idx {
            cursor.skip(i)?;
        }
        cursor.read(idx)
    }

    /// Deserializes all columns.
    pub fn values(&self, schema: &Schema) -> Result<Vec<Value>> {
        let mut cursor = Cursor::new(&self.data, schema)?;
        (0..schema.column_count()).map(|i| cursor.read(i)).collect()
    }
}

fn ensure_type(actual: DataType, expected: DataType, idx: usize) -> Result<()> {
    ensure!(
        actual == expected,
        "value of type {expected:?} for column {idx} of type {actual:?}"
    );
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    bitmap: &'a [u8],
    schema: &'a Schema,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], schema: &'a Schema) -> Result<Self> {
        let bitmap_len = schema.column_count().div_ceil(8);
        ensure!(
            data.len() >= bitmap_len,
            "tuple of {} bytes too short for {}-column bitmap",
            data.len(),
            schema.column_count()
        );
        Ok(Self {
            data,
            bitmap: &data[..bitmap_len],
            schema,
            offset: bitmap_len,
        })
    }

    fn is_null(&self, idx: usize) -> bool {
        self.bitmap[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn field_len(&self, idx: usize) -> Result<usize> {
        if self.is_null(idx) {
            return Ok(0);
        }
        match self.schema.column(idx).data_type().fixed_size() {
            Some(n) => Ok(n),
            None => {
                ensure!(self.offset + 4 <= self.data.len(), "truncated varchar length");
                let len = u32::from_le_bytes(
                    self.data[self.offset..self.offset + 4].try_into().unwrap(),
                ) as usize;
                Ok(4 + len)
            }
        }
    }

    fn skip(&mut self, idx: usize) -> Result<()> {
        self.offset += self.field_len(idx)?;
        Ok(())
    }

    fn read(&mut self, idx: usize) -> Result<Value> {
        if self.is_null(idx) {
            return Ok(Value::Null);
        }
        let len = self.field_len(idx)?;
        ensure!(
            self.offset + len <= self.data.len(),
            "truncated tuple: column {idx} needs {len} bytes at offset {}",
            self.offset
        );
        let bytes = &self.data[self.offset..self.offset + len];
        let value = match self.schema.column(idx).data_type() {
            DataType::Boolean => Value::Boolean(bytes[0] != 0),
            DataType::Integer => Value::Integer(i32::from_le_bytes(bytes.try_into().unwrap())),
            DataType::BigInt => Value::BigInt(i64::from_le_bytes(bytes.try_into().unwrap())),
            DataType::Double => {
                Value::Double(f64::from_bits(u64::from_le_bytes(bytes.try_into().unwrap())))
            }
            DataType::Varchar => match std::str::from_utf8(&bytes[4..]) {
                Ok(s) => Value::Varchar(s.to_string()),
                Err(_) => bail!("invalid UTF-8 in varchar column {idx}"),
            },
        };
        self.offset += len;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::BigInt),
            Column::varchar("name", 32),
            Column::new("score", DataType::Double),
            Column::new("active", DataType::Boolean),
        ])
    }

    #[test]
    fn round_trips_all_types() {
        let schema = schema();
        let values = vec![
            Value::BigInt(42),
            Value::Varchar("alice".into()),
            Value::Double(2.5),
            Value::Boolean(true),
        ];
        let tuple = Tuple::from_values(&values, &schema).unwrap();
        assert_eq!(tuple.values(&schema).unwrap(), values);
    }

    #[test]
    fn nulls_round_trip_and_shrink_encoding() {
        let schema = schema();
        let sparse = Tuple::from_values(
            &[Value::BigInt(1), Value::Null, Value::Null, Value::Null],
            &schema,
        )
        .unwrap();
        let dense = Tuple::from_values(
            &[
                Value::BigInt(1),
                Value::Varchar("x".into()),
                Value::Double(0.0),
                Value::Boolean(false),
            ],
            &schema,
        )
        .unwrap();
        assert!(sparse.len() < dense.len());
        assert_eq!(sparse.value(&schema, 1).unwrap(), Value::Null);
        assert_eq!(sparse.value(&schema, 0).unwrap(), Value::BigInt(1));
    }

    #[test]
    fn single_column_access_skips_preceding_fields() {
        let schema = schema();
        let tuple = Tuple::from_values(
            &[
                Value::BigInt(7),
                Value::Varchar("bob".into()),
                Value::Double(1.25),
                Value::Boolean(false),
            ],
            &schema,
        )
        .unwrap();
        assert_eq!(tuple.value(&schema, 2).unwrap(), Value::Double(1.25));
        assert_eq!(tuple.value(&schema, 3).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn oversized_varchar_is_rejected() {
        let schema = Schema::new(vec![Column::varchar("s", 3)]);
        let err = Tuple::from_values(&[Value::Varchar("toolong".into())], &schema);
        assert!(err.is_err());
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let schema = schema();
        assert!(Tuple::from_values(&[Value::BigInt(1)], &schema).is_err());
    }
}
