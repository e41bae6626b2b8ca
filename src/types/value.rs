//! # Runtime Value Representation
//!
//! [`Value`] is the runtime form of a single column value. The variants
//! cover exactly what the executors evaluate: NULL, booleans, 32/64-bit
//! integers, doubles, and strings.
//!
//! ## Comparison Semantics
//!
//! SQL three-valued logic applies: comparing NULL to anything yields
//! `None` (UNKNOWN) from [`Value::compare`]. Integer and BigInt compare
//! numerically with each other and promote to double against Double.
//!
//! Two total orders exist alongside the SQL one:
//!
//! - [`Value::compare_for_sort`] — NULLs first, then the SQL order, used by
//!   the sort executor and B+tree-backed ordering.
//! - `Hash`/`Eq` — bit-level equality (NaN equals NaN, NULL equals NULL),
//!   used for aggregation and hash-join keys.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Varchar(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL comparison: `None` when either side is NULL.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (BigInt(a), BigInt(b)) => Some(a.cmp(b)),
            (Integer(a), BigInt(b)) => Some((*a as i64).cmp(b)),
            (BigInt(a), Integer(b)) => Some(a.cmp(&(*b as i64))),
            (Double(a), Double(b)) => a.partial_cmp(b).or(Some(total_f64(*a, *b))),
            (Integer(a), Double(b)) => (*a as f64).partial_cmp(b),
            (Double(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (BigInt(a), Double(b)) => (*a as f64).partial_cmp(b),
            (Double(a), BigInt(b)) => a.partial_cmp(&(*b as f64)),
            (Varchar(a), Varchar(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order for sorting: NULL sorts before everything, mixed
    /// incomparable types order by variant.
    pub fn compare_for_sort(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .compare(other)
                .unwrap_or_else(|| self.variant_rank().cmp(&other.variant_rank())),
        }
    }

    /// The i64 behind an integer-family value; `None` for anything else.
    /// Index key extraction uses this.
    pub fn as_big_int(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::BigInt(_) | Value::Double(_) => 2,
            Value::Varchar(_) => 3,
        }
    }
}

fn total_f64(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (Integer(a), BigInt(b)) | (BigInt(b), Integer(a)) => *a as i64 == *b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Varchar(a), Varchar(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Boolean(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            // Integer and BigInt hash identically so cross-width equality
            // keeps the Hash/Eq contract.
            Value::Integer(v) => {
                state.write_u8(2);
                (*v as i64).hash(state);
            }
            Value::BigInt(v) => {
                state.write_u8(2);
                v.hash(state);
            }
            Value::Double(v) => {
                state.write_u8(3);
                v.to_bits().hash(state);
            }
            Value::Varchar(s) => {
                state.write_u8(4);
                s.hash(state);
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Varchar(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_comparison_is_unknown() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).compare(&Value::Null), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn integer_family_compares_across_widths() {
        assert_eq!(
            Value::Integer(5).compare(&Value::BigInt(5)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::BigInt(2).compare(&Value::Integer(3)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Integer(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn sort_order_puts_nulls_first() {
        let mut values = vec![Value::Integer(3), Value::Null, Value::Integer(1)];
        values.sort_by(Value::compare_for_sort);
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Integer(1));
    }

    #[test]
    fn hash_eq_contract_across_integer_widths() {
        use std::collections::hash_map::DefaultHasher;

        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        assert_eq!(Value::Integer(7), Value::BigInt(7));
        assert_eq!(hash(&Value::Integer(7)), hash(&Value::BigInt(7)));
    }

    #[test]
    fn varchar_compares_lexicographically() {
        assert_eq!(
            Value::Varchar("abc".into()).compare(&Value::Varchar("abd".into())),
            Some(Ordering::Less)
        );
    }
}
