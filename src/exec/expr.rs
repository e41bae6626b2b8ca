//! # Expressions
//!
//! The minimal expression tree the executors consume: column references,
//! constants, comparisons, boolean connectives, and arithmetic. Parsing,
//! binding, and anything resembling full SQL expression semantics live
//! outside the engine; this is only the evaluation contract the operators
//! need for filters, join keys, aggregate inputs, and update targets.
//!
//! Evaluation follows SQL three-valued logic: comparisons against NULL
//! yield NULL, `AND`/`OR` propagate UNKNOWN, and a filter only passes rows
//! whose predicate evaluates to exactly `TRUE`.

use eyre::{bail, Result};

use crate::table::Tuple;
use crate::types::{Schema, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// Column `index` of input `side`: side 0 is the only (or left) input,
    /// side 1 the right input of a join.
    Column { side: usize, index: usize },
    Constant(Value),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn column(index: usize) -> Expr {
        Expr::Column { side: 0, index }
    }

    pub fn right_column(index: usize) -> Expr {
        Expr::Column { side: 1, index }
    }

    pub fn constant(value: Value) -> Expr {
        Expr::Constant(value)
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Self::compare(CompareOp::Eq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::Logic {
            op: LogicOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluates against a single input row.
    pub fn eval(&self, tuple: &Tuple, schema: &Schema) -> Result<Value> {
        self.eval_inner(&[(tuple, schema)])
    }

    /// Evaluates against a joined pair of rows.
    pub fn eval_join(
        &self,
        left: &Tuple,
        left_schema: &Schema,
        right: &Tuple,
        right_schema: &Schema,
    ) -> Result<Value> {
        self.eval_inner(&[(left, left_schema), (right, right_schema)])
    }

    fn eval_inner(&self, inputs: &[(&Tuple, &Schema)]) -> Result<Value> {
        match self {
            Expr::Column { side, index } => {
                let Some((tuple, schema)) = inputs.get(*side) else {
                    bail!("expression references input {side} of a {}-ary row", inputs.len());
                };
                tuple.value(schema, *index)
            }
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Compare { op, left, right } => {
                let lhs = left.eval_inner(inputs)?;
                let rhs = right.eval_inner(inputs)?;
                Ok(match lhs.compare(&rhs) {
                    None => Value::Null,
                    Some(ordering) => Value::Boolean(match op {
                        CompareOp::Eq => ordering.is_eq(),
                        CompareOp::NotEq => ordering.is_ne(),
                        CompareOp::Lt => ordering.is_lt(),
                        CompareOp::LtEq => ordering.is_le(),
                        CompareOp::Gt => ordering.is_gt(),
                        CompareOp::GtEq => ordering.is_ge(),
                    }),
                })
            }
            Expr::Logic { op, left, right } => {
                let lhs = truth(&left.eval_inner(inputs)?);
                let rhs = truth(&right.eval_inner(inputs)?);
                Ok(match op {
                    LogicOp::And => match (lhs, rhs) {
                        (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                        (Some(true), Some(true)) => Value::Boolean(true),
                        _ => Value::Null,
                    },
                    LogicOp::Or => match (lhs, rhs) {
                        (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                        (Some(false), Some(false)) => Value::Boolean(false),
                        _ => Value::Null,
                    },
                })
            }
            Expr::Not(inner) => Ok(match truth(&inner.eval_inner(inputs)?) {
                Some(b) => Value::Boolean(!b),
                None => Value::Null,
            }),
            Expr::Arith { op, left, right } => {
                let lhs = left.eval_inner(inputs)?;
                let rhs = right.eval_inner(inputs)?;
                arith(*op, &lhs, &rhs)
            }
        }
    }

    /// True when the expression evaluates to exactly TRUE; UNKNOWN filters
    /// the row out.
    pub fn passes(&self, tuple: &Tuple, schema: &Schema) -> Result<bool> {
        Ok(matches!(self.eval(tuple, schema)?, Value::Boolean(true)))
    }
}

fn truth(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Boolean(b) => Some(*b),
        _ => None,
    }
}

fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    use Value::*;
    if lhs.is_null() || rhs.is_null() {
        return Ok(Null);
    }
    Ok(match (lhs, rhs) {
        (Integer(a), Integer(b)) => match op {
            ArithOp::Add => Integer(a + b),
            ArithOp::Sub => Integer(a - b),
            ArithOp::Mul => Integer(a * b),
        },
        (a, b) => match (a.as_big_int(), b.as_big_int()) {
            (Some(a), Some(b)) => BigInt(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
            }),
            _ => match (to_f64(a), to_f64(b)) {
                (Some(a), Some(b)) => Double(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                }),
                _ => bail!("arithmetic on non-numeric values {a:?} and {b:?}"),
            },
        },
    })
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(v) => Some(*v as f64),
        Value::BigInt(v) => Some(*v as f64),
        Value::Double(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, DataType};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("a", DataType::BigInt),
            Column::new("b", DataType::Integer),
        ])
    }

    fn row(a: Option<i64>, b: i32) -> Tuple {
        let a = a.map(Value::BigInt).unwrap_or(Value::Null);
        Tuple::from_values(&[a, Value::Integer(b)], &schema()).unwrap()
    }

    #[test]
    fn comparisons_follow_sql_semantics() {
        let schema = schema();
        let pred = Expr::compare(CompareOp::Gt, Expr::column(0), Expr::constant(Value::BigInt(5)));

        assert!(pred.passes(&row(Some(7), 0), &schema).unwrap());
        assert!(!pred.passes(&row(Some(3), 0), &schema).unwrap());
        // NULL > 5 is UNKNOWN, which does not pass.
        assert!(!pred.passes(&row(None, 0), &schema).unwrap());
    }

    #[test]
    fn three_valued_and_or() {
        let schema = schema();
        let null_cmp = Expr::eq(Expr::column(0), Expr::constant(Value::BigInt(1)));
        let true_cmp = Expr::eq(Expr::column(1), Expr::constant(Value::Integer(2)));
        let tuple = row(None, 2);

        let and = Expr::and(null_cmp.clone(), true_cmp.clone());
        assert_eq!(and.eval(&tuple, &schema).unwrap(), Value::Null);

        let or = Expr::Logic {
            op: LogicOp::Or,
            left: Box::new(null_cmp),
            right: Box::new(true_cmp),
        };
        assert_eq!(or.eval(&tuple, &schema).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn arithmetic_promotes_across_widths() {
        let schema = schema();
        let sum = Expr::Arith {
            op: ArithOp::Add,
            left: Box::new(Expr::column(0)),
            right: Box::new(Expr::column(1)),
        };
        assert_eq!(sum.eval(&row(Some(10), 3), &schema).unwrap(), Value::BigInt(13));
        assert_eq!(sum.eval(&row(None, 3), &schema).unwrap(), Value::Null);
    }

    #[test]
    fn join_evaluation_addresses_both_sides() {
        let schema = schema();
        let pred = Expr::eq(Expr::column(0), Expr::right_column(0));
        let left = row(Some(4), 0);
        let right = row(Some(4), 9);
        assert_eq!(
            pred.eval_join(&left, &schema, &right, &schema).unwrap(),
            Value::Boolean(true)
        );
    }
}
