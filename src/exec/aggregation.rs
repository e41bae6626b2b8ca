//! # Aggregation Executor
//!
//! Hash aggregation: one hash-table entry per distinct group-by key,
//! folded as input rows stream in. Combination rules per function:
//!
//! | Function   | Initial | Combine                                  |
//! |------------|---------|------------------------------------------|
//! | COUNT(*)   | 0       | always +1                                |
//! | COUNT(col) | NULL    | +1 iff the input is non-null             |
//! | SUM        | NULL    | add iff the input is non-null            |
//! | MIN / MAX  | NULL    | track the extremum, ignoring nulls       |
//!
//! With no group-by columns and an empty input, one row of initial values
//! is emitted (`COUNT(*) = 0`, the rest NULL); with group-bys, an empty
//! input yields no rows.

use std::sync::Arc;

use eyre::Result;

use crate::config::INVALID_PAGE_ID;
use crate::table::{Rid, Tuple};
use crate::types::{SchemaRef, Value};

use super::expr::Expr;
use super::plan::AggregationType;
use super::Executor;

pub struct AggregationExecutor {
    child: Box<dyn Executor>,
    group_bys: Vec<Expr>,
    aggregates: Vec<(AggregationType, Expr)>,
    schema: SchemaRef,
    input_schema: SchemaRef,
    groups: Vec<(Vec<Value>, Vec<Value>)>,
    cursor: usize,
}

impl AggregationExecutor {
    pub fn new(
        group_bys: Vec<Expr>,
        aggregates: Vec<(AggregationType, Expr)>,
        schema: crate::types::Schema,
        child: Box<dyn Executor>,
    ) -> Self {
        let input_schema = child.output_schema();
        Self {
            child,
            group_bys,
            aggregates,
            schema: Arc::new(schema),
            input_schema,
            groups: Vec::new(),
            cursor: 0,
        }
    }

    fn initial_values(&self) -> Vec<Value> {
        self.aggregates
            .iter()
            .map(|(kind, _)| match kind {
                AggregationType::CountStar => Value::BigInt(0),
                _ => Value::Null,
            })
            .collect()
    }

    fn combine(&self, acc: &mut [Value], inputs: &[Value]) {
        for (slot, ((kind, _), input)) in acc
            .iter_mut()
            .zip(self.aggregates.iter().zip(inputs))
        {
            match kind {
                AggregationType::CountStar => {
                    if let Value::BigInt(n) = slot {
                        *n += 1;
                    }
                }
                AggregationType::Count => {
                    if !input.is_null() {
                        let next = match &*slot {
                            Value::Null => Value::BigInt(1),
                            Value::BigInt(n) => Value::BigInt(n + 1),
                            other => other.clone(),
                        };
                        *slot = next;
                    }
                }
                AggregationType::Sum => {
                    if !input.is_null() {
                        *slot = match &*slot {
                            Value::Null => input.clone(),
                            current => add(current, input),
                        };
                    }
                }
                AggregationType::Min => {
                    if !input.is_null() {
                        let replace = match &*slot {
                            Value::Null => true,
                            current => {
                                input.compare(current).is_some_and(|o| o.is_lt())
                            }
                        };
                        if replace {
                            *slot = input.clone();
                        }
                    }
                }
                AggregationType::Max => {
                    if !input.is_null() {
                        let replace = match &*slot {
                            Value::Null => true,
                            current => {
                                input.compare(current).is_some_and(|o| o.is_gt())
                            }
                        };
                        if replace {
                            *slot = input.clone();
                        }
                    }
                }
            }
        }
    }
}

fn add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Value::Integer(x + y),
        (Value::Double(x), Value::Double(y)) => Value::Double(x + y),
        _ => match (a.as_big_int(), b.as_big_int()) {
            (Some(x), Some(y)) => Value::BigInt(x + y),
            _ => Value::Null,
        },
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.cursor = 0;
        self.groups.clear();

        let mut table: hashbrown::HashMap<Vec<Value>, Vec<Value>> = hashbrown::HashMap::new();
        while let Some((tuple, _)) = self.child.next()? {
            let key: Vec<Value> = self
                .group_bys
                .iter()
                .map(|e| e.eval(&tuple, &self.input_schema))
                .collect::<Result<_>>()?;
            let inputs: Vec<Value> = self
                .aggregates
                .iter()
                .map(|(_, e)| e.eval(&tuple, &self.input_schema))
                .collect::<Result<_>>()?;

            let acc = table
                .entry(key)
                .or_insert_with(|| self.initial_values());
            self.combine(acc, &inputs);
        }

        if table.is_empty() && self.group_bys.is_empty() {
            table.insert(Vec::new(), self.initial_values());
        }
        self.groups = table.into_iter().collect();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some((key, aggs)) = self.groups.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let mut values = key.clone();
        values.extend(aggs.iter().cloned());
        let tuple = Tuple::from_values(&values, &self.schema)?;
        Ok(Some((tuple, Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
