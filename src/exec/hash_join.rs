//! # Hash Join
//!
//! Equi-join via a build/probe hash table, supporting INNER and LEFT. The
//! right side is materialized into a hash table keyed by its join
//! expressions at `init`; each left row probes once and streams the
//! Cartesian product of its matches. A left row whose key contains NULL
//! matches nothing (SQL equality), which under LEFT still produces one
//! NULL-padded output row.

use std::sync::Arc;

use eyre::Result;

use crate::config::INVALID_PAGE_ID;
use crate::table::{Rid, Tuple};
use crate::types::{Schema, SchemaRef, Value};

use super::expr::Expr;
use super::plan::JoinType;
use super::Executor;

pub struct HashJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_keys: Vec<Expr>,
    right_keys: Vec<Expr>,
    join_type: JoinType,
    left_schema: SchemaRef,
    right_schema: SchemaRef,
    schema: SchemaRef,
    table: hashbrown::HashMap<Vec<Value>, Vec<Tuple>>,
    current_left: Option<Tuple>,
    matches: Vec<Tuple>,
    match_cursor: usize,
}

impl HashJoinExecutor {
    pub fn new(
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        join_type: JoinType,
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
    ) -> Self {
        let left_schema = left.output_schema();
        let right_schema = right.output_schema();
        let schema = Arc::new(Schema::join(&left_schema, &right_schema));
        Self {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
            left_schema,
            right_schema,
            schema,
            table: hashbrown::HashMap::new(),
            current_left: None,
            matches: Vec::new(),
            match_cursor: 0,
        }
    }

    fn emit(&self, left: &Tuple, right: Option<&Tuple>) -> Result<(Tuple, Rid)> {
        let mut values = left.values(&self.left_schema)?;
        match right {
            Some(right) => values.extend(right.values(&self.right_schema)?),
            None => values.extend(vec![Value::Null; self.right_schema.column_count()]),
        }
        Ok((
            Tuple::from_values(&values, &self.schema)?,
            Rid::new(INVALID_PAGE_ID, 0),
        ))
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;
        self.table.clear();
        self.current_left = None;
        self.matches.clear();
        self.match_cursor = 0;

        while let Some((tuple, _)) = self.right.next()? {
            let key: Vec<Value> = self
                .right_keys
                .iter()
                .map(|e| e.eval(&tuple, &self.right_schema))
                .collect::<Result<_>>()?;
            if key.iter().any(Value::is_null) {
                // NULL keys can never equal anything; keep them out of the
                // build side entirely.
                continue;
            }
            self.table.entry(key).or_default().push(tuple);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if let Some(left) = &self.current_left {
                if self.match_cursor < self.matches.len() {
                    let right = self.matches[self.match_cursor].clone();
                    self.match_cursor += 1;
                    let row = self.emit(left, Some(&right))?;
                    return Ok(Some(row));
                }
                self.current_left = None;
            }

            let Some((left, _)) = self.left.next()? else {
                return Ok(None);
            };
            let key: Vec<Value> = self
                .left_keys
                .iter()
                .map(|e| e.eval(&left, &self.left_schema))
                .collect::<Result<_>>()?;

            let matches = if key.iter().any(Value::is_null) {
                None
            } else {
                self.table.get(&key)
            };
            match matches {
                Some(rows) if !rows.is_empty() => {
                    self.matches = rows.clone();
                    self.match_cursor = 0;
                    self.current_left = Some(left);
                }
                _ => {
                    if self.join_type == JoinType::Left {
                        return Ok(Some(self.emit(&left, None)?));
                    }
                }
            }
        }
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
