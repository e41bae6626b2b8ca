//! # Nested Loop Join
//!
//! The classic outer/inner loop over two children, supporting INNER and
//! LEFT joins. The right side is materialized once at `init`; each left
//! row sweeps it, emitting concatenated rows where the predicate holds.
//! Under LEFT, an outer row that matched nothing is emitted once with the
//! right columns padded to NULL.

use std::sync::Arc;

use eyre::Result;

use crate::config::INVALID_PAGE_ID;
use crate::table::{Rid, Tuple};
use crate::types::{Schema, SchemaRef, Value};

use super::expr::Expr;
use super::plan::JoinType;
use super::Executor;

pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Expr,
    join_type: JoinType,
    left_schema: SchemaRef,
    right_schema: SchemaRef,
    schema: SchemaRef,
    right_rows: Vec<Tuple>,
    current_left: Option<Tuple>,
    right_cursor: usize,
    matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        predicate: Expr,
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
            predicate,
            join_type,
            left_schema,
            right_schema,
            schema,
            right_rows: Vec::new(),
            current_left: None,
            right_cursor: 0,
            matched: false,
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

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;
        self.right_rows.clear();
        while let Some((tuple, _)) = self.right.next()? {
            self.right_rows.push(tuple);
        }
        self.current_left = None;
        self.right_cursor = 0;
        self.matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if self.current_left.is_none() {
                self.current_left = self.left.next()?.map(|(tuple, _)| tuple);
                self.right_cursor = 0;
                self.matched = false;
                if self.current_left.is_none() {
                    return Ok(None);
                }
            }
            let left = self.current_left.as_ref().expect("left row present").clone();

            while self.right_cursor < self.right_rows.len() {
                let right = &self.right_rows[self.right_cursor];
                self.right_cursor += 1;
                let verdict = self.predicate.eval_join(
                    &left,
                    &self.left_schema,
                    right,
                    &self.right_schema,
                )?;
                if matches!(verdict, Value::Boolean(true)) {
                    self.matched = true;
                    return Ok(Some(self.emit(&left, Some(right))?));
                }
            }

            // Inner loop exhausted for this outer row.
            let unmatched_left = !self.matched && self.join_type == JoinType::Left;
            self.current_left = None;
            if unmatched_left {
                return Ok(Some(self.emit(&left, None)?));
            }
        }
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
