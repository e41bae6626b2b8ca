//! # Nested Index Join
//!
//! Per outer row, evaluates the key expression and probes the inner
//! table's unique index instead of scanning it. A NULL key matches
//! nothing: under INNER the outer row is skipped, under LEFT it is
//! emitted padded with NULLs. Probed inner rows that are tombstones are
//! treated as missing.

use std::sync::Arc;

use eyre::Result;

use crate::catalog::{IndexInfo, TableInfo};
use crate::config::INVALID_PAGE_ID;
use crate::table::{Rid, Tuple};
use crate::types::{Schema, SchemaRef, Value};

use super::expr::Expr;
use super::plan::{JoinType, NestedIndexJoinNode};
use super::{Executor, ExecutorContext};

pub struct NestedIndexJoinExecutor {
    child: Box<dyn Executor>,
    inner_table: Arc<TableInfo>,
    inner_index: Arc<IndexInfo>,
    key_expr: Expr,
    join_type: JoinType,
    outer_schema: SchemaRef,
    schema: SchemaRef,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        ctx: &ExecutorContext,
        node: &NestedIndexJoinNode,
        child: Box<dyn Executor>,
    ) -> Result<Self> {
        let inner_table = ctx.catalog.table(&node.inner_table)?;
        let inner_index = ctx.catalog.index(&node.inner_table, &node.inner_index)?;
        let outer_schema = child.output_schema();
        let schema = Arc::new(Schema::join(&outer_schema, &inner_table.schema));
        Ok(Self {
            child,
            inner_table,
            inner_index,
            key_expr: node.key_expr.clone(),
            join_type: node.join_type,
            outer_schema,
            schema,
        })
    }

    fn emit(&self, outer: &Tuple, inner: Option<&Tuple>) -> Result<(Tuple, Rid)> {
        let mut values = outer.values(&self.outer_schema)?;
        match inner {
            Some(inner) => values.extend(inner.values(&self.inner_table.schema)?),
            None => values.extend(vec![Value::Null; self.inner_table.schema.column_count()]),
        }
        Ok((
            Tuple::from_values(&values, &self.schema)?,
            Rid::new(INVALID_PAGE_ID, 0),
        ))
    }

    /// The live inner row for a key, if any.
    fn probe(&self, key: i64) -> Result<Option<Tuple>> {
        let Some(rid) = self.inner_index.probe(key)? else {
            return Ok(None);
        };
        let (meta, tuple) = self.inner_table.heap.tuple(rid)?;
        if meta.is_deleted {
            return Ok(None);
        }
        Ok(Some(tuple))
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            let Some((outer, _)) = self.child.next()? else {
                return Ok(None);
            };

            let key = self.key_expr.eval(&outer, &self.outer_schema)?;
            let inner = match key.as_big_int() {
                None => None, // NULL key joins nothing
                Some(key) => self.probe(key)?,
            };

            match (inner, self.join_type) {
                (Some(inner), _) => return Ok(Some(self.emit(&outer, Some(&inner))?)),
                (None, JoinType::Left) => return Ok(Some(self.emit(&outer, None)?)),
                (None, JoinType::Inner) => continue,
            }
        }
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
