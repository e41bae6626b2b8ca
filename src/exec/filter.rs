//! # Filter Executor
//!
//! Standalone predicate over a child — the plan shape an optimizer leaves
//! behind when it has not fused the filter into the scan below.

use std::sync::Arc;

use eyre::Result;

use crate::table::{Rid, Tuple};
use crate::types::SchemaRef;

use super::expr::Expr;
use super::Executor;

pub struct FilterExecutor {
    child: Box<dyn Executor>,
    predicate: Expr,
    schema: SchemaRef,
}

impl FilterExecutor {
    pub fn new(predicate: Expr, child: Box<dyn Executor>) -> Self {
        let schema = child.output_schema();
        Self {
            child,
            predicate,
            schema,
        }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        while let Some((tuple, rid)) = self.child.next()? {
            if self.predicate.passes(&tuple, &self.schema)? {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
