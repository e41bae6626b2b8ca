//! # Limit Executor
//!
//! Passes through at most `k` rows from its child.

use std::sync::Arc;

use eyre::Result;

use crate::table::{Rid, Tuple};
use crate::types::SchemaRef;

use super::Executor;

pub struct LimitExecutor {
    child: Box<dyn Executor>,
    limit: usize,
    emitted: usize,
    schema: SchemaRef,
}

impl LimitExecutor {
    pub fn new(limit: usize, child: Box<dyn Executor>) -> Self {
        let schema = child.output_schema();
        Self {
            child,
            limit,
            emitted: 0,
            schema,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<()> {
        self.emitted = 0;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.emitted += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
