//! # Values Executor
//!
//! Emits a fixed list of literal rows — the canonical child of an insert.
//! Row expressions are evaluated against an empty input, so only
//! constant-valued expressions make sense here.

use std::sync::Arc;

use eyre::Result;

use crate::config::INVALID_PAGE_ID;
use crate::table::{Rid, Tuple};
use crate::types::{Schema, SchemaRef};

use super::plan::ValuesNode;
use super::Executor;

pub struct ValuesExecutor {
    node: ValuesNode,
    schema: SchemaRef,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(node: &ValuesNode) -> Self {
        Self {
            schema: Arc::new(node.schema.clone()),
            node: node.clone(),
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some(row) = self.node.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let empty_schema = Schema::new(Vec::new());
        let empty = Tuple::default();
        let values = row
            .iter()
            .map(|e| e.eval(&empty, &empty_schema))
            .collect::<Result<Vec<_>>>()?;
        let tuple = Tuple::from_values(&values, &self.schema)?;
        Ok(Some((tuple, Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
