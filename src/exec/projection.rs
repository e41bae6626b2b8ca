//! # Projection Executor
//!
//! Maps each child row through a list of expressions into the projected
//! output schema.

use std::sync::Arc;

use eyre::Result;

use crate::table::{Rid, Tuple};
use crate::types::{Schema, SchemaRef};

use super::expr::Expr;
use super::Executor;

pub struct ProjectionExecutor {
    child: Box<dyn Executor>,
    exprs: Vec<Expr>,
    input_schema: SchemaRef,
    schema: SchemaRef,
}

impl ProjectionExecutor {
    pub fn new(exprs: Vec<Expr>, schema: Schema, child: Box<dyn Executor>) -> Self {
        let input_schema = child.output_schema();
        Self {
            child,
            exprs,
            input_schema,
            schema: Arc::new(schema),
        }
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some((tuple, rid)) = self.child.next()? else {
            return Ok(None);
        };
        let values = self
            .exprs
            .iter()
            .map(|e| e.eval(&tuple, &self.input_schema))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some((Tuple::from_values(&values, &self.schema)?, rid)))
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
