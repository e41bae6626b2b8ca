//! # Sequential Scan
//!
//! MVCC-aware full-table scan. The RID set is snapshotted at `init`, so
//! rows appended mid-scan are not visited; visibility of each visited RID
//! is decided per the reader's snapshot through the version chain, and
//! tombstoned-at-snapshot rows are skipped. An optional embedded filter
//! prunes rows before they leave the operator.

use std::sync::Arc;

use eyre::Result;

use crate::catalog::TableInfo;
use crate::mvcc::version::visible_tuple;
use crate::mvcc::{Transaction, TransactionManager};
use crate::table::{Rid, Tuple};
use crate::types::SchemaRef;

use super::expr::Expr;
use super::plan::SeqScanNode;
use super::{Executor, ExecutorContext};

pub struct SeqScanExecutor {
    table: Arc<TableInfo>,
    txn: Arc<Transaction>,
    txn_mgr: Arc<TransactionManager>,
    filter: Option<Expr>,
    rids: Vec<Rid>,
    cursor: usize,
}

impl SeqScanExecutor {
    pub fn new(ctx: &ExecutorContext, node: &SeqScanNode) -> Result<Self> {
        Ok(Self {
            table: ctx.catalog.table(&node.table)?,
            txn: Arc::clone(&ctx.txn),
            txn_mgr: Arc::clone(&ctx.txn_mgr),
            filter: node.filter.clone(),
            rids: Vec::new(),
            cursor: 0,
        })
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        self.rids = self.table.heap.scan_rids()?;
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        while self.cursor < self.rids.len() {
            let rid = self.rids[self.cursor];
            self.cursor += 1;

            let Some(tuple) = visible_tuple(
                &self.table.schema,
                &self.table.heap,
                rid,
                &self.txn,
                &self.txn_mgr,
            )?
            else {
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter.passes(&tuple, &self.table.schema)? {
                    continue;
                }
            }
            return Ok(Some((tuple, rid)));
        }
        Ok(None)
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.table.schema)
    }
}
