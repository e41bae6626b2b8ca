//! # Index Scan
//!
//! Point-query and full-scan access through a table index. With predicate
//! keys the executor probes once per key (a unique index yields at most
//! one RID each); without keys it walks the whole index in key order,
//! which only the ordered index supports. Fetched rows go through the same
//! snapshot visibility check as the sequential scan.

use std::sync::Arc;

use eyre::Result;

use crate::catalog::{IndexInfo, TableInfo};
use crate::mvcc::version::visible_tuple;
use crate::mvcc::{Transaction, TransactionManager};
use crate::table::{Rid, Tuple};
use crate::types::SchemaRef;

use super::expr::Expr;
use super::plan::IndexScanNode;
use super::{Executor, ExecutorContext};

pub struct IndexScanExecutor {
    table: Arc<TableInfo>,
    index: Arc<IndexInfo>,
    txn: Arc<Transaction>,
    txn_mgr: Arc<TransactionManager>,
    pred_keys: Vec<i64>,
    full_scan: bool,
    filter: Option<Expr>,
    rids: Vec<Rid>,
    cursor: usize,
}

impl IndexScanExecutor {
    pub fn new(ctx: &ExecutorContext, node: &IndexScanNode) -> Result<Self> {
        let pred_keys = node
            .pred_keys
            .iter()
            .filter_map(|v| v.as_big_int())
            .collect::<Vec<_>>();
        Ok(Self {
            table: ctx.catalog.table(&node.table)?,
            index: ctx.catalog.index(&node.table, &node.index)?,
            txn: Arc::clone(&ctx.txn),
            txn_mgr: Arc::clone(&ctx.txn_mgr),
            full_scan: node.pred_keys.is_empty(),
            pred_keys,
            filter: node.filter.clone(),
            rids: Vec::new(),
            cursor: 0,
        })
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        self.rids.clear();
        self.cursor = 0;
        if self.full_scan {
            for (_, rid) in self.index.scan_all()? {
                self.rids.push(rid);
            }
        } else {
            for &key in &self.pred_keys {
                if let Some(rid) = self.index.probe(key)? {
                    self.rids.push(rid);
                }
            }
        }
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
