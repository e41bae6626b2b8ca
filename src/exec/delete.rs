//! # Delete Executor
//!
//! Tombstones every row its child produces. Under MVCC the base tuple
//! keeps its bytes: the slot is restamped with the transaction's temporary
//! timestamp and the tombstone flag, and — unless the row was created by
//! this same transaction — an undo log capturing the full prior version is
//! pushed onto the version chain first. Index entries for the old keys are
//! removed. Emits a single-row delete count.

use std::sync::Arc;

use eyre::{bail, Result};

use crate::catalog::{IndexInfo, TableInfo};
use crate::mvcc::version::is_write_write_conflict;
use crate::mvcc::{Transaction, TransactionManager, UndoLink, UndoLog};
use crate::table::{Rid, Tuple, TupleMeta};
use crate::types::{SchemaRef, Value};

use super::{count_schema, Executor, ExecutorContext};

pub struct DeleteExecutor {
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    txn: Arc<Transaction>,
    txn_mgr: Arc<TransactionManager>,
    child: Box<dyn Executor>,
    schema: SchemaRef,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(ctx: &ExecutorContext, table: &str, child: Box<dyn Executor>) -> Result<Self> {
        Ok(Self {
            table: ctx.catalog.table(table)?,
            indexes: ctx.catalog.table_indexes(table),
            txn: Arc::clone(&ctx.txn),
            txn_mgr: Arc::clone(&ctx.txn_mgr),
            child,
            schema: count_schema(),
            done: false,
        })
    }

    fn delete_row(&self, rid: Rid) -> Result<()> {
        let (meta, base_tuple, head) = self.txn_mgr.get_tuple_and_undo_link(&self.table.heap, rid)?;
        if is_write_write_conflict(meta, &self.txn) {
            self.txn.set_tainted();
            bail!("write-write conflict deleting {rid}");
        }

        if meta.ts == self.txn.temp_ts() {
            // Own insert or own update: the existing undo log (if any)
            // already captures the committed pre-image.
            self.table
                .heap
                .update_tuple_meta(TupleMeta::new(self.txn.temp_ts(), true), rid)?;
        } else {
            let log = UndoLog {
                is_deleted: meta.is_deleted,
                modified_fields: vec![true; self.table.schema.column_count()],
                tuple: base_tuple.clone(),
                ts: meta.ts,
                prev_version: head.unwrap_or(UndoLink::INVALID),
            };
            let link = self.txn.append_undo_log(log);
            let applied = self.txn_mgr.update_tuple_and_undo_link(
                &self.table.heap,
                rid,
                TupleMeta::new(self.txn.temp_ts(), true),
                &base_tuple,
                Some(link),
                Some(|current: Option<UndoLink>| current == head),
            )?;
            if !applied {
                self.txn.set_tainted();
                bail!("concurrent version-chain update deleting {rid}");
            }
        }
        self.txn.append_write_set(self.table.oid, rid);

        for index in &self.indexes {
            if let Some(key) = index.key_from_tuple(&base_tuple, &self.table.schema)? {
                index.delete_entry(key)?;
            }
        }
        Ok(())
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count: i64 = 0;
        while let Some((_, rid)) = self.child.next()? {
            self.delete_row(rid)?;
            count += 1;
        }

        let out = Tuple::from_values(&[Value::BigInt(count)], &self.schema)?;
        Ok(Some((out, Rid::new(crate::config::INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
