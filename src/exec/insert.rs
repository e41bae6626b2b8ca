//! # Insert Executor
//!
//! Pulls rows from its child (typically a `Values` node), appends them to
//! the table heap stamped with the transaction's temporary timestamp,
//! registers the new RIDs in the write set, and maintains every index on
//! the table. A unique-key conflict in any index taints the transaction
//! and fails the statement. Emits a single one-column row with the insert
//! count.

use std::sync::Arc;

use eyre::{bail, Result};

use crate::catalog::{IndexInfo, TableInfo};
use crate::mvcc::Transaction;
use crate::table::{Rid, Tuple, TupleMeta};
use crate::types::{SchemaRef, Value};

use super::{count_schema, Executor, ExecutorContext};

pub struct InsertExecutor {
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    txn: Arc<Transaction>,
    child: Box<dyn Executor>,
    schema: SchemaRef,
    done: bool,
}

impl InsertExecutor {
    pub fn new(ctx: &ExecutorContext, table: &str, child: Box<dyn Executor>) -> Result<Self> {
        Ok(Self {
            table: ctx.catalog.table(table)?,
            indexes: ctx.catalog.table_indexes(table),
            txn: Arc::clone(&ctx.txn),
            child,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for InsertExecutor {
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
        while let Some((tuple, _)) = self.child.next()? {
            let meta = TupleMeta::new(self.txn.temp_ts(), false);
            let rid = self.table.heap.insert_tuple(meta, &tuple)?;
            self.txn.append_write_set(self.table.oid, rid);

            for index in &self.indexes {
                if let Some(key) = index.key_from_tuple(&tuple, &self.table.schema)? {
                    if !index.insert_entry(key, rid)? {
                        self.txn.set_tainted();
                        bail!(
                            "unique key {key} already exists in index '{}'",
                            index.name
                        );
                    }
                }
            }
            count += 1;
        }

        let out = Tuple::from_values(&[Value::BigInt(count)], &self.schema)?;
        Ok(Some((out, Rid::new(crate::config::INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
