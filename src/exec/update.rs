//! # Update Executor
//!
//! Logical in-place update under MVCC. For each input row the target
//! expressions compute the new version from the old one; the base tuple is
//! rewritten in its slot with the transaction's temporary stamp, and the
//! pre-image of the modified columns goes into an undo log:
//!
//! - First touch by this transaction: a new undo log with exactly the
//!   changed columns, linked ahead of the current chain head.
//! - Self-modification: the transaction's existing undo log is widened —
//!   columns modified for the first time are added with their pre-update
//!   values, columns the log already covers keep their original snapshot.
//! - Rows inserted by this transaction have no pre-image and get no log.
//!
//! Index entries follow the key change (delete old, insert new); a unique
//! conflict on reinsertion taints the transaction. Emits an update count.
//!
//! Input rows are materialized at `init`, so updates cannot re-feed their
//! own scan.

use std::sync::Arc;

use eyre::{bail, ensure, Result};

use crate::catalog::{IndexInfo, TableInfo};
use crate::mvcc::version::is_write_write_conflict;
use crate::mvcc::{Transaction, TransactionManager, UndoLink, UndoLog};
use crate::table::{Rid, Tuple, TupleMeta};
use crate::types::{SchemaRef, Value};

use super::expr::Expr;
use super::{count_schema, Executor, ExecutorContext};

pub struct UpdateExecutor {
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    txn: Arc<Transaction>,
    txn_mgr: Arc<TransactionManager>,
    child: Box<dyn Executor>,
    target_exprs: Vec<Expr>,
    schema: SchemaRef,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        ctx: &ExecutorContext,
        table: &str,
        target_exprs: Vec<Expr>,
        child: Box<dyn Executor>,
    ) -> Result<Self> {
        let table = ctx.catalog.table(table)?;
        ensure!(
            target_exprs.len() == table.schema.column_count(),
            "update provides {} target expressions for {} columns",
            target_exprs.len(),
            table.schema.column_count()
        );
        Ok(Self {
            indexes: ctx.catalog.table_indexes(&table.name),
            table,
            txn: Arc::clone(&ctx.txn),
            txn_mgr: Arc::clone(&ctx.txn_mgr),
            child,
            target_exprs,
            schema: count_schema(),
            done: false,
        })
    }

    fn update_row(&self, old_tuple: &Tuple, rid: Rid) -> Result<()> {
        let schema = &self.table.schema;
        let (meta, base_tuple, head) = self.txn_mgr.get_tuple_and_undo_link(&self.table.heap, rid)?;
        if is_write_write_conflict(meta, &self.txn) {
            self.txn.set_tainted();
            bail!("write-write conflict updating {rid}");
        }

        let new_values: Vec<Value> = self
            .target_exprs
            .iter()
            .map(|e| e.eval(old_tuple, schema))
            .collect::<Result<_>>()?;
        let new_tuple = Tuple::from_values(&new_values, schema)?;
        let base_values = base_tuple.values(schema)?;

        if meta.ts == self.txn.temp_ts() {
            self.merge_self_modification(head, &base_values, &new_values)?;
            self.table
                .heap
                .update_tuple_in_place(TupleMeta::new(self.txn.temp_ts(), false), &new_tuple, rid)?;
        } else {
            // First touch: capture the pre-image of the changed columns.
            let modified: Vec<bool> = base_values
                .iter()
                .zip(&new_values)
                .map(|(old, new)| old != new)
                .collect();
            let partial_schema = schema.project(&modified)?;
            let partial_values: Vec<Value> = base_values
                .iter()
                .zip(&modified)
                .filter(|(_, &m)| m)
                .map(|(v, _)| v.clone())
                .collect();
            let log = UndoLog {
                is_deleted: meta.is_deleted,
                modified_fields: modified,
                tuple: Tuple::from_values(&partial_values, &partial_schema)?,
                ts: meta.ts,
                prev_version: head.unwrap_or(UndoLink::INVALID),
            };
            let link = self.txn.append_undo_log(log);
            let applied = self.txn_mgr.update_tuple_and_undo_link(
                &self.table.heap,
                rid,
                TupleMeta::new(self.txn.temp_ts(), false),
                &new_tuple,
                Some(link),
                Some(|current: Option<UndoLink>| current == head),
            )?;
            if !applied {
                self.txn.set_tainted();
                bail!("concurrent version-chain update on {rid}");
            }
        }
        self.txn.append_write_set(self.table.oid, rid);

        for index in &self.indexes {
            let old_key = index.key_from_tuple(&base_tuple, schema)?;
            let new_key = index.key_from_tuple(&new_tuple, schema)?;
            if old_key == new_key {
                continue;
            }
            if let Some(key) = old_key {
                index.delete_entry(key)?;
            }
            if let Some(key) = new_key {
                if !index.insert_entry(key, rid)? {
                    self.txn.set_tainted();
                    bail!("unique key {key} already exists in index '{}'", index.name);
                }
            }
        }
        Ok(())
    }

    /// Widens this transaction's own undo log with columns it modifies for
    /// the first time. The log keeps the committed pre-image; `base_values`
    /// are the current (already self-written) contents.
    fn merge_self_modification(
        &self,
        head: Option<UndoLink>,
        base_values: &[Value],
        new_values: &[Value],
    ) -> Result<()> {
        let schema = &self.table.schema;
        let own = head
            .filter(|link| link.is_valid() && link.prev_txn == self.txn.txn_id())
            .and_then(|link| self.txn.undo_log(link.prev_log_idx).map(|log| (link, log)));
        let Some((link, log)) = own else {
            // Inserted by this transaction: no committed pre-image exists.
            return Ok(());
        };

        let old_partial_schema = schema.project(&log.modified_fields)?;
        let old_partial = log.tuple.values(&old_partial_schema)?;

        let mut merged_mask = log.modified_fields.clone();
        let mut merged_values: Vec<Value> = Vec::new();
        let mut old_iter = 0;
        for idx in 0..schema.column_count() {
            if log.modified_fields[idx] {
                merged_values.push(old_partial[old_iter].clone());
                old_iter += 1;
            } else if base_values[idx] != new_values[idx] {
                merged_mask[idx] = true;
                merged_values.push(base_values[idx].clone());
            }
        }

        if merged_mask != log.modified_fields {
            let merged_schema = schema.project(&merged_mask)?;
            let merged = UndoLog {
                is_deleted: log.is_deleted,
                modified_fields: merged_mask,
                tuple: Tuple::from_values(&merged_values, &merged_schema)?,
                ts: log.ts,
                prev_version: log.prev_version,
            };
            self.txn.modify_undo_log(link.prev_log_idx, merged);
        }
        Ok(())
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> Result<()> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        // Materialize first: the child may be scanning the very table
        // being updated.
        let mut rows = Vec::new();
        while let Some(row) = self.child.next()? {
            rows.push(row);
        }

        let mut count: i64 = 0;
        for (old_tuple, rid) in rows {
            self.update_row(&old_tuple, rid)?;
            count += 1;
        }

        let out = Tuple::from_values(&[Value::BigInt(count)], &self.schema)?;
        Ok(Some((out, Rid::new(crate::config::INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
