//! # Version Chains
//!
//! The read-side MVCC primitives: reconstructing an old tuple from undo
//! deltas, collecting the deltas a snapshot needs, and the write-write
//! conflict test.
//!
//! ## Version Chain Shape
//!
//! ```text
//! table heap (newest)          undo buffers (older)
//! ┌──────────────────┐   link  ┌─────────────┐  prev  ┌─────────────┐
//! │ base tuple, ts=T3 ├───────►│ delta, ts=T2 ├───────►│ delta, ts=T1 │─► INVALID
//! └──────────────────┘         └─────────────┘        └─────────────┘
//! ```
//!
//! A reader at `read_ts` takes the base tuple if the base is committed at
//! or below its snapshot (or is its own uncommitted write); otherwise it
//! collects deltas until the first with `ts <= read_ts` — inclusive — and
//! replays them oldest-last onto the base. Running off the end of the
//! chain means the tuple did not exist at that snapshot.

use eyre::Result;

use crate::config::TXN_START_ID;
use crate::table::{Rid, TableHeap, Tuple, TupleMeta};
use crate::types::Schema;

use super::manager::TransactionManager;
use super::transaction::{Transaction, UndoLog};

/// Replays `undo_logs` (newest first) onto the base tuple. All provided
/// logs are applied unconditionally; snapshot filtering happens in
/// [`collect_undo_logs`]. `None` when the reconstructed version is a
/// deletion.
pub fn reconstruct_tuple(
    schema: &Schema,
    base_tuple: &Tuple,
    base_meta: TupleMeta,
    undo_logs: &[UndoLog],
) -> Result<Option<Tuple>> {
    if base_meta.is_deleted && undo_logs.is_empty() {
        return Ok(None);
    }

    let mut values = base_tuple.values(schema)?;
    let mut deleted = base_meta.is_deleted;

    for log in undo_logs {
        if log.is_deleted {
            deleted = true;
            continue;
        }
        deleted = false;
        let partial_schema = schema.project(&log.modified_fields)?;
        let partial_values = log.tuple.values(&partial_schema)?;
        let mut next_partial = 0;
        for (idx, modified) in log.modified_fields.iter().enumerate() {
            if *modified {
                values[idx] = partial_values[next_partial].clone();
                next_partial += 1;
            }
        }
    }

    if deleted {
        return Ok(None);
    }
    Ok(Some(Tuple::from_values(&values, schema)?))
}

/// Collects the undo logs transaction `txn` must replay to see its
/// snapshot of the tuple at `rid`.
///
/// - `Some(vec![])`: the base tuple itself is visible (committed at or
///   below the snapshot, or the reader's own uncommitted write).
/// - `Some(logs)`: replay `logs` through [`reconstruct_tuple`].
/// - `None`: the tuple did not exist at the snapshot.
pub fn collect_undo_logs(
    rid: Rid,
    base_meta: TupleMeta,
    txn: &Transaction,
    txn_mgr: &TransactionManager,
) -> Result<Option<Vec<UndoLog>>> {
    if base_meta.ts == txn.temp_ts() {
        return Ok(Some(Vec::new()));
    }
    if base_meta.ts < TXN_START_ID && base_meta.ts <= txn.read_ts() {
        return Ok(Some(Vec::new()));
    }

    let mut logs = Vec::new();
    let mut link = txn_mgr.get_undo_link(rid);
    loop {
        let Some(current) = link.filter(|l| l.is_valid()) else {
            // Chain exhausted above the snapshot: invisible.
            return Ok(None);
        };
        let Some(log) = txn_mgr.get_undo_log_optional(current) else {
            return Ok(None);
        };
        let ts = log.ts;
        let prev = log.prev_version;
        logs.push(log);
        if ts <= txn.read_ts() {
            return Ok(Some(logs));
        }
        link = Some(prev);
    }
}

/// The version of `rid` visible to `txn`, reconstructed if necessary.
/// `None` covers both "deleted at this snapshot" and "did not exist yet".
pub fn visible_tuple(
    schema: &Schema,
    heap: &TableHeap,
    rid: Rid,
    txn: &Transaction,
    txn_mgr: &TransactionManager,
) -> Result<Option<Tuple>> {
    let (meta, base_tuple, _) = txn_mgr.get_tuple_and_undo_link(heap, rid)?;
    match collect_undo_logs(rid, meta, txn, txn_mgr)? {
        None => Ok(None),
        Some(logs) if logs.is_empty() => {
            if meta.is_deleted {
                Ok(None)
            } else {
                Ok(Some(base_tuple))
            }
        }
        Some(logs) => reconstruct_tuple(schema, &base_tuple, meta, &logs),
    }
}

/// True when `txn` must not overwrite a tuple whose base carries `meta`:
/// either another transaction's uncommitted stamp, or a commit newer than
/// the writer's snapshot.
pub fn is_write_write_conflict(meta: TupleMeta, txn: &Transaction) -> bool {
    if meta.ts >= TXN_START_ID {
        meta.ts != txn.temp_ts()
    } else {
        meta.ts > txn.read_ts()
    }
}
