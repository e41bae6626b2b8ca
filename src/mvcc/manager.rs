//! # Transaction Manager
//!
//! Owns every transaction's lifecycle and the version-chain heads. The
//! manager is the authority for three global orders:
//!
//! - **Timestamps**: `last_commit_ts` rises by exactly one per commit
//!   (serialized by the commit mutex); `next_txn_id` rises from
//!   `TXN_START_ID` so ids double as temporary stamps.
//! - **Snapshots**: `begin` registers the new transaction's `read_ts` in
//!   the watermark; commit and abort remove it.
//! - **Version chains**: `version_info` maps each RID to the head
//!   [`UndoLink`]; heads move by compare-and-set with an optional veto
//!   callback so concurrent writers detect each other.
//!
//! ## Abort
//!
//! Abort physically restores every write-set RID from the aborting
//! transaction's own undo logs (its inserts become tombstones) and pops
//! the chain heads it installed. The undo buffer itself stays in place
//! until garbage collection.
//!
//! ## Garbage Collection
//!
//! Stop-the-world: with the watermark `w`, every chain is cut after the
//! first log with `ts <= w` (readers at or above `w` never walk further),
//! chains whose base version is committed at or below `w` are dropped
//! whole, and terminal transactions owning no surviving log leave the
//! transaction map.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};

use crate::catalog::Catalog;
use crate::config::{Timestamp, TxnId, TXN_START_ID};
use crate::table::{Rid, TableHeap, Tuple, TupleMeta};

use super::transaction::{IsolationLevel, Transaction, TransactionState, UndoLink, UndoLog};
use super::version::reconstruct_tuple;
use super::watermark::Watermark;

pub struct TransactionManager {
    next_txn_id: AtomicU64,
    last_commit_ts: AtomicU64,
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    version_info: Mutex<HashMap<Rid, UndoLink>>,
    running_txns: Mutex<Watermark>,
    commit_mutex: Mutex<()>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(TXN_START_ID),
            last_commit_ts: AtomicU64::new(0),
            txn_map: RwLock::new(HashMap::new()),
            version_info: Mutex::new(HashMap::new()),
            running_txns: Mutex::new(Watermark::new(0)),
            commit_mutex: Mutex::new(()),
        }
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.last_commit_ts.load(Ordering::Acquire)
    }

    /// The minimum read timestamp across running transactions, or the last
    /// commit timestamp when none run.
    pub fn watermark(&self) -> Timestamp {
        self.running_txns.lock().watermark()
    }

    pub fn txn(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    /// Starts a transaction whose snapshot is everything committed so far.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let mut txn_map = self.txn_map.write();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::AcqRel);
        let read_ts = self.last_commit_ts.load(Ordering::Acquire);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level, read_ts));
        txn_map.insert(txn_id, Arc::clone(&txn));
        self.running_txns
            .lock()
            .add_txn(read_ts)
            .expect("read snapshot cannot predate the last commit");
        txn
    }

    /// Serializable validation hook. Left as a documented no-op: the
    /// engine tracks everything the check needs (write sets, snapshots)
    /// but the conflict test itself is future work.
    fn verify_txn(&self, _txn: &Transaction) -> bool {
        true
    }

    /// Publishes a transaction: rewrites every write-set tuple's temporary
    /// stamp with the fresh commit timestamp, then moves the timestamp
    /// frontier. Returns `false` when serializable validation fails (the
    /// transaction is aborted internally).
    pub fn commit(&self, txn: &Arc<Transaction>, catalog: &Catalog) -> Result<bool> {
        let _commit_guard = self.commit_mutex.lock();

        ensure!(
            txn.state() == TransactionState::Running,
            "commit on a {:?} transaction",
            txn.state()
        );

        if txn.isolation_level() == IsolationLevel::Serializable && !self.verify_txn(txn) {
            drop(_commit_guard);
            self.abort(txn, catalog)?;
            return Ok(false);
        }

        let commit_ts = self.last_commit_ts.load(Ordering::Acquire) + 1;

        // The txn-map write lock also excludes `begin`, so no snapshot can
        // be taken between stamping and frontier advance.
        let txn_map = self.txn_map.write();
        for (table_oid, rid) in txn.write_set() {
            let table = catalog.table_by_oid(table_oid)?;
            let meta = table.heap.tuple_meta(rid)?;
            table
                .heap
                .update_tuple_meta(TupleMeta::new(commit_ts, meta.is_deleted), rid)?;
        }

        txn.set_commit_ts(commit_ts);
        txn.set_state(TransactionState::Committed);
        {
            let mut watermark = self.running_txns.lock();
            watermark.update_commit_ts(commit_ts);
            watermark.remove_txn(txn.read_ts())?;
        }
        self.last_commit_ts.store(commit_ts, Ordering::Release);
        drop(txn_map);

        log::debug!("txn {} committed at ts {commit_ts}", txn.txn_id());
        Ok(true)
    }

    /// Rolls a running or tainted transaction back: every write-set RID is
    /// restored from the transaction's own undo log (inserts become
    /// tombstones) and the chain heads it pushed are popped.
    pub fn abort(&self, txn: &Arc<Transaction>, catalog: &Catalog) -> Result<()> {
        ensure!(
            matches!(
                txn.state(),
                TransactionState::Running | TransactionState::Tainted
            ),
            "abort on a {:?} transaction",
            txn.state()
        );

        for (table_oid, rid) in txn.write_set().into_iter().rev() {
            let table = catalog.table_by_oid(table_oid)?;
            self.rollback_tuple(&table.heap, &table.schema, txn, rid)?;
        }

        txn.set_state(TransactionState::Aborted);
        self.running_txns.lock().remove_txn(txn.read_ts())?;
        log::debug!("txn {} aborted", txn.txn_id());
        Ok(())
    }

    fn rollback_tuple(
        &self,
        heap: &TableHeap,
        schema: &crate::types::Schema,
        txn: &Transaction,
        rid: Rid,
    ) -> Result<()> {
        let (meta, base_tuple, head) = self.get_tuple_and_undo_link(heap, rid)?;
        if meta.ts != txn.temp_ts() {
            // Already restored through an earlier write-set entry for the
            // same RID.
            return Ok(());
        }

        let own_log = head
            .filter(|link| link.is_valid() && link.prev_txn == txn.txn_id())
            .and_then(|link| txn.undo_log(link.prev_log_idx).map(|log| (link, log)));

        match own_log {
            Some((_, log)) => {
                let restored = reconstruct_tuple(schema, &base_tuple, meta, &[log.clone()])?;
                match restored {
                    Some(tuple) => heap.update_tuple_in_place(
                        TupleMeta::new(log.ts, false),
                        &tuple,
                        rid,
                    )?,
                    None => heap.update_tuple_meta(TupleMeta::new(log.ts, true), rid)?,
                }
                self.update_undo_link(rid, Some(log.prev_version), None::<fn(Option<UndoLink>) -> bool>);
            }
            None => {
                // The transaction inserted this tuple; there is no prior
                // version to restore, so it becomes a dead tombstone.
                heap.update_tuple_meta(TupleMeta::new(0, true), rid)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Version chain heads
    // ------------------------------------------------------------------

    pub fn get_undo_link(&self, rid: Rid) -> Option<UndoLink> {
        self.version_info.lock().get(&rid).copied()
    }

    /// Compare-and-set of the chain head. The optional `check` sees the
    /// current head and may veto the update (detects concurrent chain
    /// mutations). Returns whether the update applied.
    pub fn update_undo_link<F>(&self, rid: Rid, link: Option<UndoLink>, check: Option<F>) -> bool
    where
        F: FnOnce(Option<UndoLink>) -> bool,
    {
        let mut info = self.version_info.lock();
        let current = info.get(&rid).copied();
        if let Some(check) = check {
            if !check(current) {
                return false;
            }
        }
        match link {
            Some(link) => {
                info.insert(rid, link);
            }
            None => {
                info.remove(&rid);
            }
        }
        true
    }

    /// Resolves a link into its undo log; `None` once the owning
    /// transaction has been garbage-collected.
    pub fn get_undo_log_optional(&self, link: UndoLink) -> Option<UndoLog> {
        let txn = self.txn_map.read().get(&link.prev_txn).cloned()?;
        txn.undo_log(link.prev_log_idx)
    }

    /// Resolves a link into its undo log, erroring when it dangles.
    pub fn get_undo_log(&self, link: UndoLink) -> Result<UndoLog> {
        match self.get_undo_log_optional(link) {
            Some(log) => Ok(log),
            None => bail!(
                "undo link ({}, {}) points at a collected transaction",
                link.prev_txn,
                link.prev_log_idx
            ),
        }
    }

    /// Reads the base tuple and the chain head as one atomic snapshot with
    /// respect to [`Self::update_tuple_and_undo_link`].
    pub fn get_tuple_and_undo_link(
        &self,
        heap: &TableHeap,
        rid: Rid,
    ) -> Result<(TupleMeta, Tuple, Option<UndoLink>)> {
        let info = self.version_info.lock();
        let (meta, tuple) = heap.tuple(rid)?;
        let link = info.get(&rid).copied();
        Ok((meta, tuple, link))
    }

    /// Writes the base tuple and the chain head together. `check` may veto
    /// against the current head, in which case nothing is written and
    /// `false` is returned.
    pub fn update_tuple_and_undo_link<F>(
        &self,
        heap: &TableHeap,
        rid: Rid,
        meta: TupleMeta,
        tuple: &Tuple,
        link: Option<UndoLink>,
        check: Option<F>,
    ) -> Result<bool>
    where
        F: FnOnce(Option<UndoLink>) -> bool,
    {
        let mut info = self.version_info.lock();
        let current = info.get(&rid).copied();
        if let Some(check) = check {
            if !check(current) {
                return Ok(false);
            }
        }
        heap.update_tuple_in_place(meta, tuple, rid)?;
        match link {
            Some(link) => {
                info.insert(rid, link);
            }
            None => {
                info.remove(&rid);
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Stop-the-world version-chain pruning. Must not run concurrently
    /// with executors.
    pub fn garbage_collection(&self, catalog: &Catalog) -> Result<()> {
        let watermark = self.watermark();
        let mut reachable: HashSet<TxnId> = HashSet::new();

        for table in catalog.tables() {
            for rid in table.heap.scan_rids()? {
                let meta = table.heap.tuple_meta(rid)?;

                if meta.ts < TXN_START_ID && meta.ts <= watermark {
                    // Every active snapshot already sees the base version;
                    // the whole chain is dead.
                    self.update_undo_link(rid, None, None::<fn(Option<UndoLink>) -> bool>);
                    continue;
                }

                let mut link = self.get_undo_link(rid);
                while let Some(current) = link.filter(|l| l.is_valid()) {
                    let Some(log) = self.get_undo_log_optional(current) else {
                        break;
                    };
                    reachable.insert(current.prev_txn);
                    if log.ts <= watermark {
                        // Last log any snapshot can need; cut the tail.
                        if log.prev_version.is_valid() {
                            if let Some(owner) = self.txn(current.prev_txn) {
                                let mut truncated = log.clone();
                                truncated.prev_version = UndoLink::INVALID;
                                owner.modify_undo_log(current.prev_log_idx, truncated);
                            }
                        }
                        break;
                    }
                    link = Some(log.prev_version);
                }
            }
        }

        let mut txn_map = self.txn_map.write();
        let before = txn_map.len();
        txn_map.retain(|txn_id, txn| {
            matches!(
                txn.state(),
                TransactionState::Running | TransactionState::Tainted
            ) || reachable.contains(txn_id)
        });
        log::debug!(
            "gc at watermark {watermark}: {} of {before} txns retained",
            txn_map.len()
        );
        Ok(())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
