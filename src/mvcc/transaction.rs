//! # Transactions
//!
//! Per-transaction state for snapshot isolation: the id (which doubles as
//! the temporary timestamp stamped into uncommitted tuples), the read
//! snapshot, the write set, and the append-only undo buffer other
//! transactions resolve version chains through.
//!
//! ## Timestamp Ranges
//!
//! ```text
//! 0 ─────────────── TXN_START_ID ──────────────► u64::MAX
//!   commit timestamps │ transaction ids = temporary stamps
//! ```
//!
//! A tuple whose meta timestamp is `>= TXN_START_ID` is an uncommitted
//! write, visible only to the transaction whose id equals it. Commit
//! rewrites those stamps with the real commit timestamp.
//!
//! ## States
//!
//! ```text
//! Running ──commit()──► Committed
//!    │ ╲
//!    │  ╲ write-write conflict
//!    │   ▼
//!    │  Tainted ──abort()──► Aborted
//!    └──────────abort()────► Aborted
//! ```
//!
//! `Tainted` is terminal-but-not-final: the transaction failed a write
//! conflict check and may only be aborted.

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::catalog::TableOid;
use crate::config::{Timestamp, TxnId, INVALID_TXN_ID};
use crate::table::{Rid, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    Tainted,
    Committed,
    Aborted,
}

/// Points at one entry of one transaction's undo buffer. The chain head
/// for a RID lives in the transaction manager; each log links to the next
/// older version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoLink {
    pub prev_txn: TxnId,
    pub prev_log_idx: u32,
}

impl UndoLink {
    pub const INVALID: UndoLink = UndoLink {
        prev_txn: INVALID_TXN_ID,
        prev_log_idx: 0,
    };

    pub fn new(prev_txn: TxnId, prev_log_idx: u32) -> Self {
        Self {
            prev_txn,
            prev_log_idx,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.prev_txn != INVALID_TXN_ID
    }
}

/// One recoverable version delta. Only the columns flagged in
/// `modified_fields` are stored in `tuple` (under the projected schema);
/// the rest are inherited from the newer version during reconstruction.
#[derive(Debug, Clone)]
pub struct UndoLog {
    pub is_deleted: bool,
    pub modified_fields: Vec<bool>,
    pub tuple: Tuple,
    pub ts: Timestamp,
    pub prev_version: UndoLink,
}

#[derive(Default)]
struct TxnInner {
    write_set: SmallVec<[(TableOid, Rid); 16]>,
    undo_logs: Vec<UndoLog>,
}

pub struct Transaction {
    txn_id: TxnId,
    isolation_level: IsolationLevel,
    read_ts: Timestamp,
    commit_ts: Mutex<Option<Timestamp>>,
    state: Mutex<TransactionState>,
    inner: Mutex<TxnInner>,
}

impl Transaction {
    pub(crate) fn new(txn_id: TxnId, isolation_level: IsolationLevel, read_ts: Timestamp) -> Self {
        Self {
            txn_id,
            isolation_level,
            read_ts,
            commit_ts: Mutex::new(None),
            state: Mutex::new(TransactionState::Running),
            inner: Mutex::new(TxnInner::default()),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The sentinel timestamp this transaction stamps into tuples it has
    /// modified but not committed. Ids are allocated above `TXN_START_ID`,
    /// so the id itself serves.
    pub fn temp_ts(&self) -> Timestamp {
        self.txn_id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    pub fn commit_ts(&self) -> Option<Timestamp> {
        *self.commit_ts.lock()
    }

    pub(crate) fn set_commit_ts(&self, ts: Timestamp) {
        *self.commit_ts.lock() = Some(ts);
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Marks the transaction as conflicted; only `abort` is legal next.
    pub fn set_tainted(&self) {
        let mut state = self.state.lock();
        if *state == TransactionState::Running {
            *state = TransactionState::Tainted;
        }
    }

    pub fn write_set(&self) -> Vec<(TableOid, Rid)> {
        self.inner.lock().write_set.to_vec()
    }

    pub fn append_write_set(&self, table: TableOid, rid: Rid) {
        self.inner.lock().write_set.push((table, rid));
    }

    /// Appends an undo log and returns the link addressing it.
    pub fn append_undo_log(&self, log: UndoLog) -> UndoLink {
        let mut inner = self.inner.lock();
        inner.undo_logs.push(log);
        UndoLink::new(self.txn_id, inner.undo_logs.len() as u32 - 1)
    }

    /// Rewrites an existing undo log in place (self-modification merges).
    pub fn modify_undo_log(&self, idx: u32, log: UndoLog) {
        let mut inner = self.inner.lock();
        inner.undo_logs[idx as usize] = log;
    }

    pub fn undo_log(&self, idx: u32) -> Option<UndoLog> {
        self.inner.lock().undo_logs.get(idx as usize).cloned()
    }

    pub fn undo_log_count(&self) -> usize {
        self.inner.lock().undo_logs.len()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.txn_id)
            .field("read_ts", &self.read_ts)
            .field("state", &self.state())
            .finish()
    }
}
