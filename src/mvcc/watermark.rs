//! # Watermark
//!
//! Tracks the multiset of active read timestamps and answers "what is the
//! oldest snapshot anyone still reads?" in O(1). The watermark floors
//! version-chain truncation: undo logs strictly below it can never be
//! needed again.
//!
//! ## Representation
//!
//! A count map (several transactions may share a read timestamp) plus a
//! min-heap cleaned lazily: `remove` only pops stale heap entries when the
//! departing timestamp was the minimum, so both operations stay O(log n).
//! With no active readers the watermark falls back to the last commit
//! timestamp.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use eyre::{ensure, Result};
use hashbrown::HashMap;

use crate::config::Timestamp;

#[derive(Debug, Default)]
pub struct Watermark {
    commit_ts: Timestamp,
    watermark: Timestamp,
    current_reads: HashMap<Timestamp, usize>,
    read_queue: BinaryHeap<Reverse<Timestamp>>,
}

impl Watermark {
    pub fn new(commit_ts: Timestamp) -> Self {
        Self {
            commit_ts,
            watermark: commit_ts,
            current_reads: HashMap::new(),
            read_queue: BinaryHeap::new(),
        }
    }

    /// Registers an active reader. A read timestamp below the last commit
    /// timestamp is a bookkeeping error.
    pub fn add_txn(&mut self, read_ts: Timestamp) -> Result<()> {
        ensure!(
            read_ts >= self.commit_ts,
            "read ts {read_ts} below commit ts {}",
            self.commit_ts
        );
        match self.current_reads.get_mut(&read_ts) {
            Some(count) => *count += 1,
            None => {
                self.current_reads.insert(read_ts, 1);
                self.read_queue.push(Reverse(read_ts));
            }
        }
        if read_ts < self.watermark || self.current_reads.len() == 1 {
            self.watermark = read_ts;
        }
        Ok(())
    }

    /// Deregisters an active reader.
    pub fn remove_txn(&mut self, read_ts: Timestamp) -> Result<()> {
        let count = self
            .current_reads
            .get_mut(&read_ts)
            .ok_or_else(|| eyre::eyre!("read ts {read_ts} not active"))?;
        *count -= 1;
        if *count == 0 {
            self.current_reads.remove(&read_ts);
            // Lazy cleanup: drop heap tops that no longer have readers.
            while let Some(Reverse(top)) = self.read_queue.peek() {
                if self.current_reads.contains_key(top) {
                    break;
                }
                self.read_queue.pop();
            }
        }

        if read_ts == self.watermark {
            self.watermark = match self.read_queue.peek() {
                Some(Reverse(top)) => *top,
                None => self.commit_ts,
            };
        }
        Ok(())
    }

    /// Publishes a newer commit timestamp (the fallback when no reader is
    /// active).
    pub fn update_commit_ts(&mut self, commit_ts: Timestamp) {
        self.commit_ts = commit_ts;
        if self.current_reads.is_empty() {
            self.watermark = commit_ts;
        }
    }

    /// The minimum active read timestamp, or the last commit timestamp
    /// when nobody reads.
    pub fn watermark(&self) -> Timestamp {
        if self.current_reads.is_empty() {
            self.commit_ts
        } else {
            self.watermark
        }
    }

    pub fn active_count(&self) -> usize {
        self.current_reads.values().sum()
    }
}
