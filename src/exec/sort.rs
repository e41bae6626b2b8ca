//! # External Merge Sort
//!
//! Two-way external sort over buffer-pool pages. `init` pulls the child
//! dry into page-sized sorted runs, then repeatedly merges adjacent runs
//! until one remains; `next` streams that run. Input pages are deleted
//! through the buffer pool as soon as they are consumed, so disk usage of
//! a merge pass is bounded by the data plus one output page.
//!
//! ## Sort Page Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ------------------------------
//! 0       8     tuple_count
//! 8       8     tuple_size   (fixed entry stride)
//! 16      8     tuple_max    (entry capacity)
//! 24      —     entries: [len: u32][tuple bytes][padding to stride]
//! ```
//!
//! The stride is the schema's maximum serialized tuple size plus the
//! length prefix, so any row of the input schema fits any slot.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use eyre::{ensure, Result};

use crate::btree::keys::{read_at, write_at};
use crate::buffer::BufferPoolManager;
use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::table::{Rid, Tuple};
use crate::types::{Schema, SchemaRef};

use super::expr::Expr;
use super::plan::OrderByType;
use super::{Executor, ExecutorContext};

const SORT_PAGE_HEADER: usize = 24;

fn init_sort_page(data: &mut [u8], stride: u64, capacity: u64) {
    write_at::<u64>(data, 0, 0);
    write_at::<u64>(data, 8, stride);
    write_at::<u64>(data, 16, capacity);
}

fn push_entry(data: &mut [u8], tuple: &Tuple) {
    let count = read_at::<u64>(data, 0);
    let stride = read_at::<u64>(data, 8);
    debug_assert!(count < read_at::<u64>(data, 16));
    let offset = SORT_PAGE_HEADER + (count * stride) as usize;
    write_at::<u32>(data, offset, tuple.len() as u32);
    data[offset + 4..offset + 4 + tuple.len()].copy_from_slice(tuple.data());
    write_at::<u64>(data, 0, count + 1);
}

fn read_entries(data: &[u8]) -> VecDeque<Tuple> {
    let count = read_at::<u64>(data, 0);
    let stride = read_at::<u64>(data, 8);
    (0..count)
        .map(|i| {
            let offset = SORT_PAGE_HEADER + (i * stride) as usize;
            let len = read_at::<u32>(data, offset) as usize;
            Tuple::from_bytes(data[offset + 4..offset + 4 + len].to_vec())
        })
        .collect()
}

/// Streams a run's tuples, deleting each page once it has been read.
struct RunCursor {
    bpm: BufferPoolManager,
    pages: VecDeque<PageId>,
    buffer: VecDeque<Tuple>,
}

impl RunCursor {
    fn new(bpm: BufferPoolManager, pages: Vec<PageId>) -> Self {
        Self {
            bpm,
            pages: pages.into(),
            buffer: VecDeque::new(),
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.buffer.is_empty() {
            let Some(pid) = self.pages.pop_front() else {
                return Ok(());
            };
            {
                let guard = self.bpm.read_page(pid)?;
                self.buffer = read_entries(guard.data());
            }
            self.bpm.delete_page(pid);
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<&Tuple>> {
        self.fill()?;
        Ok(self.buffer.front())
    }

    fn take(&mut self) -> Result<Option<Tuple>> {
        self.fill()?;
        Ok(self.buffer.pop_front())
    }
}

/// Accumulates tuples into fresh sort pages.
struct RunWriter {
    bpm: BufferPoolManager,
    stride: u64,
    capacity: u64,
    buffer: Vec<Tuple>,
    pages: Vec<PageId>,
}

impl RunWriter {
    fn new(bpm: BufferPoolManager, stride: u64, capacity: u64) -> Self {
        Self {
            bpm,
            stride,
            capacity,
            buffer: Vec::new(),
            pages: Vec::new(),
        }
    }

    fn push(&mut self, tuple: Tuple) -> Result<()> {
        self.buffer.push(tuple);
        if self.buffer.len() as u64 == self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let pid = self.bpm.new_page();
        ensure!(pid != INVALID_PAGE_ID, "buffer pool exhausted during sort");
        let mut guard = self.bpm.write_page(pid)?;
        init_sort_page(guard.data_mut(), self.stride, self.capacity);
        for tuple in self.buffer.drain(..) {
            push_entry(guard.data_mut(), &tuple);
        }
        self.pages.push(pid);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<PageId>> {
        self.flush()?;
        Ok(self.pages)
    }
}

pub struct SortExecutor {
    child: Box<dyn Executor>,
    order_bys: Vec<(OrderByType, Expr)>,
    schema: SchemaRef,
    bpm: BufferPoolManager,
    stride: u64,
    capacity: u64,
    run: VecDeque<PageId>,
    buffer: VecDeque<Tuple>,
}

impl SortExecutor {
    pub fn new(
        ctx: &ExecutorContext,
        order_bys: Vec<(OrderByType, Expr)>,
        child: Box<dyn Executor>,
    ) -> Result<Self> {
        let schema = child.output_schema();
        let stride = 4 + schema.max_serialized_size() as u64;
        ensure!(
            SORT_PAGE_HEADER + stride as usize <= PAGE_SIZE,
            "rows of this schema are too large for a sort page"
        );
        let capacity = ((PAGE_SIZE - SORT_PAGE_HEADER) as u64) / stride;
        Ok(Self {
            child,
            order_bys,
            schema,
            bpm: ctx.bpm.clone(),
            stride,
            capacity,
            run: VecDeque::new(),
            buffer: VecDeque::new(),
        })
    }

    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        compare_by_order_keys(a, b, &self.schema, &self.order_bys)
    }

    fn merge_runs(&self, a: Vec<PageId>, b: Vec<PageId>) -> Result<Vec<PageId>> {
        let mut left = RunCursor::new(self.bpm.clone(), a);
        let mut right = RunCursor::new(self.bpm.clone(), b);
        let mut out = RunWriter::new(self.bpm.clone(), self.stride, self.capacity);

        loop {
            let take_left = match (left.peek()?, right.peek()?) {
                (Some(x), Some(y)) => self.compare(x, y) != Ordering::Greater,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let tuple = if take_left {
                left.take()?.expect("peeked entry present")
            } else {
                right.take()?.expect("peeked entry present")
            };
            out.push(tuple)?;
        }
        out.finish()
    }

    fn discard_run(&mut self) {
        for pid in self.run.drain(..) {
            self.bpm.delete_page(pid);
        }
        self.buffer.clear();
    }
}

/// Lexicographic comparison over the materialized order keys.
pub(crate) fn compare_by_order_keys(
    a: &Tuple,
    b: &Tuple,
    schema: &Schema,
    order_bys: &[(OrderByType, Expr)],
) -> Ordering {
    for (order, expr) in order_bys {
        let va = expr.eval(a, schema).unwrap_or(crate::types::Value::Null);
        let vb = expr.eval(b, schema).unwrap_or(crate::types::Value::Null);
        let mut ord = va.compare_for_sort(&vb);
        if *order == OrderByType::Desc {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.discard_run();

        // Phase 1: page-sized sorted runs.
        let mut runs: Vec<Vec<PageId>> = Vec::new();
        loop {
            let mut batch: Vec<Tuple> = Vec::with_capacity(self.capacity as usize);
            while (batch.len() as u64) < self.capacity {
                match self.child.next()? {
                    Some((tuple, _)) => batch.push(tuple),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            batch.sort_by(|a, b| self.compare(a, b));

            let mut writer = RunWriter::new(self.bpm.clone(), self.stride, self.capacity);
            for tuple in batch {
                writer.push(tuple)?;
            }
            runs.push(writer.finish()?);
        }

        // Phase 2: two-way merges of adjacent runs until one remains.
        while runs.len() > 1 {
            let mut merged = Vec::with_capacity(runs.len().div_ceil(2));
            let mut iter = runs.into_iter();
            while let Some(a) = iter.next() {
                match iter.next() {
                    Some(b) => merged.push(self.merge_runs(a, b)?),
                    None => merged.push(a),
                }
            }
            runs = merged;
        }

        self.run = runs.pop().unwrap_or_default().into();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        while self.buffer.is_empty() {
            let Some(pid) = self.run.pop_front() else {
                return Ok(None);
            };
            {
                let guard = self.bpm.read_page(pid)?;
                self.buffer = read_entries(guard.data());
            }
            self.bpm.delete_page(pid);
        }
        let tuple = self.buffer.pop_front().expect("buffer refilled above");
        Ok(Some((tuple, Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}

impl Drop for SortExecutor {
    fn drop(&mut self) {
        self.discard_run();
    }
}
