//! # Executors
//!
//! Volcano-style pull execution: every operator exposes `init`/`next` and
//! pulls rows from its children. Execution is single-threaded per query;
//! the shared engine structures (catalog, buffer pool, transaction
//! manager) arrive through the [`ExecutorContext`].
//!
//! ```text
//!          Limit
//!            │ next()
//!          Sort (external merge, sort pages via the buffer pool)
//!            │
//!        HashJoin ──build── SeqScan(right)
//!            │
//!        SeqScan(left)  ← MVCC visibility per row
//! ```
//!
//! Operators:
//!
//! - Access paths: [`SeqScanExecutor`], [`IndexScanExecutor`] (both
//!   snapshot-aware), [`ValuesExecutor`].
//! - Mutations: [`InsertExecutor`], [`UpdateExecutor`], [`DeleteExecutor`]
//!   — stamp temporary timestamps, push undo logs, maintain indexes, and
//!   emit a single count row.
//! - Shapers: [`FilterExecutor`], [`ProjectionExecutor`],
//!   [`LimitExecutor`], [`SortExecutor`], [`AggregationExecutor`].
//! - Joins: [`NestedLoopJoinExecutor`], [`HashJoinExecutor`],
//!   [`NestedIndexJoinExecutor`] — INNER and LEFT.

mod aggregation;
mod delete;
pub mod expr;
mod filter;
mod hash_join;
mod index_scan;
mod insert;
mod limit;
mod nested_index_join;
mod nested_loop_join;
pub mod plan;
mod projection;
mod seq_scan;
mod sort;
mod update;
mod values;

use std::sync::Arc;

use eyre::Result;

use crate::buffer::BufferPoolManager;
use crate::catalog::Catalog;
use crate::mvcc::{Transaction, TransactionManager};
use crate::table::{Rid, Tuple};
use crate::types::{Column, DataType, Schema, SchemaRef};

pub use aggregation::AggregationExecutor;
pub use delete::DeleteExecutor;
pub use expr::{ArithOp, CompareOp, Expr, LogicOp};
pub use filter::FilterExecutor;
pub use hash_join::HashJoinExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use limit::LimitExecutor;
pub use nested_index_join::NestedIndexJoinExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use plan::{
    AggregationNode, AggregationType, DeleteNode, FilterNode, HashJoinNode, IndexScanNode,
    InsertNode, JoinType, LimitNode, NestedIndexJoinNode, NestedLoopJoinNode, OrderByType, Plan,
    ProjectionNode, SeqScanNode, SortNode, UpdateNode, ValuesNode,
};
pub use projection::ProjectionExecutor;
pub use seq_scan::SeqScanExecutor;
pub use sort::SortExecutor;
pub use update::UpdateExecutor;
pub use values::ValuesExecutor;

/// Everything an operator needs from the engine.
#[derive(Clone)]
pub struct ExecutorContext {
    pub catalog: Arc<Catalog>,
    pub bpm: BufferPoolManager,
    pub txn: Arc<Transaction>,
    pub txn_mgr: Arc<TransactionManager>,
}

impl ExecutorContext {
    pub fn new(
        catalog: Arc<Catalog>,
        txn: Arc<Transaction>,
        txn_mgr: Arc<TransactionManager>,
    ) -> Self {
        let bpm = catalog.buffer_pool().clone();
        Self {
            catalog,
            bpm,
            txn,
            txn_mgr,
        }
    }
}

/// A pull-model operator. `init` runs before the first `next`; `next`
/// yields rows until `None`.
pub trait Executor {
    fn init(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>>;
    fn output_schema(&self) -> SchemaRef;
}

/// The one-column schema mutation executors report their row count in.
pub(crate) fn count_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Column::new("count", DataType::BigInt)]))
}

/// Builds the executor tree for a plan.
pub fn create_executor(ctx: &ExecutorContext, plan: &Plan) -> Result<Box<dyn Executor>> {
    Ok(match plan {
        Plan::SeqScan(node) => Box::new(SeqScanExecutor::new(ctx, node)?),
        Plan::IndexScan(node) => Box::new(IndexScanExecutor::new(ctx, node)?),
        Plan::Insert(node) => Box::new(InsertExecutor::new(
            ctx,
            &node.table,
            create_executor(ctx, &node.child)?,
        )?),
        Plan::Update(node) => Box::new(UpdateExecutor::new(
            ctx,
            &node.table,
            node.target_exprs.clone(),
            create_executor(ctx, &node.child)?,
        )?),
        Plan::Delete(node) => Box::new(DeleteExecutor::new(
            ctx,
            &node.table,
            create_executor(ctx, &node.child)?,
        )?),
        Plan::Values(node) => Box::new(ValuesExecutor::new(node)),
        Plan::Filter(node) => Box::new(FilterExecutor::new(
            node.predicate.clone(),
            create_executor(ctx, &node.child)?,
        )),
        Plan::Projection(node) => Box::new(ProjectionExecutor::new(
            node.exprs.clone(),
            node.schema.clone(),
            create_executor(ctx, &node.child)?,
        )),
        Plan::Aggregation(node) => Box::new(AggregationExecutor::new(
            node.group_bys.clone(),
            node.aggregates.clone(),
            node.schema.clone(),
            create_executor(ctx, &node.child)?,
        )),
        Plan::Sort(node) => Box::new(SortExecutor::new(
            ctx,
            node.order_bys.clone(),
            create_executor(ctx, &node.child)?,
        )?),
        Plan::Limit(node) => Box::new(LimitExecutor::new(
            node.limit,
            create_executor(ctx, &node.child)?,
        )),
        Plan::NestedLoopJoin(node) => Box::new(NestedLoopJoinExecutor::new(
            node.predicate.clone(),
            node.join_type,
            create_executor(ctx, &node.left)?,
            create_executor(ctx, &node.right)?,
        )),
        Plan::HashJoin(node) => Box::new(HashJoinExecutor::new(
            node.left_keys.clone(),
            node.right_keys.clone(),
            node.join_type,
            create_executor(ctx, &node.left)?,
            create_executor(ctx, &node.right)?,
        )),
        Plan::NestedIndexJoin(node) => Box::new(NestedIndexJoinExecutor::new(
            ctx,
            node,
            create_executor(ctx, &node.child)?,
        )?),
    })
}

/// Builds, initializes, and drains a plan, collecting the emitted tuples.
pub fn execute(ctx: &ExecutorContext, plan: &Plan) -> Result<Vec<Tuple>> {
    let mut executor = create_executor(ctx, plan)?;
    executor.init()?;
    let mut rows = Vec::new();
    while let Some((tuple, _)) = executor.next()? {
        rows.push(tuple);
    }
    Ok(rows)
}
