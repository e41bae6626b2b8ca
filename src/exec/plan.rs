//! # Plan Nodes
//!
//! Plain-struct descriptions of what each operator should do. A planner or
//! optimizer (external to the engine) produces these; the executor factory
//! in [`super`] turns them into runnable operators. The engine accepts
//! whatever shape it is handed — a sequential scan with an embedded filter
//! and a standalone filter over a bare scan are both valid, as are nested
//! loop and hash formulations of the same join.

use crate::types::{Schema, Value};

use super::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByType {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub enum Plan {
    SeqScan(SeqScanNode),
    IndexScan(IndexScanNode),
    Insert(InsertNode),
    Update(UpdateNode),
    Delete(DeleteNode),
    Values(ValuesNode),
    Filter(FilterNode),
    Projection(ProjectionNode),
    Aggregation(AggregationNode),
    Sort(SortNode),
    Limit(LimitNode),
    NestedLoopJoin(NestedLoopJoinNode),
    HashJoin(HashJoinNode),
    NestedIndexJoin(NestedIndexJoinNode),
}

#[derive(Debug, Clone)]
pub struct SeqScanNode {
    pub table: String,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct IndexScanNode {
    pub table: String,
    pub index: String,
    /// Point-lookup keys; empty means a full ordered scan of the index.
    pub pred_keys: Vec<Value>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct InsertNode {
    pub table: String,
    pub child: Box<Plan>,
}

#[derive(Debug, Clone)]
pub struct UpdateNode {
    pub table: String,
    pub child: Box<Plan>,
    /// One expression per table column, evaluated against the old row.
    pub target_exprs: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct DeleteNode {
    pub table: String,
    pub child: Box<Plan>,
}

#[derive(Debug, Clone)]
pub struct ValuesNode {
    pub schema: Schema,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone)]
pub struct FilterNode {
    pub child: Box<Plan>,
    pub predicate: Expr,
}

#[derive(Debug, Clone)]
pub struct ProjectionNode {
    pub child: Box<Plan>,
    pub exprs: Vec<Expr>,
    pub schema: Schema,
}

#[derive(Debug, Clone)]
pub struct AggregationNode {
    pub child: Box<Plan>,
    pub group_bys: Vec<Expr>,
    pub aggregates: Vec<(AggregationType, Expr)>,
    /// Group-by columns followed by one column per aggregate.
    pub schema: Schema,
}

#[derive(Debug, Clone)]
pub struct SortNode {
    pub child: Box<Plan>,
    pub order_bys: Vec<(OrderByType, Expr)>,
}

#[derive(Debug, Clone)]
pub struct LimitNode {
    pub child: Box<Plan>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct NestedLoopJoinNode {
    pub left: Box<Plan>,
    pub right: Box<Plan>,
    pub predicate: Expr,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub struct HashJoinNode {
    pub left: Box<Plan>,
    pub right: Box<Plan>,
    pub left_keys: Vec<Expr>,
    pub right_keys: Vec<Expr>,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub struct NestedIndexJoinNode {
    /// Outer input.
    pub child: Box<Plan>,
    pub inner_table: String,
    pub inner_index: String,
    /// Evaluated against each outer row to produce the probe key.
    pub key_expr: Expr,
    pub join_type: JoinType,
}
