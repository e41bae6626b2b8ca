//! # Executor Integration Tests
//!
//! End-to-end operator pipelines over real tables: scans through indexes,
//! aggregation edge cases, external sort, limits, and all three join
//! flavors with INNER/LEFT NULL-padding semantics.

use std::sync::Arc;

use coraldb::buffer::BufferPoolManager;
use coraldb::catalog::{Catalog, IndexKind};
use coraldb::exec::{
    self, AggregationNode, AggregationType, CompareOp, DeleteNode, Expr, ExecutorContext,
    HashJoinNode, IndexScanNode, InsertNode, JoinType, LimitNode, NestedIndexJoinNode,
    NestedLoopJoinNode, OrderByType, Plan, ProjectionNode, SeqScanNode, SortNode, ValuesNode,
};
use coraldb::mvcc::{IsolationLevel, Transaction, TransactionManager};
use coraldb::storage::DiskManager;
use coraldb::types::{Column, DataType, Schema, Value};
use tempfile::tempdir;

fn users_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::BigInt),
        Column::varchar("name", 16),
        Column::new("dept", DataType::BigInt),
        Column::new("score", DataType::Integer),
    ])
}

fn depts_schema() -> Schema {
    Schema::new(vec![
        Column::new("dept_id", DataType::BigInt),
        Column::varchar("dept_name", 16),
    ])
}

struct Engine {
    _dir: tempfile::TempDir,
    catalog: Arc<Catalog>,
    txn_mgr: Arc<TransactionManager>,
}

impl Engine {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(256, 2, disk);
        let catalog = Arc::new(Catalog::new(bpm));
        catalog.create_table("users", users_schema()).unwrap();
        catalog.create_table("depts", depts_schema()).unwrap();
        catalog
            .create_index("users_pk", "users", 0, IndexKind::BPlusTree)
            .unwrap();
        catalog
            .create_index("depts_pk", "depts", 0, IndexKind::Hash)
            .unwrap();
        Self {
            _dir: dir,
            catalog,
            txn_mgr: Arc::new(TransactionManager::new()),
        }
    }

    fn ctx(&self, txn: &Arc<Transaction>) -> ExecutorContext {
        ExecutorContext::new(
            Arc::clone(&self.catalog),
            Arc::clone(txn),
            Arc::clone(&self.txn_mgr),
        )
    }

    fn begin(&self) -> Arc<Transaction> {
        self.txn_mgr.begin(IsolationLevel::SnapshotIsolation)
    }

    fn run(&self, txn: &Arc<Transaction>, plan: &Plan) -> Vec<Vec<Value>> {
        let ctx = self.ctx(txn);
        let mut executor = exec::create_executor(&ctx, plan).unwrap();
        executor.init().unwrap();
        let schema = executor.output_schema();
        let mut rows = Vec::new();
        while let Some((tuple, _)) = executor.next().unwrap() {
            rows.push(tuple.values(&schema).unwrap());
        }
        rows
    }

    fn seed(&self) {
        let txn = self.begin();
        let users: Vec<Vec<Expr>> = [
            (1i64, "alice", Some(10i64), Some(90)),
            (2, "bob", Some(10), Some(70)),
            (3, "carol", Some(20), None),
            (4, "dave", None, Some(50)),
            (5, "erin", Some(30), Some(70)),
        ]
        .into_iter()
        .map(|(id, name, dept, score)| {
            vec![
                Expr::constant(Value::BigInt(id)),
                Expr::constant(Value::Varchar(name.into())),
                Expr::constant(dept.map(Value::BigInt).unwrap_or(Value::Null)),
                Expr::constant(score.map(Value::Integer).unwrap_or(Value::Null)),
            ]
        })
        .collect();
        let plan = Plan::Insert(InsertNode {
            table: "users".into(),
            child: Box::new(Plan::Values(ValuesNode {
                schema: users_schema(),
                rows: users,
            })),
        });
        let count = self.run(&txn, &plan);
        assert_eq!(count, vec![vec![Value::BigInt(5)]]);

        let depts: Vec<Vec<Expr>> = [(10i64, "eng"), (20, "sales")]
            .into_iter()
            .map(|(id, name)| {
                vec![
                    Expr::constant(Value::BigInt(id)),
                    Expr::constant(Value::Varchar(name.into())),
                ]
            })
            .collect();
        let plan = Plan::Insert(InsertNode {
            table: "depts".into(),
            child: Box::new(Plan::Values(ValuesNode {
                schema: depts_schema(),
                rows: depts,
            })),
        });
        self.run(&txn, &plan);
        self.txn_mgr.commit(&txn, &self.catalog).unwrap();
    }
}

fn big(v: i64) -> Value {
    Value::BigInt(v)
}

#[test]
fn index_scan_point_and_full() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    let point = Plan::IndexScan(IndexScanNode {
        table: "users".into(),
        index: "users_pk".into(),
        pred_keys: vec![big(3), big(5), big(99)],
        filter: None,
    });
    let rows = engine.run(&txn, &point);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], Value::Varchar("carol".into()));
    assert_eq!(rows[1][1], Value::Varchar("erin".into()));

    let full = Plan::IndexScan(IndexScanNode {
        table: "users".into(),
        index: "users_pk".into(),
        pred_keys: vec![],
        filter: None,
    });
    let rows = engine.run(&txn, &full);
    let ids: Vec<Value> = rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids, vec![big(1), big(2), big(3), big(4), big(5)]);
}

#[test]
fn aggregation_with_groups_and_null_inputs() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    // SELECT dept, COUNT(*), COUNT(score), SUM(score), MIN(score), MAX(score)
    // FROM users GROUP BY dept, ordered by dept for determinism.
    let agg_schema = Schema::new(vec![
        Column::new("dept", DataType::BigInt),
        Column::new("cnt_star", DataType::BigInt),
        Column::new("cnt_score", DataType::BigInt),
        Column::new("sum_score", DataType::Integer),
        Column::new("min_score", DataType::Integer),
        Column::new("max_score", DataType::Integer),
    ]);
    let plan = Plan::Sort(SortNode {
        child: Box::new(Plan::Aggregation(AggregationNode {
            child: Box::new(Plan::SeqScan(SeqScanNode {
                table: "users".into(),
                filter: None,
            })),
            group_bys: vec![Expr::column(2)],
            aggregates: vec![
                (AggregationType::CountStar, Expr::column(0)),
                (AggregationType::Count, Expr::column(3)),
                (AggregationType::Sum, Expr::column(3)),
                (AggregationType::Min, Expr::column(3)),
                (AggregationType::Max, Expr::column(3)),
            ],
            schema: agg_schema,
        })),
        order_bys: vec![(OrderByType::Asc, Expr::column(0))],
    });

    let rows = engine.run(&txn, &plan);
    assert_eq!(
        rows,
        vec![
            // NULL group sorts first.
            vec![Value::Null, big(1), big(1), Value::Integer(50), Value::Integer(50), Value::Integer(50)],
            vec![big(10), big(2), big(2), Value::Integer(160), Value::Integer(70), Value::Integer(90)],
            vec![big(20), big(1), Value::Null, Value::Null, Value::Null, Value::Null],
            vec![big(30), big(1), big(1), Value::Integer(70), Value::Integer(70), Value::Integer(70)],
        ]
    );
}

#[test]
fn aggregation_of_empty_input_without_groups() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    let agg_schema = Schema::new(vec![
        Column::new("cnt", DataType::BigInt),
        Column::new("max_score", DataType::Integer),
    ]);
    let plan = Plan::Aggregation(AggregationNode {
        child: Box::new(Plan::SeqScan(SeqScanNode {
            table: "users".into(),
            filter: Some(Expr::eq(Expr::column(0), Expr::constant(big(-1)))),
        })),
        group_bys: vec![],
        aggregates: vec![
            (AggregationType::CountStar, Expr::column(0)),
            (AggregationType::Max, Expr::column(3)),
        ],
        schema: agg_schema,
    });

    let rows = engine.run(&txn, &plan);
    assert_eq!(rows, vec![vec![big(0), Value::Null]]);
}

#[test]
fn sort_orders_rows_and_limit_truncates() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    // score DESC with NULLs first under the total order, then id ASC.
    let plan = Plan::Limit(LimitNode {
        child: Box::new(Plan::Sort(SortNode {
            child: Box::new(Plan::SeqScan(SeqScanNode {
                table: "users".into(),
                filter: None,
            })),
            order_bys: vec![
                (OrderByType::Desc, Expr::column(3)),
                (OrderByType::Asc, Expr::column(0)),
            ],
        })),
        limit: 3,
    });

    let rows = engine.run(&txn, &plan);
    let ids: Vec<Value> = rows.iter().map(|r| r[0].clone()).collect();
    // Desc on scores 90, 70, 70 (ties broken by id), NULL last under DESC.
    assert_eq!(ids, vec![big(1), big(2), big(5)]);
}

#[test]
fn external_sort_handles_many_pages_of_rows() {
    let engine = Engine::new();
    let txn = engine.begin();

    let rows: Vec<Vec<Expr>> = (0..2000i64)
        .map(|i| {
            let key = (i * 7919) % 2000; // shuffled but distinct
            vec![
                Expr::constant(big(key)),
                Expr::constant(Value::Varchar(format!("r{key:04}"))),
                Expr::constant(big(key % 7)),
                Expr::constant(Value::Integer((key % 100) as i32)),
            ]
        })
        .collect();
    let insert = Plan::Insert(InsertNode {
        table: "users".into(),
        child: Box::new(Plan::Values(ValuesNode {
            schema: users_schema(),
            rows,
        })),
    });
    engine.run(&txn, &insert);
    engine.txn_mgr.commit(&txn, &engine.catalog).unwrap();

    let reader = engine.begin();
    let plan = Plan::Sort(SortNode {
        child: Box::new(Plan::SeqScan(SeqScanNode {
            table: "users".into(),
            filter: None,
        })),
        order_bys: vec![(OrderByType::Asc, Expr::column(0))],
    });
    let sorted = engine.run(&reader, &plan);
    assert_eq!(sorted.len(), 2000);
    for (i, row) in sorted.iter().enumerate() {
        assert_eq!(row[0], big(i as i64), "row {i} out of order");
    }
}

#[test]
fn nested_loop_join_inner_and_left() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    let join_on_dept = |join_type| {
        Plan::NestedLoopJoin(NestedLoopJoinNode {
            left: Box::new(Plan::SeqScan(SeqScanNode {
                table: "users".into(),
                filter: None,
            })),
            right: Box::new(Plan::SeqScan(SeqScanNode {
                table: "depts".into(),
                filter: None,
            })),
            predicate: Expr::eq(Expr::column(2), Expr::right_column(0)),
            join_type,
        })
    };

    let inner = engine.run(&txn, &join_on_dept(JoinType::Inner));
    // alice, bob (eng) and carol (sales); dave has a NULL dept, erin's
    // dept 30 has no row.
    assert_eq!(inner.len(), 3);

    let left = engine.run(&txn, &join_on_dept(JoinType::Left));
    assert_eq!(left.len(), 5);
    let dave = left
        .iter()
        .find(|r| r[1] == Value::Varchar("dave".into()))
        .unwrap();
    assert_eq!(dave[4], Value::Null, "unmatched outer padded with NULLs");
    assert_eq!(dave[5], Value::Null);
}

#[test]
fn hash_join_matches_nested_loop_semantics() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    let join = |join_type| {
        Plan::HashJoin(HashJoinNode {
            left: Box::new(Plan::SeqScan(SeqScanNode {
                table: "users".into(),
                filter: None,
            })),
            right: Box::new(Plan::SeqScan(SeqScanNode {
                table: "depts".into(),
                filter: None,
            })),
            left_keys: vec![Expr::column(2)],
            right_keys: vec![Expr::column(0)],
            join_type,
        })
    };

    let inner = engine.run(&txn, &join(JoinType::Inner));
    assert_eq!(inner.len(), 3);

    let left = engine.run(&txn, &join(JoinType::Left));
    assert_eq!(left.len(), 5);
    for row in &left {
        if row[1] == Value::Varchar("dave".into()) || row[1] == Value::Varchar("erin".into()) {
            assert_eq!(row[4], Value::Null);
        } else {
            assert_ne!(row[4], Value::Null);
        }
    }
}

#[test]
fn nested_index_join_null_key_inner_vs_left() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    let join = |join_type| {
        Plan::NestedIndexJoin(NestedIndexJoinNode {
            child: Box::new(Plan::SeqScan(SeqScanNode {
                table: "users".into(),
                filter: None,
            })),
            inner_table: "depts".into(),
            inner_index: "depts_pk".into(),
            key_expr: Expr::column(2),
            join_type,
        })
    };

    // INNER: dave's NULL key and erin's dangling dept 30 both vanish.
    let inner = engine.run(&txn, &join(JoinType::Inner));
    assert_eq!(inner.len(), 3);

    // LEFT: both come back padded with NULLs in the inner columns.
    let left = engine.run(&txn, &join(JoinType::Left));
    assert_eq!(left.len(), 5);
    let dave = left
        .iter()
        .find(|r| r[1] == Value::Varchar("dave".into()))
        .unwrap();
    assert_eq!(dave[4], Value::Null);
    assert_eq!(dave[5], Value::Null);
}

#[test]
fn delete_removes_rows_and_index_entries() {
    let engine = Engine::new();
    engine.seed();

    let txn = engine.begin();
    let plan = Plan::Delete(DeleteNode {
        table: "users".into(),
        child: Box::new(Plan::SeqScan(SeqScanNode {
            table: "users".into(),
            filter: Some(Expr::compare(
                CompareOp::LtEq,
                Expr::column(0),
                Expr::constant(big(2)),
            )),
        })),
    });
    let count = engine.run(&txn, &plan);
    assert_eq!(count, vec![vec![big(2)]]);
    engine.txn_mgr.commit(&txn, &engine.catalog).unwrap();

    let reader = engine.begin();
    let remaining = engine.run(
        &reader,
        &Plan::SeqScan(SeqScanNode {
            table: "users".into(),
            filter: None,
        }),
    );
    assert_eq!(remaining.len(), 3);

    // The point lookups find nothing: index entries went with the rows.
    let probe = engine.run(
        &reader,
        &Plan::IndexScan(IndexScanNode {
            table: "users".into(),
            index: "users_pk".into(),
            pred_keys: vec![big(1), big(2)],
            filter: None,
        }),
    );
    assert!(probe.is_empty());
}

#[test]
fn duplicate_primary_key_taints_the_transaction() {
    let engine = Engine::new();
    engine.seed();

    let txn = engine.begin();
    let ctx = engine.ctx(&txn);
    let plan = Plan::Insert(InsertNode {
        table: "users".into(),
        child: Box::new(Plan::Values(ValuesNode {
            schema: users_schema(),
            rows: vec![vec![
                Expr::constant(big(1)), // id 1 already exists
                Expr::constant(Value::Varchar("dup".into())),
                Expr::constant(Value::Null),
                Expr::constant(Value::Null),
            ]],
        })),
    });
    let mut executor = exec::create_executor(&ctx, &plan).unwrap();
    executor.init().unwrap();
    assert!(executor.next().is_err());
    engine.txn_mgr.abort(&txn, &engine.catalog).unwrap();
}

#[test]
fn projection_reshapes_rows() {
    let engine = Engine::new();
    engine.seed();
    let txn = engine.begin();

    let plan = Plan::Projection(ProjectionNode {
        child: Box::new(Plan::SeqScan(SeqScanNode {
            table: "users".into(),
            filter: None,
        })),
        exprs: vec![Expr::column(1), Expr::column(0)],
        schema: Schema::new(vec![
            Column::varchar("name", 16),
            Column::new("id", DataType::BigInt),
        ]),
    });
    let rows = engine.run(&txn, &plan);
    assert_eq!(rows[0], vec![Value::Varchar("alice".into()), big(1)]);
    assert_eq!(rows.len(), 5);
}
