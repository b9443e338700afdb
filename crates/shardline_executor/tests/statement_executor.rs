//! Integration tests for the statement executor.
//!
//! Validates:
//! - SE-1: Empty unit list returns empty/zero/false and emits nothing
//! - SE-2: executeQuery returns one slot per unit, in unit order
//! - SE-3: executeUpdate sums per-unit counts; absorbed failures count as zero
//! - SE-4: execute ORs the per-unit "has result set" flags
//! - SE-5: Generated-keys requests reach the shard handle unchanged
//! - SE-6: Fail-fast runs every unit, then raises one abort error
//! - SE-7: Exception policy is per call, never shared between callers
//! - SE-8: Event stream carries shard, SQL, parameters and the original error

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use shardline_common::config::ExecutorConfig;
use shardline_common::context::{ExceptionPolicy, ExecutionContext};
use shardline_common::error::{ShardError, ShardlineError};
use shardline_common::value::ParamValue;
use shardline_executor::{
    AggregatedResult, EventKind, EventSink, ExecuteUnit, ExecutionEngine, ExecutionEvent,
    GeneratedKeys, KeysMode, RouteUnit, ShardStatement, SqlShape,
};

const DQL_SQL: &str = "SELECT * FROM table_x";
const DML_SQL: &str = "DELETE FROM table_x";

#[derive(Debug, Clone, PartialEq)]
enum NativeCall {
    Query(String),
    Update(String, GeneratedKeys),
    Execute(String, GeneratedKeys),
}

/// Scripted shard statement that records every native call.
struct MockStatement {
    query_reply: Result<String, ShardError>,
    update_reply: Result<u64, ShardError>,
    execute_reply: Result<bool, ShardError>,
    delay: Duration,
    panics: bool,
    calls: Vec<NativeCall>,
}

impl MockStatement {
    fn new() -> Self {
        Self {
            query_reply: Ok("rs".into()),
            update_reply: Ok(0),
            execute_reply: Ok(false),
            delay: Duration::ZERO,
            panics: false,
            calls: Vec::new(),
        }
    }

    fn query_ok(mut self, handle: &str) -> Self {
        self.query_reply = Ok(handle.to_string());
        self
    }

    fn update_ok(mut self, count: u64) -> Self {
        self.update_reply = Ok(count);
        self
    }

    fn execute_ok(mut self, has_result_set: bool) -> Self {
        self.execute_reply = Ok(has_result_set);
        self
    }

    fn fails(mut self, error: ShardError) -> Self {
        self.query_reply = Err(error.clone());
        self.update_reply = Err(error.clone());
        self.execute_reply = Err(error);
        self
    }

    fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    fn pause(&self) {
        thread::sleep(self.delay);
        if self.panics {
            panic!("driver bug");
        }
    }
}

impl ShardStatement for MockStatement {
    type ResultSet = String;

    fn execute_query(&mut self, sql: &str, _params: &[ParamValue]) -> Result<String, ShardError> {
        self.calls.push(NativeCall::Query(sql.to_string()));
        self.pause();
        self.query_reply.clone()
    }

    fn execute_update(
        &mut self,
        sql: &str,
        _params: &[ParamValue],
        keys: &GeneratedKeys,
    ) -> Result<u64, ShardError> {
        self.calls.push(NativeCall::Update(sql.to_string(), keys.clone()));
        self.pause();
        self.update_reply.clone()
    }

    fn execute(
        &mut self,
        sql: &str,
        _params: &[ParamValue],
        keys: &GeneratedKeys,
    ) -> Result<bool, ShardError> {
        self.calls.push(NativeCall::Execute(sql.to_string(), keys.clone()));
        self.pause();
        self.execute_reply.clone()
    }
}

type Handles = Vec<Arc<Mutex<MockStatement>>>;

fn engine() -> (ExecutionEngine, Receiver<ExecutionEvent>) {
    engine_with_workers(4)
}

fn engine_with_workers(workers: usize) -> (ExecutionEngine, Receiver<ExecutionEvent>) {
    let cfg = ExecutorConfig {
        worker_threads: workers,
        queue_capacity: 64,
        thread_name_prefix: "se-test".into(),
        ..Default::default()
    };
    let (sink, rx) = EventSink::channel();
    (ExecutionEngine::new(&cfg, sink).unwrap(), rx)
}

fn units(sql: &str, shards: Vec<(&str, MockStatement)>) -> (Vec<ExecuteUnit<MockStatement>>, Handles) {
    let mut units = Vec::new();
    let mut handles = Vec::new();
    for (shard, stmt) in shards {
        let handle = Arc::new(Mutex::new(stmt));
        units.push(ExecuteUnit::new(RouteUnit::new(shard, sql), Arc::clone(&handle)));
        handles.push(handle);
    }
    (units, handles)
}

fn fail_safe() -> ExecutionContext {
    ExecutionContext::new(1)
}

fn fail_fast() -> ExecutionContext {
    ExecutionContext::new(1).with_exception_policy(ExceptionPolicy::AbortOnFailure)
}

fn kind_counts(events: &[ExecutionEvent]) -> HashMap<EventKind, usize> {
    let mut counts = HashMap::new();
    for e in events {
        *counts.entry(e.kind()).or_insert(0) += 1;
    }
    counts
}

fn count(events: &[ExecutionEvent], kind: EventKind) -> usize {
    kind_counts(events).get(&kind).copied().unwrap_or(0)
}

fn shard_count(events: &[ExecutionEvent], shard: &str) -> usize {
    events.iter().filter(|e| e.unit().shard == shard).count()
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-1: No units
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se1_no_statement() {
    let (engine, rx) = engine();
    let (units, _) = units(DQL_SQL, vec![]);
    let actual = engine.statement(SqlShape::Query, units);
    let ctx = fail_safe();
    assert!(!actual.execute(&ctx, GeneratedKeys::Unspecified).unwrap());
    assert_eq!(actual.execute_update(&ctx, GeneratedKeys::Unspecified).unwrap(), 0);
    assert!(actual.execute_query(&ctx).unwrap().is_empty());
    assert_eq!(rx.try_iter().count(), 0);
    assert_eq!(engine.pool_snapshot().submitted, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-2: executeQuery
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se2_query_single_statement_success() {
    let (engine, rx) = engine();
    let (units, handles) = units(DQL_SQL, vec![("ds_0", MockStatement::new().query_ok("rs_0"))]);
    let actual = engine.statement(SqlShape::Query, units);

    assert_eq!(actual.execute_query(&fail_safe()).unwrap(), vec![Some("rs_0".to_string())]);
    assert_eq!(handles[0].lock().calls, vec![NativeCall::Query(DQL_SQL.into())]);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(shard_count(&events, "ds_0"), 2);
    assert!(events.iter().all(|e| e.unit().sql == DQL_SQL));
    assert!(events.iter().all(|e| e.unit().parameters.is_empty()));
    assert_eq!(events[0].kind(), EventKind::BeforeExecute);
    assert_eq!(events[1].kind(), EventKind::Success);
    assert!(events.iter().all(|e| e.error().is_none()));
}

#[test]
fn test_se2_query_multiple_statements_success() {
    let (engine, rx) = engine();
    let (units, handles) = units(
        DQL_SQL,
        vec![
            ("ds_0", MockStatement::new().query_ok("rs_0")),
            ("ds_1", MockStatement::new().query_ok("rs_1")),
        ],
    );
    let actual = engine.statement(SqlShape::Query, units);

    assert_eq!(
        actual.execute_query(&fail_safe()).unwrap(),
        vec![Some("rs_0".to_string()), Some("rs_1".to_string())]
    );
    for h in &handles {
        assert_eq!(h.lock().calls, vec![NativeCall::Query(DQL_SQL.into())]);
    }

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(shard_count(&events, "ds_0"), 2);
    assert_eq!(shard_count(&events, "ds_1"), 2);
    assert_eq!(count(&events, EventKind::BeforeExecute), 2);
    assert_eq!(count(&events, EventKind::Success), 2);
    assert_eq!(count(&events, EventKind::Failure), 0);
}

#[test]
fn test_se2_query_single_statement_failure() {
    let (engine, rx) = engine();
    let err = ShardError::new("table_x does not exist").with_sql_state("42S02");
    let (units, _) = units(DQL_SQL, vec![("ds_0", MockStatement::new().fails(err.clone()))]);
    let actual = engine.statement(SqlShape::Query, units);

    assert_eq!(actual.execute_query(&fail_safe()).unwrap(), vec![None]);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 1);
    assert_eq!(count(&events, EventKind::Failure), 1);
    assert_eq!(events[1].error(), Some(&err));
}

#[test]
fn test_se2_query_multiple_statements_failure() {
    let (engine, rx) = engine();
    let err = ShardError::new("connection reset");
    let (units, _) = units(
        DQL_SQL,
        vec![
            ("ds_0", MockStatement::new().fails(err.clone())),
            ("ds_1", MockStatement::new().fails(err.clone())),
        ],
    );
    let actual = engine.statement(SqlShape::Query, units);

    assert_eq!(actual.execute_query(&fail_safe()).unwrap(), vec![None, None]);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 2);
    assert_eq!(count(&events, EventKind::Failure), 2);
    assert!(events
        .iter()
        .filter(|e| e.kind() == EventKind::Failure)
        .all(|e| e.error() == Some(&err)));
}

#[test]
fn test_se2_query_order_follows_units_not_completion() {
    let (engine, _rx) = engine();
    // ds_0 is slowest, ds_3 finishes first.
    let (units, _) = units(
        DQL_SQL,
        vec![
            ("ds_0", MockStatement::new().query_ok("rs_0").delay_ms(80)),
            ("ds_1", MockStatement::new().query_ok("rs_1").delay_ms(50)),
            ("ds_2", MockStatement::new().query_ok("rs_2").delay_ms(20)),
            ("ds_3", MockStatement::new().query_ok("rs_3")),
        ],
    );
    let actual = engine.statement(SqlShape::Query, units);
    let rs: Vec<_> = actual
        .execute_query(&fail_safe())
        .unwrap()
        .into_iter()
        .map(|h| h.unwrap_or_default())
        .collect();
    assert_eq!(rs, vec!["rs_0", "rs_1", "rs_2", "rs_3"]);
}

#[test]
fn test_se2_query_failure_only_affects_its_slot() {
    let (engine, rx) = engine();
    let (units, _) = units(
        DQL_SQL,
        vec![
            ("ds_0", MockStatement::new().query_ok("rs_0")),
            ("ds_1", MockStatement::new().fails(ShardError::new("ds_1 down"))),
            ("ds_2", MockStatement::new().query_ok("rs_2")),
        ],
    );
    let actual = engine.statement(SqlShape::Query, units);
    assert_eq!(
        actual.execute_query(&fail_safe()).unwrap(),
        vec![Some("rs_0".to_string()), None, Some("rs_2".to_string())]
    );
    let failures: Vec<_> = rx
        .try_iter()
        .filter(|e| e.kind() == EventKind::Failure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].unit().shard, "ds_1");
    assert_eq!(failures[0].unit().unit_index, 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-3: executeUpdate
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se3_update_single_statement_success() {
    let (engine, rx) = engine();
    let (units, handles) = units(DML_SQL, vec![("ds_0", MockStatement::new().update_ok(10))]);
    let actual = engine.statement(SqlShape::Update, units);

    assert_eq!(actual.execute_update(&fail_safe(), GeneratedKeys::Unspecified).unwrap(), 10);
    assert_eq!(
        handles[0].lock().calls,
        vec![NativeCall::Update(DML_SQL.into(), GeneratedKeys::Unspecified)]
    );
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 1);
    assert_eq!(count(&events, EventKind::Success), 1);
}

#[test]
fn test_se3_update_multiple_statements_success() {
    let (engine, rx) = engine();
    let (units, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().update_ok(10)),
            ("ds_1", MockStatement::new().update_ok(20)),
        ],
    );
    let actual = engine.statement(SqlShape::Update, units);

    assert_eq!(actual.execute_update(&fail_safe(), GeneratedKeys::Unspecified).unwrap(), 30);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 2);
    assert_eq!(count(&events, EventKind::Success), 2);
}

#[test]
fn test_se3_update_single_statement_failure() {
    let (engine, rx) = engine();
    let err = ShardError::new("deadlock detected").with_vendor_code(1213);
    let (units, _) = units(DML_SQL, vec![("ds_0", MockStatement::new().fails(err.clone()))]);
    let actual = engine.statement(SqlShape::Update, units);

    assert_eq!(actual.execute_update(&fail_safe(), GeneratedKeys::Unspecified).unwrap(), 0);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 1);
    assert_eq!(count(&events, EventKind::Failure), 1);
    assert_eq!(events[1].error(), Some(&err));
}

#[test]
fn test_se3_update_multiple_statements_failure() {
    let (engine, rx) = engine();
    let err0 = ShardError::new("ds_0 read-only");
    let err1 = ShardError::new("ds_1 read-only");
    let (units, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().fails(err0.clone())),
            ("ds_1", MockStatement::new().fails(err1.clone())),
        ],
    );
    let actual = engine.statement(SqlShape::Update, units);

    assert_eq!(actual.execute_update(&fail_safe(), GeneratedKeys::Unspecified).unwrap(), 0);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 2);
    assert_eq!(count(&events, EventKind::Failure), 2);
    for e in events.iter().filter(|e| e.kind() == EventKind::Failure) {
        let expected = if e.unit().shard == "ds_0" { &err0 } else { &err1 };
        assert_eq!(e.error(), Some(expected));
    }
}

#[test]
fn test_se3_update_partial_failure_counts_zero() {
    let (engine, _rx) = engine();
    let (units, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().update_ok(10)),
            ("ds_1", MockStatement::new().fails(ShardError::new("timeout"))),
        ],
    );
    let actual = engine.statement(SqlShape::Update, units);
    assert_eq!(actual.execute_update(&fail_safe(), GeneratedKeys::Unspecified).unwrap(), 10);
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-4: execute
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se4_execute_dml_single_and_multiple() {
    let (engine, rx) = engine();
    let (single, _) = units(DML_SQL, vec![("ds_0", MockStatement::new().execute_ok(false))]);
    assert!(!engine
        .statement(SqlShape::Update, single)
        .execute(&fail_safe(), GeneratedKeys::Unspecified)
        .unwrap());

    let (multi, handles) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().execute_ok(false)),
            ("ds_1", MockStatement::new().execute_ok(false)),
        ],
    );
    assert!(!engine
        .statement(SqlShape::Update, multi)
        .execute(&fail_safe(), GeneratedKeys::Unspecified)
        .unwrap());
    for h in &handles {
        assert_eq!(
            h.lock().calls,
            vec![NativeCall::Execute(DML_SQL.into(), GeneratedKeys::Unspecified)]
        );
    }
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 3);
    assert_eq!(count(&events, EventKind::Success), 3);
}

#[test]
fn test_se4_execute_dml_failures_are_false() {
    let (engine, rx) = engine();
    let err = ShardError::new("syntax error").with_sql_state("42000");
    let (multi, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().fails(err.clone())),
            ("ds_1", MockStatement::new().fails(err.clone())),
        ],
    );
    assert!(!engine
        .statement(SqlShape::Update, multi)
        .execute(&fail_safe(), GeneratedKeys::Unspecified)
        .unwrap());
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 2);
    assert_eq!(count(&events, EventKind::Failure), 2);
}

#[test]
fn test_se4_execute_dql_is_true() {
    let (engine, _rx) = engine();
    let (multi, _) = units(
        DQL_SQL,
        vec![
            ("ds_0", MockStatement::new().execute_ok(true)),
            ("ds_1", MockStatement::new().execute_ok(true)),
        ],
    );
    assert!(engine
        .statement(SqlShape::Query, multi)
        .execute(&fail_safe(), GeneratedKeys::Unspecified)
        .unwrap());
}

#[test]
fn test_se4_execute_any_result_set_wins() {
    let (engine, _rx) = engine();
    let (mixed, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().execute_ok(false)),
            ("ds_1", MockStatement::new().execute_ok(true)),
            ("ds_2", MockStatement::new().execute_ok(false)),
        ],
    );
    assert!(engine
        .statement(SqlShape::Update, mixed)
        .execute(&fail_safe(), GeneratedKeys::Unspecified)
        .unwrap());
}

#[test]
fn test_se4_execute_for_shape() {
    let (engine, _rx) = engine();
    let (q, _) = units(DQL_SQL, vec![("ds_0", MockStatement::new().query_ok("rs_0"))]);
    match engine.statement(SqlShape::Query, q).execute_for_shape(&fail_safe()).unwrap() {
        AggregatedResult::Query(rs) => assert_eq!(rs, vec![Some("rs_0".to_string())]),
        other => panic!("expected query result, got {:?}", other),
    }

    let (u, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().update_ok(3)),
            ("ds_1", MockStatement::new().update_ok(4)),
        ],
    );
    let result = engine.statement(SqlShape::Update, u).execute_for_shape(&fail_safe()).unwrap();
    assert_eq!(result.update_count(), Some(7));
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-5: Generated keys
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se5_generated_keys_forwarded() {
    let (engine, _rx) = engine();
    let variants = vec![
        GeneratedKeys::Mode(KeysMode::NoReturn),
        GeneratedKeys::ColumnIndexes(vec![1]),
        GeneratedKeys::ColumnNames(vec!["col".into()]),
    ];
    for keys in variants {
        let (u, handles) = units(DML_SQL, vec![("ds_0", MockStatement::new().update_ok(10))]);
        let actual = engine.statement(SqlShape::Update, u);
        assert_eq!(actual.execute_update(&fail_safe(), keys.clone()).unwrap(), 10);
        assert!(!actual.execute(&fail_safe(), keys.clone()).unwrap());
        assert_eq!(
            handles[0].lock().calls,
            vec![
                NativeCall::Update(DML_SQL.into(), keys.clone()),
                NativeCall::Execute(DML_SQL.into(), keys),
            ]
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-6: Fail-fast
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se6_overall_exception_failure() {
    let (engine, rx) = engine();
    let err = ShardError::new("disk full").with_sql_state("53100");
    let (u, _) = units(DML_SQL, vec![("ds_0", MockStatement::new().fails(err.clone()))]);
    let actual = engine.statement(SqlShape::Update, u);

    let result = actual.execute(&fail_fast(), GeneratedKeys::Unspecified);
    match result {
        Err(ShardlineError::Abort(abort)) => {
            assert_eq!(abort.first.shard, "ds_0");
            assert_eq!(abort.first.sql, DML_SQL);
            assert_eq!(abort.first.source, err);
            assert_eq!(abort.total_units, 1);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 1);
    assert_eq!(count(&events, EventKind::Failure), 1);
}

#[test]
fn test_se6_abort_drains_in_flight_units() {
    let (engine, rx) = engine();
    let (u, handles) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().update_ok(1).delay_ms(60)),
            ("ds_1", MockStatement::new().fails(ShardError::new("ds_1 down"))),
            ("ds_2", MockStatement::new().update_ok(1).delay_ms(60)),
        ],
    );
    let actual = engine.statement(SqlShape::Update, u);

    let err = actual
        .execute_update(&fail_fast(), GeneratedKeys::Unspecified)
        .unwrap_err();
    assert_eq!(err.first_unit_error().map(|e| e.shard.as_str()), Some("ds_1"));

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 3);
    assert_eq!(count(&events, EventKind::Success), 2);
    assert_eq!(count(&events, EventKind::Failure), 1);
    for h in &handles {
        assert_eq!(h.lock().calls.len(), 1);
    }
}

#[test]
fn test_se6_abort_still_runs_queued_units() {
    // One worker: ds_2 and ds_3 sit in the queue behind the failing ds_1
    // while the inline ds_0 is still running.
    let (engine, rx) = engine_with_workers(1);
    let (u, handles) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().update_ok(1).delay_ms(50)),
            ("ds_1", MockStatement::new().fails(ShardError::new("ds_1 down"))),
            ("ds_2", MockStatement::new().update_ok(1)),
            ("ds_3", MockStatement::new().update_ok(1)),
        ],
    );
    let err = engine
        .statement(SqlShape::Update, u)
        .execute_update(&fail_fast(), GeneratedKeys::Unspecified)
        .unwrap_err();
    assert!(err.is_abort());

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 4);
    assert_eq!(
        count(&events, EventKind::Success) + count(&events, EventKind::Failure),
        4
    );
    for (i, h) in handles.iter().enumerate() {
        assert_eq!(h.lock().calls.len(), 1, "ds_{} did not run", i);
    }
}

#[test]
fn test_se6_large_batch_under_abort_emits_every_pair() {
    let (engine, rx) = engine_with_workers(2);
    let u: Vec<_> = (0..200u64)
        .map(|i| {
            let stmt = if i == 1 {
                MockStatement::new().fails(ShardError::new("ds_1 down"))
            } else {
                MockStatement::new().update_ok(1)
            };
            ExecuteUnit::new(
                RouteUnit::new(format!("ds_{}", i), DML_SQL),
                Arc::new(Mutex::new(stmt)),
            )
        })
        .collect();
    let err = engine
        .statement(SqlShape::Update, u)
        .execute_update(&fail_fast(), GeneratedKeys::Unspecified)
        .unwrap_err();
    assert_eq!(err.first_unit_error().map(|e| e.unit_index), Some(1));

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 200);
    assert_eq!(count(&events, EventKind::Success), 199);
    assert_eq!(count(&events, EventKind::Failure), 1);
}

#[test]
fn test_se6_fail_fast_success_path_unchanged() {
    let (engine, _rx) = engine();
    let (u, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().update_ok(10)),
            ("ds_1", MockStatement::new().update_ok(20)),
        ],
    );
    let actual = engine.statement(SqlShape::Update, u);
    assert_eq!(actual.execute_update(&fail_fast(), GeneratedKeys::Unspecified).unwrap(), 30);
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-7: Policy isolation
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se7_concurrent_callers_keep_their_own_policy() {
    let (engine, _rx) = engine();
    let mut joins = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        joins.push(thread::spawn(move || {
            let (u, _) = units(
                DML_SQL,
                vec![
                    ("ds_0", MockStatement::new().update_ok(5).delay_ms(5)),
                    ("ds_1", MockStatement::new().fails(ShardError::new("down"))),
                ],
            );
            let actual = engine.statement(SqlShape::Update, u);
            let abort = i % 2 == 0;
            let ctx = if abort { fail_fast() } else { fail_safe() };
            (abort, actual.execute_update(&ctx, GeneratedKeys::Unspecified))
        }));
    }
    for j in joins {
        let (abort, result) = j.join().unwrap();
        if abort {
            assert!(result.unwrap_err().is_abort());
        } else {
            assert_eq!(result.unwrap(), 5);
        }
    }
}

#[test]
fn test_se7_scoped_policy_reverts_for_next_call() {
    let (engine, _rx) = engine();
    let (u, _) = units(DML_SQL, vec![("ds_0", MockStatement::new().fails(ShardError::new("x")))]);
    let actual = engine.statement(SqlShape::Update, u);

    let mut session = engine.new_context(3);
    {
        let scoped = session.scoped_policy(ExceptionPolicy::AbortOnFailure);
        assert!(actual
            .execute_update(&scoped, GeneratedKeys::Unspecified)
            .is_err());
    }
    let next = session.next_call();
    assert_eq!(actual.execute_update(&next, GeneratedKeys::Unspecified).unwrap(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// SE-8: Event payload
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_se8_events_carry_parameters_and_call_id() {
    let (engine, rx) = engine();
    let params = vec![ParamValue::Int(7), ParamValue::from("x")];
    let handle = Arc::new(Mutex::new(MockStatement::new().update_ok(1)));
    let unit = ExecuteUnit::new(
        RouteUnit::new("ds_0", "UPDATE t SET v = ? WHERE k = ?").with_parameters(params.clone()),
        handle,
    );
    let ctx = fail_safe();
    engine
        .statement(SqlShape::Update, vec![unit])
        .execute_update(&ctx, GeneratedKeys::Unspecified)
        .unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    for e in &events {
        assert_eq!(e.unit().parameters, params);
        assert_eq!(e.unit().call_id, ctx.call_id);
        assert_eq!(e.unit().operation, "update");
    }
}

#[test]
fn test_se8_panicking_unit_still_closes_its_event_pair() {
    let (engine, rx) = engine();
    let (u, _) = units(
        DML_SQL,
        vec![
            ("ds_0", MockStatement::new().update_ok(1).delay_ms(20)),
            ("ds_1", MockStatement::new().panicking()),
            ("ds_2", MockStatement::new().update_ok(1)),
        ],
    );
    let err = engine
        .statement(SqlShape::Update, u)
        .execute_update(&fail_safe(), GeneratedKeys::Unspecified)
        .unwrap_err();
    assert!(err.is_internal_bug());

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(count(&events, EventKind::BeforeExecute), 3);
    assert_eq!(count(&events, EventKind::Success), 2);
    let failure = events
        .iter()
        .find(|e| e.kind() == EventKind::Failure)
        .unwrap();
    assert_eq!(failure.unit().shard, "ds_1");
    assert!(failure.error().unwrap().message.contains("driver bug"));
}

#[test]
fn test_se8_every_unit_gets_one_event_pair() {
    let (engine, rx) = engine();
    let u: Vec<_> = (0..10u64)
        .map(|i| {
            let stmt = if i % 3 == 0 {
                MockStatement::new().fails(ShardError::new(format!("ds_{} failed", i)))
            } else {
                MockStatement::new().update_ok(i)
            };
            ExecuteUnit::new(
                RouteUnit::new(format!("ds_{}", i), DML_SQL),
                Arc::new(Mutex::new(stmt)),
            )
        })
        .collect();
    let total = engine
        .statement(SqlShape::Update, u)
        .execute_update(&fail_safe(), GeneratedKeys::Unspecified)
        .unwrap();
    // Units 1,2,4,5,7,8 succeed.
    assert_eq!(total, 1 + 2 + 4 + 5 + 7 + 8);

    let events: Vec<_> = rx.try_iter().collect();
    let counts = kind_counts(&events);
    assert_eq!(counts.get(&EventKind::BeforeExecute), Some(&10));
    assert_eq!(counts.get(&EventKind::Success), Some(&6));
    assert_eq!(counts.get(&EventKind::Failure), Some(&4));
    for i in 0..10 {
        assert_eq!(shard_count(&events, &format!("ds_{}", i)), 2);
    }
}
