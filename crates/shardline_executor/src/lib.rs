//! Multi-shard parallel statement execution.
//!
//! One logical SQL statement arrives as an ordered list of execute units (one
//! per shard). The executor runs them across a shared worker pool, emits a
//! lifecycle event pair per unit, applies the call's exception policy and
//! folds the per-shard outcomes back into one logical result.

pub mod aggregate;
pub mod engine;
pub mod event;
pub mod parallel;
pub mod pool;
pub mod statement;
pub mod unit;

pub use aggregate::{AggregatedResult, SqlShape, StatementOperation, UnitOutcome};
pub use engine::ExecutionEngine;
pub use event::{EventKind, EventSink, ExecutionEvent, UnitInfo};
pub use parallel::{DispatchMetrics, ParallelExecutor, UnitWork};
pub use pool::{Job, PoolSnapshot, SubmitError, WorkerPool};
pub use statement::StatementExecutor;
pub use unit::{ExecuteUnit, GeneratedKeys, KeysMode, RouteUnit, ShardStatement};
