//! Process-wide entry point: one shared worker pool, one event sink, and
//! per-statement executors built on top of them.

use std::sync::Arc;

use shardline_common::config::{ExecutorConfig, ShardlineConfig};
use shardline_common::context::{ExceptionPolicy, ExecutionContext};
use shardline_common::error::{ShardlineError, ShardlineResult};
use shardline_observability::{init_metrics, init_tracing};

use crate::aggregate::SqlShape;
use crate::event::EventSink;
use crate::parallel::ParallelExecutor;
use crate::pool::{PoolSnapshot, WorkerPool};
use crate::statement::StatementExecutor;
use crate::unit::{ExecuteUnit, ShardStatement};

#[derive(Clone)]
pub struct ExecutionEngine {
    executor: ParallelExecutor,
    events: EventSink,
    default_policy: ExceptionPolicy,
}

impl ExecutionEngine {
    pub fn new(config: &ExecutorConfig, events: EventSink) -> ShardlineResult<Self> {
        let pool = WorkerPool::new(config)?;
        Ok(Self {
            executor: ParallelExecutor::new(pool),
            events,
            default_policy: config.default_exception_policy,
        })
    }

    /// Full startup: logging, optional metrics exporter, then the pool.
    pub fn from_config(config: &ShardlineConfig, events: EventSink) -> ShardlineResult<Self> {
        let obs = &config.observability;
        init_tracing(&obs.log_filter);
        if obs.metrics_enabled() {
            init_metrics(&obs.metrics_listen_addr).map_err(|e| {
                ShardlineError::Config(format!(
                    "metrics listener {}: {}",
                    obs.metrics_listen_addr, e
                ))
            })?;
        }
        Self::new(&config.executor, events)
    }

    /// Context for a new call in `session_id`, carrying the configured policy.
    pub fn new_context(&self, session_id: u64) -> ExecutionContext {
        ExecutionContext::new(session_id).with_exception_policy(self.default_policy)
    }

    /// Executor for one logical statement's units.
    pub fn statement<S: ShardStatement>(
        &self,
        shape: SqlShape,
        units: Vec<ExecuteUnit<S>>,
    ) -> StatementExecutor<S> {
        StatementExecutor::new(self.executor.clone(), shape, units, self.events.clone())
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.executor.pool()
    }

    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.executor.pool().snapshot()
    }
}
