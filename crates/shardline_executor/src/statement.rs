//! SQL-type-aware statement execution over a set of execute units.
//!
//! A `StatementExecutor` owns the units of one logical statement and exposes
//! the three native entry points (query, update, execute). Each call:
//!   1. fixes the `StatementOperation` for the call,
//!   2. runs every unit through the `ParallelExecutor`, wrapping the native
//!      call with BeforeExecute / Success / Failure events,
//!   3. aggregates the per-unit outcomes (list, sum or OR).
//!
//! There is no retry at this layer.

use std::marker::PhantomData;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use shardline_common::context::ExecutionContext;
use shardline_common::error::{ShardError, ShardlineResult, UnitExecutionError};
use shardline_observability::{record_statement, record_unit_latency_us};

use crate::aggregate::{aggregate, AggregatedResult, SqlShape, StatementOperation, UnitOutcome};
use crate::event::{EventSink, ExecutionEvent, UnitInfo};
use crate::parallel::{ParallelExecutor, UnitWork};
use crate::pool::panic_message;
use crate::unit::{ExecuteUnit, GeneratedKeys, ShardStatement};

pub struct StatementExecutor<S: ShardStatement> {
    executor: ParallelExecutor,
    shape: SqlShape,
    units: Vec<ExecuteUnit<S>>,
    events: EventSink,
}

impl<S: ShardStatement> StatementExecutor<S> {
    pub fn new(
        executor: ParallelExecutor,
        shape: SqlShape,
        units: Vec<ExecuteUnit<S>>,
        events: EventSink,
    ) -> Self {
        Self {
            executor,
            shape,
            units,
            events,
        }
    }

    pub fn shape(&self) -> SqlShape {
        self.shape
    }

    pub fn units(&self) -> &[ExecuteUnit<S>] {
        &self.units
    }

    /// One result handle per unit, in unit order; `None` where a unit's
    /// failure was absorbed.
    pub fn execute_query(&self, ctx: &ExecutionContext) -> ShardlineResult<Vec<Option<S::ResultSet>>> {
        let result = self.run(ctx, StatementOperation::Query)?;
        Ok(result.into_query().unwrap_or_default())
    }

    /// Total affected rows across all units.
    pub fn execute_update(&self, ctx: &ExecutionContext, keys: GeneratedKeys) -> ShardlineResult<u64> {
        let result = self.run(ctx, StatementOperation::Update(keys))?;
        Ok(result.update_count().unwrap_or(0))
    }

    /// True if any unit produced a result set.
    pub fn execute(&self, ctx: &ExecutionContext, keys: GeneratedKeys) -> ShardlineResult<bool> {
        let result = self.run(ctx, StatementOperation::Execute(keys))?;
        Ok(result.has_result_set().unwrap_or(false))
    }

    /// Drive the entry point matching the statement's declared shape.
    pub fn execute_for_shape(
        &self,
        ctx: &ExecutionContext,
    ) -> ShardlineResult<AggregatedResult<S::ResultSet>> {
        match self.shape {
            SqlShape::Query => self.run(ctx, StatementOperation::Query),
            SqlShape::Update => self.run(ctx, StatementOperation::Update(GeneratedKeys::Unspecified)),
        }
    }

    fn run(
        &self,
        ctx: &ExecutionContext,
        operation: StatementOperation,
    ) -> ShardlineResult<AggregatedResult<S::ResultSet>> {
        let start = Instant::now();
        let label = operation.label();
        let work = Arc::new(StatementWork::<S> {
            operation: operation.clone(),
            events: self.events.clone(),
            call_id: ctx.call_id,
            _statement: PhantomData,
        });

        let result = self
            .executor
            .run(ctx, self.units.clone(), work)
            .and_then(|outcomes| aggregate(&operation, outcomes));

        let elapsed_us = start.elapsed().as_micros() as u64;
        record_statement(label, elapsed_us, result.is_ok());
        tracing::debug!(
            "{} {} over {} units finished in {}us ({})",
            self.shape,
            label,
            self.units.len(),
            elapsed_us,
            ctx.as_context_str()
        );
        result
    }
}

/// Per-unit work for one call: events around the native call.
struct StatementWork<S> {
    operation: StatementOperation,
    events: EventSink,
    call_id: u64,
    _statement: PhantomData<fn() -> S>,
}

impl<S: ShardStatement> StatementWork<S> {
    fn call_native(&self, unit: &ExecuteUnit<S>) -> Result<UnitOutcome<S::ResultSet>, ShardError> {
        let mut stmt = unit.statement().lock();
        let (sql, params) = (unit.sql(), unit.parameters());
        match &self.operation {
            StatementOperation::Query => stmt
                .execute_query(sql, params)
                .map(|rs| UnitOutcome::Query(Some(rs))),
            StatementOperation::Update(keys) => stmt
                .execute_update(sql, params, keys)
                .map(UnitOutcome::Update),
            StatementOperation::Execute(keys) => {
                stmt.execute(sql, params, keys).map(UnitOutcome::Execute)
            }
        }
    }

    fn unit_info(&self, index: usize, unit: &ExecuteUnit<S>) -> UnitInfo {
        UnitInfo {
            call_id: self.call_id,
            unit_index: index,
            shard: unit.shard().to_string(),
            sql: unit.sql().to_string(),
            parameters: unit.parameters().to_vec(),
            operation: self.operation.label(),
        }
    }
}

impl<S: ShardStatement> UnitWork<ExecuteUnit<S>> for StatementWork<S> {
    type Output = UnitOutcome<S::ResultSet>;

    fn execute(
        &self,
        index: usize,
        unit: ExecuteUnit<S>,
    ) -> Result<Self::Output, UnitExecutionError> {
        let info = self.unit_info(index, &unit);
        self.events.emit(ExecutionEvent::BeforeExecute(info.clone()));

        let start = Instant::now();
        let native = match catch_unwind(AssertUnwindSafe(|| self.call_native(&unit))) {
            Ok(native) => native,
            Err(payload) => {
                // Close the event pair, then let the executor report the panic.
                let error = ShardError::new(format!(
                    "native call panicked: {}",
                    panic_message(payload.as_ref())
                ));
                self.events.emit(ExecutionEvent::Failure { unit: info, error });
                resume_unwind(payload)
            }
        };
        record_unit_latency_us(unit.shard(), start.elapsed().as_micros() as u64, native.is_ok());

        match native {
            Ok(outcome) => {
                self.events.emit(ExecutionEvent::Success(info));
                Ok(outcome)
            }
            Err(error) => {
                self.events.emit(ExecutionEvent::Failure {
                    unit: info,
                    error: error.clone(),
                });
                Err(UnitExecutionError::new(index, unit.shard(), unit.sql(), error))
            }
        }
    }

    fn degraded(&self, _index: usize) -> Self::Output {
        self.operation.degraded()
    }
}
