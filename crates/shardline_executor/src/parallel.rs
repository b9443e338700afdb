//! Order-preserving fan-out/fan-in over execute units.
//!
//! Dispatch is asymmetric:
//!   - 0 units: return immediately, nothing is touched
//!   - 1 unit:  run on the calling thread
//!   - N units: hand units[1..] to the shared pool, run unit[0] on the
//!     caller, then wait once for the rest
//!
//! A pooled unit that finds the queue full runs on the caller instead, so
//! dispatch never parks the caller before its single wait.
//!
//! Results are written into a slot per unit index, so the output order is
//! always the input order. Every dispatched unit runs exactly once whatever
//! the call's `ExceptionPolicy`:
//!   - absorb: the unit's degraded outcome takes its slot
//!   - abort:  the caller waits for every unit, then raises the first failure

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use shardline_common::context::{ExceptionPolicy, ExecutionContext};
use shardline_common::error::{
    BatchAbortError, ShardlineError, ShardlineResult, UnitExecutionError,
};
use shardline_observability::record_dispatch;

use crate::pool::{panic_message, SubmitError, WorkerPool};

/// Per-unit work run by the parallel executor.
pub trait UnitWork<T>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn execute(&self, index: usize, unit: T) -> Result<Self::Output, UnitExecutionError>;

    /// Outcome that stands in for a failed unit when failures are absorbed.
    fn degraded(&self, index: usize) -> Self::Output;
}

/// Counters for one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchMetrics {
    pub units: usize,
    /// Units run by pool workers.
    pub pooled_units: usize,
    /// Pooled units run on the caller because the queue was full.
    pub caller_run_units: usize,
    pub failed_units: usize,
    pub duration_us: u64,
}

enum Slot<R> {
    Done(R),
    Failed,
    /// Never handed to anyone: the pool was closed.
    NotDispatched,
    Panicked(String),
}

struct CallState {
    policy: ExceptionPolicy,
    failed: AtomicUsize,
    first_failure: Mutex<Option<UnitExecutionError>>,
}

impl CallState {
    fn new(policy: ExceptionPolicy) -> Self {
        Self {
            policy,
            failed: AtomicUsize::new(0),
            first_failure: Mutex::new(None),
        }
    }

    fn run_unit<T, W>(&self, work: &W, index: usize, unit: T) -> Slot<W::Output>
    where
        W: UnitWork<T>,
    {
        match work.execute(index, unit) {
            Ok(out) => Slot::Done(out),
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                match self.policy {
                    ExceptionPolicy::AbsorbFailure => {
                        tracing::debug!("Absorbed failure of unit {}: {}", index, e);
                        Slot::Done(work.degraded(index))
                    }
                    ExceptionPolicy::AbortOnFailure => {
                        let mut first = self.first_failure.lock();
                        if first.is_none() {
                            *first = Some(e);
                        }
                        Slot::Failed
                    }
                }
            }
        }
    }

    /// Run a unit, turning a panic into a slot so the latch still counts down.
    fn run_unit_contained<T, W>(&self, work: &W, index: usize, unit: T) -> Slot<W::Output>
    where
        W: UnitWork<T>,
    {
        catch_unwind(AssertUnwindSafe(|| self.run_unit(work, index, unit)))
            .unwrap_or_else(|payload| Slot::Panicked(panic_message(payload.as_ref())))
    }
}

/// Collects pooled results; the caller waits on it exactly once.
struct Completion<R> {
    state: Mutex<CompletionState<R>>,
    done: Condvar,
}

struct CompletionState<R> {
    slots: Vec<Option<Slot<R>>>,
    pending: usize,
}

impl<R> Completion<R> {
    fn new(total: usize, pending: usize) -> Self {
        Self {
            state: Mutex::new(CompletionState {
                slots: (0..total).map(|_| None).collect(),
                pending,
            }),
            done: Condvar::new(),
        }
    }

    fn complete(&self, index: usize, slot: Slot<R>) {
        let mut st = self.state.lock();
        st.slots[index] = Some(slot);
        st.pending -= 1;
        if st.pending == 0 {
            self.done.notify_all();
        }
    }

    fn wait(&self) -> Vec<Option<Slot<R>>> {
        let mut st = self.state.lock();
        while st.pending > 0 {
            self.done.wait(&mut st);
        }
        std::mem::take(&mut st.slots)
    }
}

/// Runs units across the shared worker pool.
#[derive(Clone)]
pub struct ParallelExecutor {
    pool: Arc<WorkerPool>,
}

impl ParallelExecutor {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Run `work` over `units`; the result has one entry per unit, in order.
    pub fn run<T, W>(
        &self,
        ctx: &ExecutionContext,
        units: Vec<T>,
        work: Arc<W>,
    ) -> ShardlineResult<Vec<W::Output>>
    where
        T: Send + 'static,
        W: UnitWork<T>,
    {
        self.run_with_metrics(ctx, units, work).map(|(out, _)| out)
    }

    pub fn run_with_metrics<T, W>(
        &self,
        ctx: &ExecutionContext,
        units: Vec<T>,
        work: Arc<W>,
    ) -> ShardlineResult<(Vec<W::Output>, DispatchMetrics)>
    where
        T: Send + 'static,
        W: UnitWork<T>,
    {
        let start = Instant::now();
        let total = units.len();
        let mut metrics = DispatchMetrics {
            units: total,
            ..Default::default()
        };

        let mut iter = units.into_iter();
        let Some(first) = iter.next() else {
            return Ok((Vec::new(), metrics));
        };

        let state = Arc::new(CallState::new(ctx.exception_policy));

        if total == 1 {
            let slot = state.run_unit(work.as_ref(), 0, first);
            return self.finish(ctx, &state, vec![slot], metrics, start);
        }

        tracing::debug!(
            "Dispatching {} units ({}): 1 inline, {} pooled",
            total,
            ctx.as_context_str(),
            total - 1
        );

        // Pooled units first, so they overlap with the inline unit.
        let completion = Arc::new(Completion::new(total, total - 1));
        let mut dispatch_error = None;
        for (offset, unit) in iter.enumerate() {
            let index = offset + 1;
            if dispatch_error.is_some() {
                completion.complete(index, Slot::NotDispatched);
                continue;
            }
            let job_state = Arc::clone(&state);
            let job_work = Arc::clone(&work);
            let job_completion = Arc::clone(&completion);
            let job = move || {
                let slot = job_state.run_unit_contained(job_work.as_ref(), index, unit);
                job_completion.complete(index, slot);
            };
            match self.pool.try_submit(job) {
                Ok(()) => metrics.pooled_units += 1,
                Err(SubmitError::Full(job)) => {
                    metrics.caller_run_units += 1;
                    job();
                }
                Err(SubmitError::Closed) => {
                    // The rejected job was dropped unrun; account for its slot here.
                    completion.complete(index, Slot::NotDispatched);
                    dispatch_error = Some(ShardlineError::PoolClosed);
                }
            }
        }
        if metrics.caller_run_units > 0 {
            tracing::debug!(
                "Worker queue full ({}): {} units ran on the caller",
                ctx.as_context_str(),
                metrics.caller_run_units
            );
        }

        let inline = if dispatch_error.is_none() {
            Some(catch_unwind(AssertUnwindSafe(|| {
                state.run_unit(work.as_ref(), 0, first)
            })))
        } else {
            None
        };

        // Single wait: every dispatched unit has finished past this point.
        let mut slots = completion.wait();

        if let Some(e) = dispatch_error {
            metrics.duration_us = start.elapsed().as_micros() as u64;
            tracing::error!("Dispatch failed ({}): {}", ctx.as_context_str(), e);
            return Err(e);
        }
        match inline {
            Some(Ok(slot)) => slots[0] = Some(slot),
            Some(Err(payload)) => resume_unwind(payload),
            None => {}
        }
        let slots = slots
            .into_iter()
            .map(|s| s.unwrap_or(Slot::Panicked("unit result missing".into())))
            .collect();
        self.finish(ctx, &state, slots, metrics, start)
    }

    fn finish<R>(
        &self,
        ctx: &ExecutionContext,
        state: &CallState,
        slots: Vec<Slot<R>>,
        mut metrics: DispatchMetrics,
        start: Instant,
    ) -> ShardlineResult<(Vec<R>, DispatchMetrics)> {
        metrics.failed_units = state.failed.load(Ordering::Relaxed);
        metrics.duration_us = start.elapsed().as_micros() as u64;

        if let Some((index, msg)) = slots.iter().enumerate().find_map(|(i, s)| match s {
            Slot::Panicked(msg) => Some((i, msg.clone())),
            _ => None,
        }) {
            record_metrics(&metrics, "panicked");
            return Err(ShardlineError::internal_bug(
                "E-DISPATCH-001",
                format!("unit {} panicked: {}", index, msg),
                ctx.as_context_str(),
            ));
        }

        if let Some(first) = state.first_failure.lock().take() {
            record_metrics(&metrics, "aborted");
            tracing::warn!(
                "Aborting call ({}): {} of {} units failed; first: {}",
                ctx.as_context_str(),
                metrics.failed_units,
                metrics.units,
                first
            );
            return Err(BatchAbortError {
                first,
                failed_units: metrics.failed_units,
                total_units: metrics.units,
            }
            .into());
        }

        let mut out = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Slot::Done(r) => out.push(r),
                Slot::Failed | Slot::NotDispatched | Slot::Panicked(_) => {
                    record_metrics(&metrics, "panicked");
                    return Err(ShardlineError::internal_bug(
                        "E-DISPATCH-002",
                        format!("unit {} has no outcome although the call did not abort", index),
                        ctx.as_context_str(),
                    ));
                }
            }
        }
        record_metrics(&metrics, "completed");
        Ok((out, metrics))
    }
}

fn record_metrics(m: &DispatchMetrics, outcome: &'static str) {
    record_dispatch(
        m.units,
        m.pooled_units,
        m.failed_units,
        m.caller_run_units,
        m.duration_us,
        outcome,
    );
}
