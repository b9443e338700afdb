//! Bounded worker pool shared by every statement call.
//!
//! # Design
//!
//! - Fixed number of named threads, started once.
//! - Jobs flow through a bounded `crossbeam_channel`. `submit()` blocks while
//!   the queue is full, which bounds memory under bursty fan-out.
//!   `try_submit()` never blocks: a full queue hands the job back so the
//!   caller can run it itself. Statement dispatch uses `try_submit()`, so a
//!   batch larger than the queue never parks the calling thread before its
//!   single wait.
//! - A panicking job is contained: the worker logs it and keeps serving.
//! - Dropping the pool closes the queue, lets queued jobs finish and joins
//!   every worker.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use shardline_common::config::ExecutorConfig;
use shardline_common::error::{ShardlineError, ShardlineResult};
use shardline_observability::{
    record_pool_active_workers, record_pool_job_panic, record_pool_queue_depth,
};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why `try_submit` did not queue a job.
pub enum SubmitError {
    /// Queue at capacity; the job is returned unrun.
    Full(Job),
    Closed,
}

impl std::fmt::Debug for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Full(_) => write!(f, "Full(..)"),
            SubmitError::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Default)]
struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
    queued: AtomicUsize,
}

/// Point-in-time view of pool activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub worker_threads: usize,
    pub queue_capacity: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub active: usize,
    pub queued: usize,
}

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn new(config: &ExecutorConfig) -> ShardlineResult<Arc<Self>> {
        config.validate()?;
        let threads = config.effective_worker_threads();
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(config.queue_capacity);
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let rx = receiver.clone();
            let st = Arc::clone(&stats);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, n))
                .spawn(move || worker_loop(rx, st))
                .map_err(|e| {
                    ShardlineError::internal_bug(
                        "E-POOL-001",
                        format!("failed to spawn worker thread {}", n),
                        e.to_string(),
                    )
                })?;
            workers.push(handle);
        }

        tracing::info!(
            "Worker pool started: {} threads, queue capacity {}",
            threads,
            config.queue_capacity
        );
        Ok(Arc::new(Self {
            sender: Some(sender),
            workers,
            stats,
            queue_capacity: config.queue_capacity,
        }))
    }

    /// Queue a job. Blocks while the queue is full.
    pub fn submit<F>(&self, job: F) -> ShardlineResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(ShardlineError::PoolClosed)?;
        let depth = self.stats.queued.fetch_add(1, Ordering::AcqRel) + 1;
        if sender.send(Box::new(job)).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(ShardlineError::PoolClosed);
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        record_pool_queue_depth(depth);
        Ok(())
    }

    /// Queue a job without blocking.
    pub fn try_submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return Err(SubmitError::Closed);
        };
        let depth = self.stats.queued.fetch_add(1, Ordering::AcqRel) + 1;
        match sender.try_send(Box::new(job)) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                record_pool_queue_depth(depth);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.stats.queued.fetch_sub(1, Ordering::AcqRel);
                Err(SubmitError::Full(job))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.queued.fetch_sub(1, Ordering::AcqRel);
                Err(SubmitError::Closed)
            }
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            worker_threads: self.workers.len(),
            queue_capacity: self.queue_capacity,
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            panicked: self.stats.panicked.load(Ordering::Relaxed),
            active: self.stats.active.load(Ordering::Relaxed),
            queued: self.stats.queued.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends each worker's recv loop once the queue drains.
        self.sender.take();
        let current = std::thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Worker thread exited abnormally during pool shutdown");
            }
        }
        tracing::debug!("Worker pool shut down");
    }
}

fn worker_loop(rx: Receiver<Job>, stats: Arc<PoolStats>) {
    while let Ok(job) = rx.recv() {
        stats.queued.fetch_sub(1, Ordering::AcqRel);
        let active = stats.active.fetch_add(1, Ordering::AcqRel) + 1;
        record_pool_active_workers(active);

        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            record_pool_job_panic();
            tracing::error!("Worker job panicked: {}", panic_message(payload.as_ref()));
        }

        let active = stats.active.fetch_sub(1, Ordering::AcqRel) - 1;
        stats.completed.fetch_add(1, Ordering::Relaxed);
        record_pool_active_workers(active);
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
