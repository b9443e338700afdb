//! Per-call execution context.
//!
//! Every logical statement call carries an `ExecutionContext` that is passed
//! explicitly to the executor and, from there, to every unit it runs.
//! The exception policy lives here and nowhere else, so two callers on
//! different threads (or two calls in one session) never see each other's
//! setting.
//!
//! Fields:
//! - `call_id`: unique per logical statement call (monotonic)
//! - `session_id`: the client session issuing the call
//! - `exception_policy`: fail-safe (default) or fail-fast

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Global monotonic call ID counter.
static GLOBAL_CALL_ID: AtomicU64 = AtomicU64::new(1);
/// Global monotonic session ID counter.
static GLOBAL_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new unique call ID.
pub fn next_call_id() -> u64 {
    GLOBAL_CALL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Allocate a new unique session ID.
pub fn next_session_id() -> u64 {
    GLOBAL_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a call does when one of its units fails natively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionPolicy {
    /// Fail-safe: record the failure, substitute an empty/zero/false outcome, continue.
    #[default]
    AbsorbFailure,
    /// Fail-fast: stop starting new units, drain, then raise the first failure.
    AbortOnFailure,
}

impl ExceptionPolicy {
    pub fn aborts_on_failure(self) -> bool {
        matches!(self, ExceptionPolicy::AbortOnFailure)
    }
}

impl std::fmt::Display for ExceptionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionPolicy::AbsorbFailure => write!(f, "absorb"),
            ExceptionPolicy::AbortOnFailure => write!(f, "abort"),
        }
    }
}

/// Per-call context threaded through dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub call_id: u64,
    pub session_id: u64,
    pub exception_policy: ExceptionPolicy,
    /// When this call was issued.
    pub started_at: Instant,
}

impl ExecutionContext {
    /// Create a context with a fresh call ID and the default (fail-safe) policy.
    pub fn new(session_id: u64) -> Self {
        Self {
            call_id: next_call_id(),
            session_id,
            exception_policy: ExceptionPolicy::default(),
            started_at: Instant::now(),
        }
    }

    /// Create with explicit IDs (for testing).
    pub fn with_ids(call_id: u64, session_id: u64) -> Self {
        Self {
            call_id,
            session_id,
            exception_policy: ExceptionPolicy::default(),
            started_at: Instant::now(),
        }
    }

    pub fn with_exception_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.exception_policy = policy;
        self
    }

    /// Start the next call in the same session: fresh call ID and clock,
    /// policy carried over.
    pub fn next_call(&self) -> Self {
        Self {
            call_id: next_call_id(),
            session_id: self.session_id,
            exception_policy: self.exception_policy,
            started_at: Instant::now(),
        }
    }

    /// Override the policy until the returned guard is dropped.
    pub fn scoped_policy(&mut self, policy: ExceptionPolicy) -> PolicyOverride<'_> {
        let previous = std::mem::replace(&mut self.exception_policy, policy);
        PolicyOverride { ctx: self, previous }
    }

    /// Elapsed time since the call started in microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.started_at.elapsed().as_micros() as u64
    }

    /// Format as a structured context string for log/error messages.
    /// Example: `"call_id=42, session_id=1, policy=abort"`
    pub fn as_context_str(&self) -> String {
        format!(
            "call_id={}, session_id={}, policy={}",
            self.call_id, self.session_id, self.exception_policy
        )
    }
}

/// Restores the previous exception policy on drop.
pub struct PolicyOverride<'a> {
    ctx: &'a mut ExecutionContext,
    previous: ExceptionPolicy,
}

impl Deref for PolicyOverride<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.ctx
    }
}

impl DerefMut for PolicyOverride<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.ctx
    }
}

impl Drop for PolicyOverride<'_> {
    fn drop(&mut self) {
        self.ctx.exception_policy = self.previous;
    }
}
