use thiserror::Error;

/// Convenience alias for `Result<T, ShardlineError>`.
pub type ShardlineResult<T> = Result<T, ShardlineError>;

/// Error classification for escalation decisions.
///
/// - `ShardFailure`: one or more shards rejected the statement (surfaced under fail-fast)
/// - `Configuration`: invalid or unreadable configuration
/// - `Resource`: the shared worker pool is unavailable
/// - `InternalBug`: should never happen; carries an error code for post-mortem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ShardFailure,
    Configuration,
    Resource,
    InternalBug,
}

/// Native failure reported by one shard's statement handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (sqlstate={sql_state}, code={vendor_code})")]
pub struct ShardError {
    pub message: String,
    /// Five-character SQLSTATE; `HY000` when the driver gave none.
    pub sql_state: String,
    pub vendor_code: i32,
}

impl ShardError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: "HY000".into(),
            vendor_code: 0,
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = sql_state.into();
        self
    }

    pub fn with_vendor_code(mut self, vendor_code: i32) -> Self {
        self.vendor_code = vendor_code;
        self
    }
}

/// One execute unit's native failure, tagged with where it happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unit {unit_index} on shard '{shard}' failed: {source}")]
pub struct UnitExecutionError {
    pub unit_index: usize,
    pub shard: String,
    pub sql: String,
    pub source: ShardError,
}

impl UnitExecutionError {
    pub fn new(
        unit_index: usize,
        shard: impl Into<String>,
        sql: impl Into<String>,
        source: ShardError,
    ) -> Self {
        Self {
            unit_index,
            shard: shard.into(),
            sql: sql.into(),
            source,
        }
    }
}

/// Raised under fail-fast once every started unit has drained.
/// Wraps the first failure observed in completion order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("statement aborted ({failed_units} of {total_units} units failed): {first}")]
pub struct BatchAbortError {
    #[source]
    pub first: UnitExecutionError,
    pub failed_units: usize,
    pub total_units: usize,
}

/// Top-level error type returned by every executor entry point.
#[derive(Error, Debug)]
pub enum ShardlineError {
    #[error("Batch aborted: {0}")]
    Abort(#[from] BatchAbortError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Update count overflow while summing {units} units")]
    UpdateCountOverflow { units: usize },

    /// Internal bug; should never occur in production.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

impl ShardlineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShardlineError::Abort(_) => ErrorKind::ShardFailure,
            ShardlineError::Config(_) => ErrorKind::Configuration,
            ShardlineError::PoolClosed => ErrorKind::Resource,
            ShardlineError::UpdateCountOverflow { .. } | ShardlineError::InternalBug { .. } => {
                ErrorKind::InternalBug
            }
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ShardlineError::Abort(_))
    }

    pub fn is_internal_bug(&self) -> bool {
        matches!(self.kind(), ErrorKind::InternalBug)
    }

    /// The unit failure that caused a fail-fast abort, if any.
    pub fn first_unit_error(&self) -> Option<&UnitExecutionError> {
        match self {
            ShardlineError::Abort(abort) => Some(&abort.first),
            _ => None,
        }
    }

    /// SQLSTATE to report upstream: the shard's own code for aborts,
    /// `XX000` (internal_error) for everything else.
    pub fn sql_state(&self) -> &str {
        match self {
            ShardlineError::Abort(abort) => &abort.first.source.sql_state,
            ShardlineError::Config(_) => "F0000", // config_file_error
            ShardlineError::PoolClosed => "53000", // insufficient_resources
            _ => "XX000",
        }
    }

    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        ShardlineError::InternalBug {
            error_code,
            message: message.into(),
            debug_context: debug_context.into(),
        }
    }
}
