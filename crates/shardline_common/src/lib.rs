//! Shared types for the shardline workspace: error taxonomy, configuration,
//! per-call execution context and bound parameter values.

pub mod config;
pub mod context;
pub mod error;
pub mod value;

pub use config::{load_config, ExecutorConfig, ObservabilityConfig, ShardlineConfig};
pub use context::{ExceptionPolicy, ExecutionContext, PolicyOverride};
pub use error::{
    BatchAbortError, ErrorKind, ShardError, ShardlineError, ShardlineResult, UnitExecutionError,
};
pub use value::ParamValue;
