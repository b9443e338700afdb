use serde::{Deserialize, Serialize};

use crate::context::ExceptionPolicy;
use crate::error::{ShardlineError, ShardlineResult};

/// Top-level configuration (`shardline.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardlineConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Worker pool and dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker threads in the shared pool. 0 = number of available CPUs.
    #[serde(default)]
    pub worker_threads: usize,
    /// Maximum queued (not yet started) units before `submit` blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Worker thread name prefix; threads are named `<prefix>-<n>`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Policy given to contexts created by the session layer.
    #[serde(default)]
    pub default_exception_policy: ExceptionPolicy,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_thread_name_prefix() -> String {
    "shardline-exec".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            queue_capacity: default_queue_capacity(),
            thread_name_prefix: default_thread_name_prefix(),
            default_exception_policy: ExceptionPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    /// Effective number of worker threads (resolves 0 to the CPU count).
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub fn validate(&self) -> ShardlineResult<()> {
        if self.queue_capacity == 0 {
            return Err(ShardlineError::Config(
                "executor.queue_capacity must be at least 1".into(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ShardlineError::Config(
                "executor.thread_name_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Logging and metrics export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Prometheus listen address; empty disables the exporter.
    #[serde(default)]
    pub metrics_listen_addr: String,
}

fn default_log_filter() -> String {
    "info,shardline=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            metrics_listen_addr: String::new(),
        }
    }
}

impl ObservabilityConfig {
    pub fn metrics_enabled(&self) -> bool {
        !self.metrics_listen_addr.is_empty()
    }
}

impl ShardlineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ShardlineResult<Self> {
        let config: ShardlineConfig =
            toml::from_str(content).map_err(|e| ShardlineError::Config(e.to_string()))?;
        config.executor.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ShardlineResult<String> {
        toml::to_string_pretty(self).map_err(|e| ShardlineError::Config(e.to_string()))
    }
}

/// Load configuration from `path`, falling back to defaults when the file is
/// missing or invalid.
pub fn load_config(path: &str) -> ShardlineConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match ShardlineConfig::from_toml_str(&content) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}, using defaults", path, e);
                ShardlineConfig::default()
            }
        },
        Err(_) => {
            tracing::info!("Config file {} not found, using defaults", path);
            ShardlineConfig::default()
        }
    }
}
