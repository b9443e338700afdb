//! Observability setup: structured logging, metrics (Prometheus).

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
/// `default_filter` applies when `RUST_LOG` is unset.
pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    // A second call (e.g. from several tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Initialize Prometheus metrics exporter.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit lifecycle
// ---------------------------------------------------------------------------

/// Count one lifecycle event.
/// `kind` is one of: "before_execute", "success", "failure".
pub fn record_unit_event(kind: &'static str, shard: &str, operation: &'static str) {
    metrics::counter!(
        "shardline_unit_events_total",
        "kind" => kind,
        "shard" => shard.to_string(),
        "op" => operation
    )
    .increment(1);
}

/// Record native execution latency for one unit.
pub fn record_unit_latency_us(shard: &str, latency_us: u64, success: bool) {
    metrics::histogram!(
        "shardline_unit_latency_us",
        "shard" => shard.to_string(),
        "success" => success.to_string()
    )
    .record(latency_us as f64);
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Record one parallel dispatch.
/// `outcome` is one of: "completed", "aborted", "panicked".
pub fn record_dispatch(
    units: usize,
    pooled_units: usize,
    failed_units: usize,
    caller_run_units: usize,
    duration_us: u64,
    outcome: &'static str,
) {
    metrics::counter!("shardline_dispatch_total", "outcome" => outcome).increment(1);
    metrics::histogram!("shardline_dispatch_units").record(units as f64);
    metrics::counter!("shardline_dispatch_pooled_units_total").increment(pooled_units as u64);
    metrics::counter!("shardline_dispatch_failed_units_total").increment(failed_units as u64);
    metrics::counter!("shardline_dispatch_caller_run_units_total")
        .increment(caller_run_units as u64);
    metrics::histogram!("shardline_dispatch_duration_us", "outcome" => outcome)
        .record(duration_us as f64);
}

/// Record a statement-level call result.
/// `operation` is one of: "query", "update", "execute".
pub fn record_statement(operation: &'static str, duration_us: u64, success: bool) {
    metrics::counter!(
        "shardline_statements_total",
        "op" => operation,
        "success" => success.to_string()
    )
    .increment(1);
    metrics::histogram!("shardline_statement_duration_us", "op" => operation)
        .record(duration_us as f64);
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

pub fn record_pool_queue_depth(depth: usize) {
    metrics::gauge!("shardline_pool_queue_depth").set(depth as f64);
}

pub fn record_pool_active_workers(active: usize) {
    metrics::gauge!("shardline_pool_active_workers").set(active as f64);
}

pub fn record_pool_job_panic() {
    metrics::counter!("shardline_pool_job_panics_total").increment(1);
}
