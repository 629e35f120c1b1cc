//! Logging and metrics setup for the binaries.
//!
//! Library crates only emit through the `tracing` and `metrics` facades;
//! installing a subscriber or a recorder happens here, once per process.
//!
//! # Example
//!
//! ```rust,no_run
//! use order_pipeline_service::telemetry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! telemetry::init_tracing();
//! telemetry::install_prometheus("0.0.0.0:9090".parse()?)?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "order_pipeline=info,order_consumer=info,order_publish=info";

/// Histogram buckets for `*duration_seconds` metrics.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the global `tracing` subscriber: `EnvFilter` from `RUST_LOG`
/// (default [`DEFAULT_LOG_FILTER`]) plus the `fmt` layer.
///
/// Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Prometheus builder with the pipeline's histogram buckets.
///
/// # Errors
///
/// Returns [`MetricsError::Build`] if the bucket configuration is rejected.
pub fn prometheus_builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed or
/// the listener cannot start.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), MetricsError> {
    describe_metrics();

    prometheus_builder()?
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    tracing::info!(addr = %addr, "Metrics exporter listening on http://{}/metrics", addr);
    Ok(())
}

/// Register descriptions for every pipeline metric.
pub fn describe_metrics() {
    describe_counter!("orders.published", "Orders accepted by the broker");
    describe_counter!("orders.processed", "Orders persisted with all their items");
    describe_counter!(
        "orders.duplicates",
        "Deliveries whose order code was already stored"
    );
    describe_counter!(
        "orders.requeued",
        "Deliveries returned to the queue after a transient failure"
    );
    describe_counter!(
        "orders.discarded",
        "Deliveries rejected as malformed or permanently invalid"
    );
    describe_counter!(
        "orders.dead_lettered",
        "Deliveries moved to the dead-letter queue"
    );
    describe_counter!("order_store.errors", "Failed order store writes");
    describe_histogram!(
        "orders.process_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent persisting one order"
    );
}
