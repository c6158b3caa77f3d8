//! Prometheus metrics for Rivet.
//!
//! Recording goes through the `metrics` facade, so the functions below are
//! cheap no-ops until a recorder is installed with [`init_metrics`].
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `rivet_pool_acquire_total` | Counter | `kind`, `source` | Wrapper acquisitions |
//! | `rivet_aborts_total` | Counter | - | Responses aborted by the peer |
//! | `rivet_handler_errors_total` | Counter | `kind` | Errors reaching the error pipeline |
//! | `rivet_in_flight_tasks` | Gauge | - | Handler tasks not yet finished |
//! | `rivet_published_messages_total` | Counter | - | Pub/sub publishes |
//!
//! There is no built-in HTTP listener; serve [`render_metrics`] from a
//! route if the metrics should be scraped.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Where a pooled wrapper came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireSource {
    /// Popped from the free stack.
    Pooled,
    /// Built because the free stack was empty.
    Transient,
}

impl AcquireSource {
    /// Label value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pooled => "pooled",
            Self::Transient => "transient",
        }
    }
}

/// Installs the Prometheus recorder.
///
/// Calling it again after a successful install is a no-op.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if another recorder is installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "rivet_pool_acquire_total",
        "Wrapper acquisitions by kind and source"
    );
    describe_counter!("rivet_aborts_total", "Responses aborted by the peer");
    describe_counter!(
        "rivet_handler_errors_total",
        "Handler errors routed to the error pipeline"
    );
    describe_gauge!("rivet_in_flight_tasks", "Handler tasks not yet finished");
    describe_counter!("rivet_published_messages_total", "Pub/sub publishes");
}

/// Records one wrapper acquisition.
pub fn record_acquire(kind: &'static str, source: AcquireSource) {
    counter!(
        "rivet_pool_acquire_total",
        "kind" => kind,
        "source" => source.as_str()
    )
    .increment(1);
}

/// Records a peer abort.
pub fn record_abort() {
    counter!("rivet_aborts_total").increment(1);
}

/// Records an error that reached the error pipeline.
///
/// `kind` is `"request"`, `"websocket"` or `"lifecycle"`.
pub fn record_handler_error(kind: &'static str) {
    counter!("rivet_handler_errors_total", "kind" => kind).increment(1);
}

/// Records a publish.
pub fn record_publish() {
    counter!("rivet_published_messages_total").increment(1);
}

/// Sets the in-flight task gauge.
pub fn set_in_flight_tasks(count: usize) {
    gauge!("rivet_in_flight_tasks").set(count as f64);
}
