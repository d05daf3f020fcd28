//! Prometheus metrics for observability and monitoring.
//!
//! The store records through the `metrics` facade unconditionally; nothing
//! is collected until a recorder is installed. [`MetricsExporter`] installs
//! the Prometheus recorder and renders the text exposition format, which
//! the host can serve however it likes.
//!
//! Metrics covered:
//! - Dispatch, completion, failure and discard counts
//! - Queue depth
//! - Reduction latency and pipeline length per action
//! - Middleware invocations and stalls
//!
//! # Example
//!
//! ```rust,no_run
//! use flux_store_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // ... tick the store ...
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder wrapper.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not installed its recorder yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the store metrics and install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist per process. If one is already
    /// installed (e.g., by another test) this logs a warning, succeeds and
    /// leaves [`handle`](Self::handle) empty.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .set_buckets_for_metric(
                Matcher::Full("store_pipeline_ticks".to_string()),
                &[2.0, 3.0, 4.0, 8.0, 16.0, 60.0, 300.0, 3600.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "store_actions_dispatched_total",
        "Total number of actions accepted by dispatch"
    );
    describe_counter!(
        "store_actions_completed_total",
        "Total number of actions finalized (including failed ones)"
    );
    describe_counter!(
        "store_actions_failed_total",
        "Total number of actions finalized with an error"
    );
    describe_counter!(
        "store_actions_discarded_total",
        "Total number of work items dropped by clean_queue or teardown"
    );
    describe_counter!(
        "store_dispatch_rejected_total",
        "Total number of rejected store operations"
    );
    describe_gauge!(
        "store_queue_depth",
        "Number of queued work items that have not started"
    );
    describe_histogram!(
        "store_reduction_duration_seconds",
        "Time taken to run every reducer for one action"
    );
    describe_histogram!(
        "store_pipeline_ticks",
        "Ticks between dequeue and completion for one action"
    );
    describe_counter!(
        "store_middleware_invocations_total",
        "Total number of middleware invocations"
    );
    describe_counter!(
        "store_middleware_stalls_total",
        "Total number of continuations abandoned after the stall timeout"
    );
}

/// Store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record an accepted dispatch.
    pub fn record_dispatch(queue_depth: usize) {
        counter!("store_actions_dispatched_total").increment(1);
        Self::record_queue_depth(queue_depth);
    }

    /// Record a rejected operation.
    pub fn record_rejection() {
        counter!("store_dispatch_rejected_total").increment(1);
    }

    /// Record the current queue depth.
    #[allow(clippy::cast_precision_loss)] // Queue depths stay far below 2^52
    pub fn record_queue_depth(depth: usize) {
        gauge!("store_queue_depth").set(depth as f64);
    }

    /// Record one reduction pass.
    pub fn record_reduction(duration: Duration) {
        histogram!("store_reduction_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a finalized action.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_completion(failed: bool, ticks: u64) {
        counter!("store_actions_completed_total").increment(1);
        if failed {
            counter!("store_actions_failed_total").increment(1);
        }
        histogram!("store_pipeline_ticks").record(ticks as f64);
    }

    /// Record discarded work items.
    pub fn record_discarded(count: usize) {
        if count > 0 {
            counter!("store_actions_discarded_total").increment(count as u64);
        }
    }

    /// Record a middleware invocation.
    pub fn record_middleware_invocation() {
        counter!("store_middleware_invocations_total").increment(1);
    }

    /// Record a continuation abandoned after the stall timeout.
    pub fn record_stall() {
        counter!("store_middleware_stalls_total").increment(1);
    }
}
