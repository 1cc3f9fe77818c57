//! Metrics for mend.
//!
//! Counters go through the [`metrics`] facade, which is a no-op until a
//! recorder is installed. Malformed tool-call counts are also kept in an
//! in-process [`MalformedMetricsStore`] so hosts can read a snapshot without
//! an exporter.

pub mod malformed;

pub use {
    malformed::{
        MalformedMetrics, MalformedMetricsStore, ModelMetrics, ProviderMetrics, ReasonCounts,
        record_malformed, reset_metrics, shared_store, snapshot_metrics,
    },
    metrics::{counter, describe_counter},
};

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Metric names emitted for tool-call handling.
pub mod toolcalls {
    /// Labels: `provider`, `model`, `tool`, `reason`.
    pub const MALFORMED_TOTAL: &str = "tool_call_malformed_total";
    /// Labels: `kind` (`read_only` or `mutating`).
    pub const DETECTED_TOTAL: &str = "tool_calls_detected_total";
}

/// Attach descriptions to every metric this crate names.
pub fn describe_metrics() {
    describe_counter!(
        toolcalls::MALFORMED_TOTAL,
        "Responses where a tool call was expected but none could be used"
    );
    describe_counter!(
        toolcalls::DETECTED_TOTAL,
        "Tool calls detected in model output"
    );
}

/// Install the Prometheus recorder as the global metrics recorder.
///
/// The returned handle renders the exposition text on demand.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    use anyhow::Context;

    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;
    describe_metrics();
    tracing::debug!("prometheus recorder installed");
    Ok(handle)
}
