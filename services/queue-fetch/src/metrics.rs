//! Prometheus recorder for the fetch run
//!
//! The queue client records through the `metrics` facade; this installs the
//! recorder those calls land in and renders a text snapshot on exit.

use std::path::Path;

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use queue_client::metrics::REQUEST_DURATION_SECONDS;

/// Bucket boundaries for request durations, 50ms to 5 minutes. A single
/// request may wait on the pool and retry across several sessions.
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Write the current metrics in Prometheus text format.
pub fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, handle.render())
        .with_context(|| format!("failed to write metrics snapshot to {}", path.display()))
}
