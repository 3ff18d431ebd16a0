//! Prometheus exporter
//!
//! The recorder is installed without its own listener; the server renders it
//! on its own `/metrics` route.

use crate::metrics::recorder::init_metrics;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to setup metrics: {0}")]
    SetupFailed(String),
}

/// Install the global Prometheus recorder. Later calls return the first handle.
pub fn install_recorder() -> Result<&'static PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
    init_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Route serving the installed recorder in the Prometheus text format.
pub fn metrics_route<S>() -> axum::routing::MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    axum::routing::get(|| async {
        match render_metrics() {
            Some(body) => (
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                body,
            )
                .into_response(),
            None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response(),
        }
    })
}
