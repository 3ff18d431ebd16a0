//! Metrics and observability
//!
//! Counters for session lifecycle and received bytes, exported in the
//! Prometheus text format.

pub mod exporter;
pub mod recorder;

pub use exporter::{install_recorder, metrics_route, render_metrics, MetricsError};
pub use recorder::init_metrics;
