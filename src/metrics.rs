//! Prometheus exposition for the series described in `ingest` and `cache`.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Parsing a table page takes a few milliseconds; a slow one means a much larger
/// page than usual.
const PARSE_MS_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0];

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder. Call before building the cache so the gauges it
    /// sets at construction are kept.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .add_global_label("service", "quake-feed")
            .set_buckets_for_metric(Matcher::Full("ingest_parse_ms".to_string()), PARSE_MS_BUCKETS)
            .context("prometheus: parse-time buckets")?
            .install_recorder()
            .context("prometheus: install recorder")?;
        Ok(Self { handle })
    }

    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    }
}
