use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ticker::cache::Cadences;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the refresh cadences as static gauges.
    /// Fails if a global recorder is already installed.
    pub fn init(cadences: &Cadences) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        crate::ticker::ensure_metrics_described();
        for (family, c) in [
            ("general", cadences.general),
            ("insights", cadences.insights),
            ("performance", cadences.performance),
            ("feed", cadences.feed),
        ] {
            gauge!("ticker_refresh_interval_secs", "family" => family)
                .set(c.refresh_every.as_secs_f64());
            gauge!("ticker_stale_after_secs", "family" => family).set(c.stale_after.as_secs_f64());
        }

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
