//! Seismic feed service binary.
//! Loads config, warms the cache from disk, runs a first refresh, starts the
//! background scheduler and serves the JSON API.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quake_feed::api::{self, AppState};
use quake_feed::config::FeedConfig;
use quake_feed::metrics::Metrics;
use quake_feed::scheduler::spawn_refresh_scheduler;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quake_feed=info,warn"));

    // Shuttle may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = FeedConfig::load_default().context("loading feed config")?;
    tracing::info!(upstream = %cfg.upstream_url, data_dir = %cfg.data_dir.display(), "starting");

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics disabled");
            None
        }
    };

    let cache = Arc::new(quake_feed::build_cache(&cfg).context("building cache")?);

    let warmed = cache.warm_from_store().await;
    let first = cache.refresh_if_stale().await;
    tracing::info!(warmed, outcome = ?first, "initial refresh");

    spawn_refresh_scheduler(cache.clone(), cfg.refresh_interval());

    let mut router = api::router(AppState { cache });
    if let Some(m) = metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
