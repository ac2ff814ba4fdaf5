// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod freshness;
pub mod ingest;
pub mod metrics;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::cache::{QuakeCache, RefreshOutcome, RefreshReport, RefreshStatus};
pub use crate::error::FeedError;
pub use crate::ingest::types::Record;

use std::sync::Arc;

use crate::cache::CacheSettings;
use crate::config::FeedConfig;
use crate::ingest::enrich::{ImageResolver, StaticImage, UnsplashResolver};
use crate::ingest::fetch::HttpFetcher;
use crate::store::{FsBackend, RecordStore};

/// Wire the production collaborators (HTTP fetcher, filesystem store, image
/// lookup) into a cache according to `cfg`.
pub fn build_cache(cfg: &FeedConfig) -> anyhow::Result<QuakeCache> {
    let fetcher = HttpFetcher::new(&cfg.user_agent, cfg.fetch_timeout())?;
    let images: Arc<dyn ImageResolver> = match cfg.unsplash_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => Arc::new(UnsplashResolver::new(
            cfg.image_api_url.clone(),
            Some(key.to_string()),
            cfg.default_image.clone(),
            cfg.fetch_timeout(),
        )?),
        _ => {
            tracing::warn!("UNSPLASH_API_KEY not set; using default image for all records");
            Arc::new(StaticImage {
                url: cfg.default_image.clone(),
            })
        }
    };
    let store = RecordStore::new(FsBackend::new(cfg.data_dir.clone()));

    Ok(QuakeCache::new(
        CacheSettings {
            upstream_url: cfg.upstream_url.clone(),
            stale_after_secs: cfg.stale_after_secs,
            layout: cfg.layout,
            enrich_budget: cfg.enrich_budget(),
        },
        Arc::new(fetcher),
        images,
        Arc::new(store),
    ))
}
