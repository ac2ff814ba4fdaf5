// src/ingest/enrich.rs
//! Epicenter photo lookup. Any failure resolves to the default image; enrichment
//! never fails a refresh.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::error::Result;
use crate::ingest::types::{Record, PLACEHOLDER_IMAGE, UNKNOWN};

pub const DEFAULT_IMAGE: &str = "/static/default.jpg";
pub const UNSPLASH_SEARCH_URL: &str = "https://api.unsplash.com/search/photos";

#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, epicenter: &str) -> String;
}

/// Always the default image. Used when no API key is configured.
pub struct StaticImage {
    pub url: String,
}

impl Default for StaticImage {
    fn default() -> Self {
        Self {
            url: DEFAULT_IMAGE.to_string(),
        }
    }
}

#[async_trait]
impl ImageResolver for StaticImage {
    async fn resolve(&self, _epicenter: &str) -> String {
        self.url.clone()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    small: String,
}

pub struct UnsplashResolver {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    fallback: String,
}

impl UnsplashResolver {
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        fallback: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(4)))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            fallback: fallback.into(),
        })
    }

    async fn search(&self, key: &str, query: &str) -> anyhow::Result<Option<String>> {
        let resp = self
            .http
            .get(&self.api_url)
            .query(&[("query", query), ("per_page", "1")])
            .header("Authorization", format!("Client-ID {key}"))
            .send()
            .await?
            .error_for_status()?;
        let body: SearchResp = resp.json().await?;
        Ok(body.results.into_iter().next().map(|p| p.urls.small))
    }
}

#[async_trait]
impl ImageResolver for UnsplashResolver {
    async fn resolve(&self, epicenter: &str) -> String {
        let Some(key) = self.api_key.as_deref() else {
            tracing::warn!(target: "enrich", "image api key missing");
            return self.fallback.clone();
        };
        if epicenter == UNKNOWN {
            return self.fallback.clone();
        }
        match self.search(key, epicenter).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                tracing::warn!(target: "enrich", %epicenter, "no image found");
                self.fallback.clone()
            }
            Err(e) => {
                tracing::warn!(target: "enrich", %epicenter, error = ?e, "image lookup failed");
                self.fallback.clone()
            }
        }
    }
}

/// Set `image_url` on every record, looking up each distinct epicenter once.
pub async fn enrich(mut records: Vec<Record>, resolver: &dyn ImageResolver) -> Vec<Record> {
    enrich_in_place(&mut records, resolver).await;
    records
}

/// `enrich` with a deadline for the whole set. Records not reached in time keep
/// whatever image they already carry.
pub async fn enrich_within(
    mut records: Vec<Record>,
    resolver: &dyn ImageResolver,
    budget: Duration,
) -> Vec<Record> {
    if tokio::time::timeout(budget, enrich_in_place(&mut records, resolver))
        .await
        .is_err()
    {
        let pending = records.iter().filter(|r| r.image_url == PLACEHOLDER_IMAGE).count();
        tracing::warn!(target: "enrich", budget_ms = budget.as_millis() as u64, pending, "image lookups cut short");
        counter!("enrich_budget_exceeded_total").increment(1);
    }
    records
}

async fn enrich_in_place(records: &mut [Record], resolver: &dyn ImageResolver) {
    let mut resolved: HashMap<String, String> = HashMap::new();
    for r in records.iter_mut() {
        if let Some(url) = resolved.get(&r.epicenter) {
            r.image_url = url.clone();
            continue;
        }
        let url = resolver.resolve(&r.epicenter).await;
        resolved.insert(r.epicenter.clone(), url.clone());
        r.image_url = url;
    }
}
