// src/ingest/fetch.rs
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;

use crate::error::{FeedError, Result};
use crate::ingest::types::Fetcher;

/// The upstream rejects default library agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Single-attempt HTTP GET with a browser identity and a bounded timeout.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout.min(Duration::from_secs(4)))
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        tracing::info!(target: "ingest", %url, "fetching upstream");
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, %url, "upstream request failed");
                counter!("ingest_fetch_errors_total").increment(1);
                return Err(e.into());
            }
        };
        if let Err(e) = resp.error_for_status_ref() {
            tracing::warn!(target: "ingest", status = %resp.status(), %url, "upstream bad status");
            counter!("ingest_fetch_errors_total").increment(1);
            return Err(FeedError::Network(e.to_string()));
        }
        let body = resp.text().await?;
        tracing::debug!(target: "ingest", bytes = body.len(), "upstream body received");
        Ok(body)
    }
}
