// src/config.rs
//! Service configuration: built-in defaults, then an optional TOML file, then
//! environment variables (a `.env` file is loaded by the binary beforehand).

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::freshness::DEFAULT_STALE_AFTER_SECS;
use crate::ingest::enrich::{DEFAULT_IMAGE, UNSPLASH_SEARCH_URL};
use crate::ingest::fetch::BROWSER_USER_AGENT;
use crate::ingest::layout::LayoutMode;

pub const ENV_CONFIG_PATH: &str = "QUAKE_FEED_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/quake_feed.toml";
pub const DEFAULT_UPSTREAM_URL: &str = "https://seismonepal.gov.np/earthquakes";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub upstream_url: String,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub stale_after_secs: u64,
    pub refresh_interval_secs: u64,
    /// Total time a refresh may spend on image lookups.
    pub enrich_budget_secs: u64,
    pub data_dir: PathBuf,
    pub unsplash_api_key: Option<String>,
    pub image_api_url: String,
    pub default_image: String,
    pub layout: LayoutMode,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            user_agent: BROWSER_USER_AGENT.to_string(),
            fetch_timeout_secs: 10,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            refresh_interval_secs: 600,
            enrich_budget_secs: 15,
            data_dir: PathBuf::from("earthquakes_data"),
            unsplash_api_key: None,
            image_api_url: UNSPLASH_SEARCH_URL.to_string(),
            default_image: DEFAULT_IMAGE.to_string(),
            layout: LayoutMode::Auto,
        }
    }
}

impl FeedConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn enrich_budget(&self) -> Duration {
        Duration::from_secs(self.enrich_budget_secs.max(1))
    }

    /// Load a TOML file; missing keys keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Resolve the config:
    /// 1) $QUAKE_FEED_CONFIG (must exist)
    /// 2) config/quake_feed.toml
    /// 3) built-in defaults
    ///
    /// then apply environment overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_str("QUAKE_UPSTREAM_URL") {
            self.upstream_url = v;
        }
        if let Some(v) = env_str("QUAKE_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = env_parse("QUAKE_FETCH_TIMEOUT_SECS")? {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = env_parse("QUAKE_STALE_AFTER_SECS")? {
            self.stale_after_secs = v;
        }
        if let Some(v) = env_parse("QUAKE_REFRESH_INTERVAL_SECS")? {
            self.refresh_interval_secs = v;
        }
        if let Some(v) = env_parse("QUAKE_ENRICH_BUDGET_SECS")? {
            self.enrich_budget_secs = v;
        }
        if let Some(v) = env_str("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_str("UNSPLASH_API_KEY") {
            self.unsplash_api_key = Some(v);
        }
        if let Some(v) = env_str("QUAKE_IMAGE_API_URL") {
            self.image_api_url = v;
        }
        if let Some(v) = env_str("QUAKE_DEFAULT_IMAGE") {
            self.default_image = v;
        }
        if let Some(v) = env_str("QUAKE_LAYOUT") {
            self.layout = v
                .parse()
                .map_err(|e: String| anyhow!("QUAKE_LAYOUT: {e}"))?;
        }
        Ok(())
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_str(key) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{key}={v}: {e}")),
    }
}
