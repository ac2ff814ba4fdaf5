// tests/common/mod.rs
// Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quake_feed::cache::{CacheSettings, QuakeCache};
use quake_feed::error::{FeedError, Result};
use quake_feed::ingest::enrich::ImageResolver;
use quake_feed::ingest::layout::LayoutMode;
use quake_feed::ingest::types::Fetcher;
use quake_feed::store::{MemoryBackend, RecordStore};

pub const UPSTREAM: &str = "http://upstream.test/earthquakes";
pub const ENRICH_BUDGET: Duration = Duration::from_secs(15);

/// Replays queued responses in order and counts calls.
#[derive(Default)]
pub struct ScriptedFetcher {
    queue: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_ok(&self, body: impl Into<String>) {
        self.queue.lock().unwrap().push_back(Ok(body.into()));
    }

    pub fn push_err(&self, msg: &str) {
        self.queue.lock().unwrap().push_back(Err(msg.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        assert_eq!(url, UPSTREAM);
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().unwrap().pop_front() {
            Some(Ok(body)) => Ok(body),
            Some(Err(msg)) => Err(FeedError::Network(msg)),
            None => Err(FeedError::Network("script exhausted".into())),
        }
    }
}

#[derive(Default)]
pub struct CountingImages {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
}

impl CountingImages {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every later lookup take `d` (on the tokio clock).
    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().unwrap() = d;
    }
}

#[async_trait]
impl ImageResolver for CountingImages {
    async fn resolve(&self, epicenter: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        format!("https://img.test/{}.jpg", epicenter.to_lowercase())
    }
}

pub struct Harness {
    pub cache: Arc<QuakeCache>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub images: Arc<CountingImages>,
    pub store: Arc<RecordStore>,
}

pub fn harness_with_store(store: Arc<RecordStore>) -> Harness {
    let fetcher = ScriptedFetcher::new();
    let images = CountingImages::new();
    let cache = QuakeCache::new(
        CacheSettings {
            upstream_url: UPSTREAM.to_string(),
            stale_after_secs: 300,
            layout: LayoutMode::Auto,
            enrich_budget: ENRICH_BUDGET,
        },
        fetcher.clone(),
        images.clone(),
        store.clone(),
    );
    Harness {
        cache: Arc::new(cache),
        fetcher,
        images,
        store,
    }
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(RecordStore::new(MemoryBackend::new())))
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 8, 18, 12, 0, 0).unwrap()
}

/// (date_ad, time_utc, magnitude cell, epicenter)
pub type Row<'a> = (&'a str, &'a str, &'a str, &'a str);

/// Extended-layout page, rows in the given (upstream) order.
pub fn page(rows: &[Row]) -> String {
    let mut body = String::from(
        "<html><body><table class=\"table\"><thead><tr><th>Date</th><th>Time</th>\
         <th>Latitude</th><th>Longitude</th><th>Magnitude</th><th>Epicenter</th>\
         <th>Remarks</th><th>Source</th></tr></thead><tbody>",
    );
    for (date, time, mag, epi) in rows {
        body.push_str(&format!(
            "<tr><td>B.S.: 2079-05-02<br/>A.D.: {date}</td><td>Local: 06:45<br/>UTC: {time}</td>\
             <td>28.5</td><td>83.9</td><td>{mag}</td><td>{epi}</td><td></td><td>NSC</td></tr>"
        ));
    }
    body.push_str("</tbody></table></body></html>");
    body
}
