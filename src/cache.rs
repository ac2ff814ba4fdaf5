//! Process-wide view of the latest record set.
//!
//! Readers clone an `Arc<Snapshot>` under a short read lock and never wait on a
//! refresh. Refreshes (request-driven or from the scheduler) are serialized by an
//! async mutex and publish a new snapshot only after the store has been rewritten
//! and read back, so a reader sees either the old set or the new one.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::freshness::{FreshnessGate, FreshnessState, ProbeVerdict};
use crate::ingest::enrich::{enrich_within, ImageResolver};
use crate::ingest::layout::LayoutMode;
use crate::ingest::types::{Fetcher, Record};
use crate::ingest::{self, latest_key, IngestReport};
use crate::store::RecordStore;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cache_refresh_total", "Full refresh attempts by outcome.");
        describe_counter!(
            "cache_probe_unchanged_total",
            "Stale checks answered by the probe without a full refresh."
        );
        describe_gauge!("cache_last_refresh_ts", "Unix ts of the last successful refresh.");
        describe_gauge!("cache_records", "Records in the served snapshot.");
        describe_gauge!("cache_stale_after_secs", "Configured staleness window.");
        describe_counter!(
            "cache_refresh_skipped_busy_total",
            "Stale reads served from the current snapshot while another refresh ran."
        );
    });
}

/// Records and their change fingerprint; always replaced together.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: Vec<Record>,
    /// Epicenter of the most recent record.
    pub last_key_seen: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: Arc<Snapshot>,
    fetched_at: Option<DateTime<Utc>>,
}

/// What a gated refresh ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Within the staleness window; nothing fetched.
    Fresh,
    /// Probe matched `last_key_seen`; snapshot kept, window restarted.
    Unchanged,
    Refreshed { count: usize },
    /// Another refresh is running; the current snapshot was served as is.
    InProgress,
    /// Previous snapshot kept.
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    Success,
    Error,
}

/// Result of a manual refresh, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub status: RefreshStatus,
    pub count: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub upstream_url: String,
    pub stale_after_secs: u64,
    pub layout: LayoutMode,
    /// Upper bound on image lookups for one refresh; records not reached keep the
    /// placeholder image.
    pub enrich_budget: Duration,
}

pub struct QuakeCache {
    inner: RwLock<Inner>,
    refresh_lock: Mutex<()>,
    gate: FreshnessGate,
    settings: CacheSettings,
    fetcher: Arc<dyn Fetcher>,
    images: Arc<dyn ImageResolver>,
    store: Arc<RecordStore>,
}

impl QuakeCache {
    pub fn new(
        settings: CacheSettings,
        fetcher: Arc<dyn Fetcher>,
        images: Arc<dyn ImageResolver>,
        store: Arc<RecordStore>,
    ) -> Self {
        ensure_metrics_described();
        gauge!("cache_stale_after_secs").set(settings.stale_after_secs as f64);
        Self {
            inner: RwLock::new(Inner::default()),
            refresh_lock: Mutex::new(()),
            gate: FreshnessGate::new(settings.stale_after_secs),
            settings,
            fetcher,
            images,
            store,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.read().snapshot.clone()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.read().fetched_at
    }

    pub fn last_key_seen(&self) -> Option<String> {
        self.read().snapshot.last_key_seen.clone()
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> FreshnessState {
        if self.refresh_lock.try_lock().is_err() {
            return FreshnessState::Refreshing;
        }
        self.gate.state(self.fetched_at(), now)
    }

    fn stamp(&self, now: DateTime<Utc>) {
        self.write().fetched_at = Some(now);
    }

    fn publish(&self, records: Vec<Record>, now: DateTime<Utc>) {
        let count = records.len();
        let snapshot = Arc::new(Snapshot {
            last_key_seen: latest_key(&records),
            records,
        });
        {
            let mut w = self.write();
            w.snapshot = snapshot;
            w.fetched_at = Some(now);
        }
        gauge!("cache_records").set(count as f64);
        gauge!("cache_last_refresh_ts").set(now.timestamp() as f64);
    }

    /// Seed the snapshot from the store without touching `fetched_at`, so the first
    /// request still probes upstream.
    pub async fn warm_from_store(&self) -> usize {
        let _guard = self.refresh_lock.lock().await;
        match self.store.load_all().await {
            Ok(records) if !records.is_empty() => {
                let count = records.len();
                let snapshot = Arc::new(Snapshot {
                    last_key_seen: latest_key(&records),
                    records,
                });
                self.write().snapshot = snapshot;
                gauge!("cache_records").set(count as f64);
                tracing::info!(target: "cache", count, "warmed from store");
                count
            }
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, "store unreadable at startup");
                0
            }
        }
    }

    /// Cache-aware read; may refresh first.
    pub async fn get_current_records(&self) -> Vec<Record> {
        self.get_current_records_at(Utc::now()).await
    }

    pub async fn get_current_records_at(&self, now: DateTime<Utc>) -> Vec<Record> {
        self.refresh_if_stale_at(now).await;
        self.snapshot().records.clone()
    }

    pub async fn refresh_if_stale(&self) -> RefreshOutcome {
        self.refresh_if_stale_at(Utc::now()).await
    }

    /// The freshness gate: fresh → nothing; stale → probe, then refresh only if
    /// the latest valid epicenter changed or could not be read.
    ///
    /// With a snapshot to serve, a stale reader does not queue behind a refresh
    /// already in flight. Only an empty cache waits for the first one.
    pub async fn refresh_if_stale_at(&self, now: DateTime<Utc>) -> RefreshOutcome {
        if !self.gate.is_stale(self.fetched_at(), now) {
            return RefreshOutcome::Fresh;
        }
        let _guard = match self.refresh_lock.try_lock() {
            Ok(g) => g,
            Err(_) if !self.snapshot().records.is_empty() => {
                counter!("cache_refresh_skipped_busy_total").increment(1);
                return RefreshOutcome::InProgress;
            }
            Err(_) => self.refresh_lock.lock().await,
        };
        // Someone else may have refreshed while we waited.
        if !self.gate.is_stale(self.fetched_at(), now) {
            return RefreshOutcome::Fresh;
        }

        let url = &self.settings.upstream_url;
        let probed = match self.fetcher.fetch(url).await {
            Ok(markup) => Some(ingest::process(&markup, self.settings.layout)),
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, "probe fetch failed");
                None
            }
        };
        let latest = probed.as_ref().and_then(|rep| latest_key(&rep.records));
        let seen = self.last_key_seen();

        match self.gate.judge_probe(seen.as_deref(), latest.as_deref()) {
            ProbeVerdict::Unchanged => {
                tracing::debug!(target: "cache", latest = ?latest, "upstream unchanged");
                counter!("cache_probe_unchanged_total").increment(1);
                self.stamp(now);
                RefreshOutcome::Unchanged
            }
            verdict => {
                tracing::info!(target: "cache", ?verdict, "upstream changed, refreshing");
                match self.full_refresh(probed, now).await {
                    Ok(count) => RefreshOutcome::Refreshed { count },
                    Err(reason) => RefreshOutcome::Failed { reason },
                }
            }
        }
    }

    /// Unconditional refresh, for the manual endpoint.
    pub async fn force_refresh(&self) -> RefreshReport {
        self.force_refresh_at(Utc::now()).await
    }

    pub async fn force_refresh_at(&self, now: DateTime<Utc>) -> RefreshReport {
        let _guard = self.refresh_lock.lock().await;
        match self.full_refresh(None, now).await {
            Ok(count) => RefreshReport {
                status: RefreshStatus::Success,
                count,
                message: "Data refreshed successfully".to_string(),
            },
            Err(reason) => RefreshReport {
                status: RefreshStatus::Error,
                count: self.snapshot().records.len(),
                message: reason,
            },
        }
    }

    /// Caller holds `refresh_lock`. `fetched_at` is stamped whatever happens.
    async fn full_refresh(
        &self,
        report: Option<IngestReport>,
        now: DateTime<Utc>,
    ) -> std::result::Result<usize, String> {
        let res = self.try_full_refresh(report, now).await;
        match &res {
            Ok(count) => {
                counter!("cache_refresh_total", "outcome" => "success").increment(1);
                tracing::info!(target: "cache", count, "refresh complete");
            }
            Err(reason) => {
                counter!("cache_refresh_total", "outcome" => "error").increment(1);
                tracing::warn!(target: "cache", %reason, "refresh failed; keeping previous snapshot");
                self.stamp(now);
            }
        }
        res
    }

    /// Fetch (unless the probe already processed a page) → parse → normalize →
    /// order → enrich → store → reload → publish.
    async fn try_full_refresh(
        &self,
        report: Option<IngestReport>,
        now: DateTime<Utc>,
    ) -> std::result::Result<usize, String> {
        let report = match report {
            Some(r) => r,
            None => ingest::run_once(
                self.fetcher.as_ref(),
                &self.settings.upstream_url,
                self.settings.layout,
            )
            .await
            .map_err(|e| e.to_string())?,
        };

        if report.records.is_empty() {
            return Err(if report.table_found {
                format!("no valid records ({} rows dropped)", report.dropped())
            } else {
                "no table found in upstream markup".to_string()
            });
        }

        let records = enrich_within(
            report.records,
            self.images.as_ref(),
            self.settings.enrich_budget,
        )
        .await;
        // The store is cleared before rewriting. If every write then fails it is
        // left empty on disk while the old snapshot keeps being served.
        self.store
            .replace_all(&records)
            .await
            .map_err(|e| e.to_string())?;
        let loaded = self.store.load_all().await.map_err(|e| e.to_string())?;
        if loaded.is_empty() {
            return Err("store returned no records after write".to_string());
        }

        let count = loaded.len();
        self.publish(loaded, now);
        Ok(count)
    }
}
