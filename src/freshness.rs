//! Staleness and change detection.
//!
//! Fresh → Stale once `fetched_at` is older than the threshold. A stale cache is
//! probed first; only a changed (or unreadable) latest epicenter earns a full
//! refresh. Whatever the outcome, the caller stamps `fetched_at`, which caps
//! upstream traffic at one attempt per window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessState {
    Fresh,
    Stale,
    Refreshing,
}

/// Outcome of comparing the probe against `last_key_seen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Same latest epicenter: skip the full refresh.
    Unchanged,
    Changed { latest: String },
    /// Probe failed or found no row; refresh to be safe.
    Inconclusive,
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessGate {
    stale_after: ChronoDuration,
}

impl Default for FreshnessGate {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER_SECS)
    }
}

impl FreshnessGate {
    /// Thresholds beyond `i64` seconds are clamped.
    pub fn new(stale_after_secs: u64) -> Self {
        let secs = i64::try_from(stale_after_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        Self {
            stale_after: ChronoDuration::seconds(secs),
        }
    }

    pub fn stale_after(&self) -> ChronoDuration {
        self.stale_after
    }

    /// Never fetched counts as stale. A clock that went backwards counts as fresh.
    pub fn is_stale(&self, fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match fetched_at {
            None => true,
            Some(ts) => now.signed_duration_since(ts) > self.stale_after,
        }
    }

    pub fn state(&self, fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> FreshnessState {
        if self.is_stale(fetched_at, now) {
            FreshnessState::Stale
        } else {
            FreshnessState::Fresh
        }
    }

    pub fn judge_probe(&self, last_key_seen: Option<&str>, probed: Option<&str>) -> ProbeVerdict {
        match (last_key_seen, probed) {
            (_, None) => ProbeVerdict::Inconclusive,
            (Some(seen), Some(latest)) if seen == latest => ProbeVerdict::Unchanged,
            (_, Some(latest)) => ProbeVerdict::Changed {
                latest: latest.to_string(),
            },
        }
    }
}
