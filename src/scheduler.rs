// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;

use crate::cache::{QuakeCache, RefreshOutcome};

/// Spawn the background refresh timer. Each tick goes through the same gated
/// path as requests, so a tick inside the staleness window is a no-op.
pub fn spawn_refresh_scheduler(cache: Arc<QuakeCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; startup already refreshed.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let outcome = cache.refresh_if_stale().await;
            counter!("scheduler_ticks_total").increment(1);
            match &outcome {
                RefreshOutcome::Failed { reason } => {
                    tracing::warn!(target: "scheduler", %reason, "scheduled refresh failed");
                }
                other => {
                    tracing::info!(target: "scheduler", outcome = ?other, "scheduled refresh tick");
                }
            }
        }
    })
}
