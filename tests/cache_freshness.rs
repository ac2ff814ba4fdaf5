// tests/cache_freshness.rs
//
// Freshness gate + cache orchestration against scripted upstream responses.
//
// Covered:
// - first access fetches; repeat access inside the window fetches nothing
// - stale + unchanged probe: no full refresh, no store churn, no image lookups
// - stale + changed probe: full refresh reusing the probe response
// - failures keep the previous snapshot and still restart the window
// - concurrent readers trigger a single refresh
// - an invalid first row upstream does not force refreshes
// - stale readers are served while a slow refresh runs

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{harness, harness_with_store, page, t0};
use quake_feed::cache::RefreshStatus;
use quake_feed::freshness::FreshnessState;
use quake_feed::store::{MemoryBackend, RecordStore};
use quake_feed::RefreshOutcome;

const FIRST: &[common::Row<'static>] = &[
    ("2022-08-18", "01:00", "M4.5", "Bajura"),
    ("2022-08-17", "10:00", "M4.2", "Gorkha"),
];

const SECOND: &[common::Row<'static>] = &[
    ("2022-08-18", "11:30", "M5.1", "Jajarkot"),
    ("2022-08-18", "01:00", "M4.5", "Bajura"),
    ("2022-08-17", "10:00", "M4.2", "Gorkha"),
];

#[tokio::test]
async fn first_access_fetches_then_window_serves_same_snapshot() {
    let h = harness();
    h.fetcher.push_ok(page(FIRST));

    let first = h.cache.get_current_records_at(t0()).await;
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].epicenter, "Bajura");
    assert_eq!(first[0].image_url, "https://img.test/bajura.jpg");
    assert_eq!(h.fetcher.calls(), 1);
    let snap_a = h.cache.snapshot();

    let second = h
        .cache
        .get_current_records_at(t0() + Duration::seconds(120))
        .await;
    assert_eq!(second, first);
    assert_eq!(h.fetcher.calls(), 1, "no upstream call inside the window");
    assert!(Arc::ptr_eq(&snap_a, &h.cache.snapshot()));
    assert_eq!(h.cache.state_at(t0() + Duration::seconds(120)), FreshnessState::Fresh);
}

#[tokio::test]
async fn unchanged_probe_skips_full_refresh() {
    let h = harness();
    h.fetcher.push_ok(page(FIRST));
    h.cache.get_current_records_at(t0()).await;
    let images_after_first = h.images.calls();
    let snap_a = h.cache.snapshot();

    let later = t0() + Duration::seconds(301);
    assert_eq!(h.cache.state_at(later), FreshnessState::Stale);
    h.fetcher.push_ok(page(FIRST));
    let outcome = h.cache.refresh_if_stale_at(later).await;

    assert_eq!(outcome, RefreshOutcome::Unchanged);
    assert_eq!(h.fetcher.calls(), 2);
    assert_eq!(h.images.calls(), images_after_first, "no enrichment on unchanged");
    assert!(Arc::ptr_eq(&snap_a, &h.cache.snapshot()));
    assert_eq!(h.cache.fetched_at(), Some(later));
}

#[tokio::test]
async fn changed_probe_triggers_full_refresh_with_one_fetch() {
    let h = harness();
    h.fetcher.push_ok(page(FIRST));
    h.cache.get_current_records_at(t0()).await;
    assert_eq!(h.cache.last_key_seen().as_deref(), Some("Bajura"));

    let later = t0() + Duration::seconds(400);
    h.fetcher.push_ok(page(SECOND));
    let outcome = h.cache.refresh_if_stale_at(later).await;

    assert_eq!(outcome, RefreshOutcome::Refreshed { count: 3 });
    assert_eq!(h.fetcher.calls(), 2, "probe response is reused for the refresh");
    assert_eq!(h.cache.last_key_seen().as_deref(), Some("Jajarkot"));
    let stored = h.store.load_all().await.expect("load");
    assert_eq!(stored, h.cache.snapshot().records);
}

#[tokio::test]
async fn tableless_response_keeps_previous_snapshot() {
    let h = harness();
    h.fetcher.push_ok(page(FIRST));
    h.cache.get_current_records_at(t0()).await;
    let before = h.cache.snapshot();

    let later = t0() + Duration::seconds(301);
    h.fetcher.push_ok("<html><body>Service temporarily unavailable</body></html>");
    let outcome = h.cache.refresh_if_stale_at(later).await;

    assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
    assert!(Arc::ptr_eq(&before, &h.cache.snapshot()));
    assert_eq!(h.store.load_all().await.expect("load").len(), 2);
    // Window restarts even on failure.
    assert_eq!(h.cache.fetched_at(), Some(later));
    assert_eq!(
        h.cache.refresh_if_stale_at(later + Duration::seconds(10)).await,
        RefreshOutcome::Fresh
    );
}

#[tokio::test]
async fn probe_failure_falls_through_to_full_refresh() {
    let h = harness();
    h.fetcher.push_err("connection reset");
    h.fetcher.push_ok(page(FIRST));

    let outcome = h.cache.refresh_if_stale_at(t0()).await;
    assert_eq!(outcome, RefreshOutcome::Refreshed { count: 2 });
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn total_failure_with_empty_cache_serves_empty_and_reports_error() {
    let h = harness();
    h.fetcher.push_err("dns failure");
    h.fetcher.push_err("dns failure");
    let records = h.cache.get_current_records_at(t0()).await;
    assert!(records.is_empty());

    h.fetcher.push_err("dns failure");
    let report = h.cache.force_refresh_at(t0() + Duration::seconds(5)).await;
    assert_eq!(report.status, RefreshStatus::Error);
    assert_eq!(report.count, 0);
    assert!(report.message.contains("dns failure"));
}

#[tokio::test]
async fn force_refresh_ignores_the_window() {
    let h = harness();
    h.fetcher.push_ok(page(FIRST));
    h.cache.get_current_records_at(t0()).await;

    h.fetcher.push_ok(page(SECOND));
    let report = h.cache.force_refresh_at(t0() + Duration::seconds(1)).await;
    assert_eq!(report.status, RefreshStatus::Success);
    assert_eq!(report.count, 3);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn invalid_rows_never_reach_cache_or_store() {
    let h = harness();
    h.fetcher.push_ok(page(&[
        ("2022-08-18", "01:00", "", "Bajura"),
        ("2022-08-17", "10:00", "M4.2", "Gorkha"),
        ("not-a-date", "09:00", "M3.9", "Dolakha"),
    ]));
    let records = h.cache.get_current_records_at(t0()).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].epicenter, "Gorkha");
    assert!(records.iter().all(|r| r.is_valid()));
}

#[tokio::test]
async fn concurrent_readers_share_one_refresh() {
    let h = harness();
    h.fetcher.push_ok(page(FIRST));
    let (a, b, c) = tokio::join!(
        h.cache.get_current_records_at(t0()),
        h.cache.get_current_records_at(t0()),
        h.cache.get_current_records_at(t0()),
    );
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a.len(), 2);
}

#[tokio::test]
async fn warmed_cache_probes_before_refetching() {
    let store = Arc::new(RecordStore::new(MemoryBackend::new()));
    let first = harness_with_store(store.clone());
    first.fetcher.push_ok(page(FIRST));
    first.cache.get_current_records_at(t0()).await;

    // A restarted process over the same store.
    let restarted = harness_with_store(store);
    assert_eq!(restarted.cache.warm_from_store().await, 2);
    assert_eq!(restarted.cache.fetched_at(), None);
    assert_eq!(restarted.cache.state_at(t0()), FreshnessState::Stale);
    assert_eq!(restarted.cache.last_key_seen().as_deref(), Some("Bajura"));

    restarted.fetcher.push_ok(page(FIRST));
    let outcome = restarted
        .cache
        .refresh_if_stale_at(t0() + Duration::seconds(60))
        .await;
    assert_eq!(outcome, RefreshOutcome::Unchanged);
    assert_eq!(restarted.fetcher.calls(), 1);
    assert_eq!(restarted.images.calls(), 0);
    assert_eq!(restarted.cache.snapshot().records.len(), 2);
}

#[tokio::test]
async fn invalid_leading_row_still_counts_as_unchanged() {
    let h = harness();
    // Preliminary event listed first, magnitude not yet published.
    let listing: &[common::Row<'static>] = &[
        ("2022-08-18", "11:00", "", "Dolakha"),
        ("2022-08-18", "01:00", "M4.5", "Bajura"),
    ];
    h.fetcher.push_ok(page(listing));
    h.cache.get_current_records_at(t0()).await;
    assert_eq!(h.cache.last_key_seen().as_deref(), Some("Bajura"));
    assert_eq!(h.images.calls(), 1);
    let snap_a = h.cache.snapshot();

    h.fetcher.push_ok(page(listing));
    let outcome = h.cache.refresh_if_stale_at(t0() + Duration::seconds(301)).await;

    assert_eq!(outcome, RefreshOutcome::Unchanged);
    assert_eq!(h.fetcher.calls(), 2);
    assert_eq!(h.images.calls(), 1);
    assert!(Arc::ptr_eq(&snap_a, &h.cache.snapshot()));
}

#[tokio::test(start_paused = true)]
async fn stale_reader_is_served_while_slow_refresh_runs() {
    let h = harness();
    h.fetcher.push_ok(page(FIRST));
    h.cache.get_current_records_at(t0()).await;

    h.images.set_delay(StdDuration::from_secs(10));
    h.fetcher.push_ok(page(&[
        ("2022-08-19", "04:00", "M4.0", "Dolakha"),
        ("2022-08-19", "03:00", "M4.1", "Sindhupalchok"),
        ("2022-08-19", "02:00", "M3.8", "Myagdi"),
        ("2022-08-19", "01:00", "M4.4", "Jumla"),
    ]));
    let later = t0() + Duration::seconds(301);
    let cache = h.cache.clone();
    let background = tokio::spawn(async move { cache.refresh_if_stale_at(later).await });

    // Let the background refresh reach its first image lookup.
    tokio::time::sleep(StdDuration::from_millis(1)).await;
    assert_eq!(h.cache.state_at(later), FreshnessState::Refreshing);

    let started = tokio::time::Instant::now();
    let served = h.cache.get_current_records_at(later).await;
    assert!(started.elapsed() < StdDuration::from_secs(1));
    assert_eq!(served.len(), 2);
    assert_eq!(served[0].epicenter, "Bajura");
    assert_eq!(
        h.cache.refresh_if_stale_at(later).await,
        RefreshOutcome::InProgress
    );

    // Four lookups at 10s each are cut off by the enrichment budget.
    let outcome = background.await.expect("join");
    assert_eq!(outcome, RefreshOutcome::Refreshed { count: 4 });
    assert!(started.elapsed() <= common::ENRICH_BUDGET);
    assert_eq!(h.cache.last_key_seen().as_deref(), Some("Dolakha"));
}
