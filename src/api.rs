use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;

use crate::cache::{QuakeCache, RefreshReport};
use crate::freshness::FreshnessState;
use crate::ingest::types::Record;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<QuakeCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/get-earthquakes", get(get_earthquakes))
        .route("/refresh", get(refresh))
        .route("/debug/status", get(debug_status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn get_earthquakes(State(state): State<AppState>) -> Json<Vec<Record>> {
    let records = state.cache.get_current_records().await;
    tracing::info!(target: "api", count = records.len(), "serving earthquakes");
    Json(records)
}

async fn refresh(State(state): State<AppState>) -> Json<RefreshReport> {
    Json(state.cache.force_refresh().await)
}

#[derive(serde::Serialize)]
struct StatusOut {
    state: FreshnessState,
    fetched_at: Option<DateTime<Utc>>,
    last_key_seen: Option<String>,
    count: usize,
}

async fn debug_status(State(state): State<AppState>) -> Json<StatusOut> {
    let snap = state.cache.snapshot();
    Json(StatusOut {
        state: state.cache.state_at(Utc::now()),
        fetched_at: state.cache.fetched_at(),
        last_key_seen: snap.last_key_seen.clone(),
        count: snap.records.len(),
    })
}
