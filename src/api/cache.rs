use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::{
    error::AuthError,
    kv::KvMetricsSnapshot,
    management::{CleanupReport, GenreCacheStats, Session},
    server::AppState,
};

const DEFAULT_MAX_AGE_DAYS: u32 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    pub genre_cache: GenreCacheStats,
    pub hit_rate: f64,
    /// Process-local counters, only shown to signed-in users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kv: Option<KvMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_writes: Option<usize>,
}

pub async fn cache_stats(
    State(state): State<AppState>,
    Extension(session): Extension<Option<Session>>,
) -> Json<CacheStatsResponse> {
    let stats = state.genres.stats().await;
    let signed_in = session.is_some();

    Json(CacheStatsResponse {
        hit_rate: stats.hit_rate(),
        genre_cache: stats,
        kv: signed_in.then(|| state.kv.metrics()),
        pending_writes: signed_in.then(|| state.kv.pending_writes()),
    })
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub ids: Vec<String>,
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<Value>, AuthError> {
    let removed = state.genres.invalidate(&req.ids).await?;
    info!(user_id = %session.user_id, removed, "genre cache invalidated by admin");
    Ok(Json(json!({ "invalidated": removed })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub max_age_days: Option<u32>,
}

pub async fn cleanup_cache(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<CleanupReport>, AuthError> {
    let days = req.max_age_days.unwrap_or(DEFAULT_MAX_AGE_DAYS);
    Ok(Json(state.genres.cleanup(days).await?))
}

pub async fn clear_cache(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Value>, AuthError> {
    let removed = state.genres.clear_all().await?;
    info!(user_id = %session.user_id, removed, "genre cache cleared by admin");
    Ok(Json(json!({ "cleared": removed })))
}
