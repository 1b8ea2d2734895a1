use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::{
    error::AuthError,
    management::Session,
    scan::{ChunkResponse, ChunkSource},
    server::AppState,
    spotify::{LibraryScanner, MAX_PAGE_SIZE},
};

#[derive(Debug, Deserialize)]
pub struct ChunkParams {
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
}

/// One window of the caller-driven library scan.
pub async fn genre_chunk(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<ChunkParams>,
) -> Result<Json<ChunkResponse>, AuthError> {
    let session = state
        .sessions
        .ensure_fresh_token(session, state.spotify.as_ref())
        .await?;

    let scanner = LibraryScanner::new(
        Arc::clone(&state.spotify),
        Arc::clone(&state.genres),
        session.access_token,
    );
    let limit = params.limit.unwrap_or(MAX_PAGE_SIZE as u64);
    Ok(Json(scanner.chunk(params.offset, limit).await?))
}
