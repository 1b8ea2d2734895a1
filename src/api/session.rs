use axum::{Extension, Json, extract::State};
use serde::Serialize;

use crate::{management::Session, server::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// To be echoed in `x-csrf-token` on every mutating request.
    pub csrf_token: String,
    /// Unix milliseconds.
    pub expires_at: i64,
    pub is_admin: bool,
}

pub async fn session_info(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Json<SessionInfo> {
    let ttl = state.sessions.config().ttl.as_millis() as i64;
    Json(SessionInfo {
        is_admin: state.settings.is_admin(&session.user_id),
        expires_at: session.created_at + ttl,
        user_id: session.user_id,
        display_name: session.display_name,
        avatar_url: session.avatar_url,
        csrf_token: session.csrf_token,
    })
}
