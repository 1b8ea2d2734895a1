use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    error::AuthError,
    management::{NewSession, OAuthState},
    server::AppState,
    utils,
};

const PROVIDER: &str = "spotify";

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Starts a PKCE login: remembers the verifier under a fresh state token and
/// redirects to the provider.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AuthError> {
    let code_verifier = utils::generate_code_verifier();
    let code_challenge = utils::generate_code_challenge(&code_verifier);
    let token = utils::generate_secure_token();

    let jar = state
        .oauth_states
        .store_state(jar, &token, OAuthState::new(PROVIDER, Some(code_verifier)))
        .await?;
    let url = state.spotify.authorize_url(&token, &code_challenge)?;

    Ok((jar, Redirect::to(&url)))
}

/// Completes the login. The state cookie is cleared on every outcome.
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let token = params.state.as_deref().unwrap_or_default();
    let (jar, login) = state.oauth_states.verify_state(jar, token).await;

    let Some(login) = login else {
        warn!("login callback with unknown or used state");
        return (jar, AuthError::InvalidState).into_response();
    };

    if let Some(reason) = params.error {
        return (
            jar,
            AuthError::Forbidden {
                message: format!("authorization denied: {reason}"),
            },
        )
            .into_response();
    }

    let Some(code) = params.code else {
        return (jar, AuthError::InvalidState).into_response();
    };

    match complete_login(&state, jar.clone(), &code, login).await {
        Ok(jar) => (jar, Redirect::to("/")).into_response(),
        Err(e) => (jar, e).into_response(),
    }
}

async fn complete_login(
    state: &AppState,
    jar: CookieJar,
    code: &str,
    login: OAuthState,
) -> Result<CookieJar, AuthError> {
    let verifier = login.code_verifier.unwrap_or_default();
    let token = state.spotify.exchange_code(code, &verifier).await?;
    let profile = state.spotify.me(&token.access_token).await?;

    // registration is bookkeeping; a failed write must not block the login
    if let Err(e) = state.users.register(&profile).await {
        warn!(user_id = %profile.id, error = %e, "user registration not recorded");
    }

    let (jar, session) = state
        .sessions
        .create_session(
            jar,
            NewSession {
                user_id: profile.id.clone(),
                display_name: profile.display_name.clone(),
                avatar_url: profile.avatar_url(),
                access_token: token.access_token.clone(),
                refresh_token: token.refresh_token.clone(),
                token_expires_at: token.expires_at_millis(),
            },
        )
        .await?;

    info!(user_id = %session.user_id, "login completed");
    Ok(jar)
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), AuthError> {
    let jar = state.sessions.delete_session(jar).await?;
    Ok((jar, Json(json!({ "status": "logged_out" }))))
}
