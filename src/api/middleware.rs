use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::{
    error::AuthError,
    management::{Session, csrf},
    server::AppState,
};

/// Bodies are buffered only to look for a CSRF field; admin payloads are small.
const MAX_CSRF_BODY: usize = 64 * 1024;

/// Rejects the request unless its cookie names a live session, which is then
/// available to handlers as `Extension<Session>`.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let session = state
        .sessions
        .get_session(&jar)
        .await
        .ok_or(AuthError::NotAuthenticated)?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Like [`require_session`] but never rejects; handlers read
/// `Extension<Option<Session>>`.
pub async fn optional_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session = state.sessions.get_session(&jar).await;
    if let Some(session) = &session {
        request.extensions_mut().insert(session.clone());
    }
    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Validates the synchronizer token on mutating verbs. Must run inside
/// [`require_session`].
pub async fn require_csrf(request: Request, next: Next) -> Result<Response, AuthError> {
    if !csrf::is_mutating(request.method()) {
        return Ok(next.run(request).await);
    }

    let session = request
        .extensions()
        .get::<Session>()
        .cloned()
        .ok_or(AuthError::NotAuthenticated)?;

    let request = check_csrf(request, &session).await?;
    Ok(next.run(request).await)
}

/// Validates the token only when a session is present.
pub async fn optional_csrf(request: Request, next: Next) -> Result<Response, AuthError> {
    let session = request.extensions().get::<Session>().cloned();
    match session {
        Some(session) if csrf::is_mutating(request.method()) => {
            let request = check_csrf(request, &session).await?;
            Ok(next.run(request).await)
        }
        _ => Ok(next.run(request).await),
    }
}

/// Only users listed in `ADMIN_USER_IDS` pass.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user_id = request
        .extensions()
        .get::<Session>()
        .map(|s| s.user_id.clone())
        .ok_or(AuthError::NotAuthenticated)?;

    if !state.settings.is_admin(&user_id) {
        debug!(%user_id, "admin route refused");
        return Err(AuthError::Forbidden {
            message: "admin only".into(),
        });
    }
    Ok(next.run(request).await)
}

/// Header first; otherwise the body is buffered, searched and put back.
async fn check_csrf(request: Request, session: &Session) -> Result<Request, AuthError> {
    if let Some(token) = csrf::token_from_headers(request.headers()) {
        csrf::validate(session, Some(&token))?;
        return Ok(request);
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_CSRF_BODY)
        .await
        .map_err(|_| AuthError::CsrfMissing)?;
    let token = csrf::token_from_body(&parts.headers, &bytes);
    csrf::validate(session, token.as_deref())?;

    Ok(Request::from_parts(parts, Body::from(bytes)))
}
