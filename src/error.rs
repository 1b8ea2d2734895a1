//! Error types shared across the substrate.
//!
//! Cache misses and corrupt records are not errors: they surface as `None`
//! and a `tracing` warning. Only the security boundaries (authentication,
//! CSRF, login state) reach the route layer as structured rejections.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Failure talking to the backing key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
        }
    }
}

/// Failure of a call to something outside this process.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("unexpected response: {message}")]
    InvalidResponse { message: String },
}

impl UpstreamError {
    pub fn invalid_response(message: impl Into<String>) -> Self {
        UpstreamError::InvalidResponse {
            message: message.into(),
        }
    }
}

/// Rejections surfaced to the route layer.
///
/// Every variant maps to a stable machine-readable reason code so the
/// browser can tell "log in again" apart from "resubmit with a fresh token".
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No session, expired session or unreadable session record.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Mutating request carried no CSRF token.
    #[error("CSRF token missing")]
    CsrfMissing,

    /// Mutating request carried a CSRF token that does not match the session.
    #[error("CSRF token mismatch")]
    CsrfMismatch,

    /// OAuth login state unknown, expired or already consumed.
    #[error("invalid or expired login state")]
    InvalidState,

    /// Authenticated but not allowed to perform the operation.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("upstream failure: {0}")]
    Upstream(#[from] UpstreamError),
}

impl AuthError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::NotAuthenticated => "not_authenticated",
            AuthError::CsrfMissing => "csrf_missing",
            AuthError::CsrfMismatch => "csrf_mismatch",
            AuthError::InvalidState => "invalid_state",
            AuthError::Forbidden { .. } => "forbidden",
            AuthError::Upstream(_) => "upstream_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AuthError::CsrfMissing | AuthError::CsrfMismatch | AuthError::Forbidden { .. } => {
                StatusCode::FORBIDDEN
            }
            AuthError::InvalidState => StatusCode::BAD_REQUEST,
            AuthError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Upstream(UpstreamError::Store(err))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        // upstream details stay in the log
        let message = match &self {
            AuthError::Upstream(err) => {
                tracing::error!(error = %err, "upstream failure on guarded route");
                "upstream service unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "error": self.reason_code(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

/// Invalid or missing runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_distinguish_login_from_resubmit() {
        assert_eq!(AuthError::NotAuthenticated.reason_code(), "not_authenticated");
        assert_eq!(AuthError::CsrfMismatch.reason_code(), "csrf_mismatch");
        assert_eq!(AuthError::NotAuthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::CsrfMissing.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn store_errors_become_upstream_rejections() {
        let err: AuthError = StoreError::backend("down").into();
        assert_eq!(err.reason_code(), "upstream_error");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
