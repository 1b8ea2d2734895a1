//! Synchronizer-token CSRF protection.
//!
//! The token is issued once with the session and never rotated. Only
//! mutating verbs are checked.

use axum::http::{HeaderMap, Method, header};
use serde_json::Value;

use super::Session;
use crate::{error::AuthError, utils};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FIELD: &str = "csrf_token";

pub fn issue_token() -> String {
    utils::generate_secure_token()
}

pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Checks `provided` against the session's token in constant time.
pub fn validate(session: &Session, provided: Option<&str>) -> Result<(), AuthError> {
    let provided = provided
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::CsrfMissing)?;

    if utils::constant_time_eq(provided, &session.csrf_token) {
        Ok(())
    } else {
        Err(AuthError::CsrfMismatch)
    }
}

pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Looks for the `csrf_token` field in a JSON or urlencoded form body.
pub fn token_from_body(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(body)
            .find(|(k, _)| k == CSRF_FIELD)
            .map(|(_, v)| v.into_owned())
    } else {
        serde_json::from_slice::<Value>(body)
            .ok()?
            .get(CSRF_FIELD)?
            .as_str()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::SESSION_SCHEMA_VERSION;
    use axum::http::HeaderValue;

    fn session(csrf_token: &str) -> Session {
        Session {
            schema_version: SESSION_SCHEMA_VERSION,
            id: "s".into(),
            user_id: "u".into(),
            display_name: None,
            avatar_url: None,
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_expires_at: 0,
            csrf_token: csrf_token.into(),
            created_at: 0,
            revision: 0,
        }
    }

    #[test]
    fn test_only_mutating_verbs_are_checked() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
        assert!(!is_mutating(&Method::OPTIONS));
    }

    #[test]
    fn test_validate() {
        let s = session("secret");
        assert!(validate(&s, Some("secret")).is_ok());
        assert!(matches!(validate(&s, Some("other")), Err(AuthError::CsrfMismatch)));
        assert!(matches!(validate(&s, Some("")), Err(AuthError::CsrfMissing)));
        assert!(matches!(validate(&s, None), Err(AuthError::CsrfMissing)));
    }

    #[test]
    fn test_token_from_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert_eq!(
            token_from_body(&headers, br#"{"csrf_token":"abc","ids":[]}"#).as_deref(),
            Some("abc")
        );
        assert!(token_from_body(&headers, b"not json").is_none());

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        assert_eq!(
            token_from_body(&headers, b"a=1&csrf_token=x%2By").as_deref(),
            Some("x+y")
        );
    }

    #[test]
    fn test_issued_tokens_are_unique() {
        assert_ne!(issue_token(), issue_token());
    }
}
