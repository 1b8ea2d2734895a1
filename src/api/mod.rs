//! # API Module
//!
//! HTTP handlers and guards of the genresort web server.
//!
//! ## Endpoints
//!
//! | Route | Guard |
//! |---|---|
//! | `GET /health` | none |
//! | `GET /auth/login`, `GET /auth/callback` | login state |
//! | `POST /auth/logout` | session + CSRF |
//! | `GET /api/session` | session |
//! | `GET /api/genres/chunk` | session |
//! | `GET /api/cache/stats` | optional session |
//! | `POST /api/admin/cache/{invalidate,cleanup,clear}` | session + CSRF + admin |
//!
//! ## Guards
//!
//! Guards are plain `axum::middleware::from_fn` functions layered per route
//! group in [`crate::server::build_router`]. [`require_session`] puts the
//! [`crate::management::Session`] into request extensions, [`require_csrf`]
//! reads it from there, so the session layer must be the outer one.
//!
//! Rejections are [`crate::error::AuthError`] values and render as
//! `{"error": <reason_code>, "message": ...}`.

mod auth;
mod cache;
mod genres;
mod health;
mod middleware;
mod session;

pub use auth::{CallbackParams, callback, login, logout};
pub use cache::{
    CacheStatsResponse, CleanupRequest, InvalidateRequest, cache_stats, cleanup_cache,
    clear_cache, invalidate_cache,
};
pub use genres::{ChunkParams, genre_chunk};
pub use health::health;
pub use middleware::{optional_csrf, optional_session, require_admin, require_csrf, require_session};
pub use session::{SessionInfo, session_info};
