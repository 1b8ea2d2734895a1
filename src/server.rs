use std::{net::SocketAddr, str::FromStr, sync::Arc};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tracing::info;

use crate::{
    Res, api,
    config::{KvBackend, Settings},
    kv::{CachedKv, FileKv, KvStore, MemoryKv},
    management::{ArtistGenreCache, OAuthStateStore, SessionManager, UserRegistry},
    spotify::SpotifyClient,
};

/// Services shared by every request. Built once per process.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub kv: Arc<CachedKv>,
    pub sessions: Arc<SessionManager>,
    pub oauth_states: Arc<OAuthStateStore>,
    pub genres: Arc<ArtistGenreCache>,
    pub users: Arc<UserRegistry>,
    pub spotify: Arc<SpotifyClient>,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn KvStore>) -> Self {
        let kv = Arc::new(CachedKv::with_config(
            store,
            settings.cache.clone(),
            settings.batch.clone(),
        ));

        Self {
            sessions: Arc::new(SessionManager::new(
                Arc::clone(&kv),
                settings.session.clone(),
            )),
            oauth_states: Arc::new(OAuthStateStore::new(
                Arc::clone(&kv),
                settings.oauth_state_ttl,
                settings.cookies.secure,
            )),
            genres: Arc::new(ArtistGenreCache::new(
                Arc::clone(&kv),
                settings.genre_cache.clone(),
            )),
            users: Arc::new(UserRegistry::new(Arc::clone(&kv))),
            spotify: Arc::new(SpotifyClient::new(settings.spotify.clone())),
            settings: Arc::new(settings),
            kv,
        }
    }
}

/// Opens the backing store selected in `settings`.
pub fn open_store(settings: &Settings) -> Arc<dyn KvStore> {
    match &settings.kv_backend {
        KvBackend::File(root) => Arc::new(FileKv::new(root.clone())),
        KvBackend::Memory => Arc::new(MemoryKv::new()),
    }
}

pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/cache/invalidate", post(api::invalidate_cache))
        .route("/api/admin/cache/cleanup", post(api::cleanup_cache))
        .route("/api/admin/cache/clear", post(api::clear_cache))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_admin,
        ))
        .layer(middleware::from_fn(api::require_csrf))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_session,
        ));

    let protected = Router::new()
        .route("/auth/logout", post(api::logout))
        .route("/api/session", get(api::session_info))
        .route("/api/genres/chunk", get(api::genre_chunk))
        .layer(middleware::from_fn(api::require_csrf))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_session,
        ));

    let optional = Router::new()
        .route("/api/cache/stats", get(api::cache_stats))
        .layer(middleware::from_fn(api::optional_csrf))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::optional_session,
        ));

    let public = Router::new()
        .route("/health", get(api::health))
        .route("/auth/login", get(api::login))
        .route("/auth/callback", get(api::callback));

    Router::new()
        .merge(admin)
        .merge(protected)
        .merge(optional)
        .merge(public)
        .with_state(state)
}

/// Serves until ctrl-c, then drains queued writes.
pub async fn start_server(state: AppState) -> Res<()> {
    let addr = SocketAddr::from_str(&state.settings.server_address)?;
    let kv = Arc::clone(&state.kv);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let flushed = kv.flush_all().await;
    info!(flushed, "pending writes flushed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for shutdown signal");
    }
}
