use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::csrf;
use crate::{
    error::{AuthError, StoreError, UpstreamError},
    kv::{CachedKv, PutOptions},
    types::Token,
    utils,
};

pub const SESSION_COOKIE: &str = "session_id";
pub const SESSION_SCHEMA_VERSION: u32 = 1;

const SESSION_PREFIX: &str = "session:";
const REFRESH_LOCK_PREFIX: &str = "refresh_lock:";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed lifetime counted from creation, never extended.
    pub ttl: Duration,
    /// Access tokens expiring within this window are refreshed first.
    pub refresh_buffer: Duration,
    /// Lifetime of the cross-instance refresh marker.
    pub refresh_lock_ttl: Duration,
    pub refresh_poll_interval: Duration,
    pub refresh_poll_attempts: u32,
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            refresh_buffer: Duration::from_secs(5 * 60),
            refresh_lock_ttl: Duration::from_secs(30),
            refresh_poll_interval: Duration::from_millis(250),
            refresh_poll_attempts: 8,
            secure_cookie: true,
        }
    }
}

/// Server-side record of an authenticated browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub schema_version: u32,
    pub id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix milliseconds.
    pub token_expires_at: i64,
    /// Issued once at creation and never rotated.
    pub csrf_token: String,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Bumped on every rewrite. Informational only: updates are last-writer-wins.
    #[serde(default)]
    pub revision: u64,
}

/// Fields supplied at login.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: i64,
}

/// Shallow patch; `Some` replaces the stored field.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
}

impl SessionUpdate {
    pub fn from_token(token: &Token) -> Self {
        Self {
            access_token: Some(token.access_token.clone()),
            // providers may omit the refresh token when they do not rotate it
            refresh_token: Some(token.refresh_token.clone()).filter(|t| !t.is_empty()),
            token_expires_at: Some(token.expires_at_millis()),
            ..Self::default()
        }
    }

    fn apply(self, session: &mut Session) {
        if let Some(v) = self.display_name {
            session.display_name = Some(v);
        }
        if let Some(v) = self.avatar_url {
            session.avatar_url = Some(v);
        }
        if let Some(v) = self.access_token {
            session.access_token = v;
        }
        if let Some(v) = self.refresh_token {
            session.refresh_token = v;
        }
        if let Some(v) = self.token_expires_at {
            session.token_expires_at = v;
        }
    }
}

/// Exchanges a refresh token for a new token pair.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Token, UpstreamError>;
}

/// Session lifecycle on top of the KV façade.
///
/// All session writes are immediate. Updates are whole-record rewrites with
/// no version check, so concurrent writers to one session race and the last
/// write the store sees wins.
pub struct SessionManager {
    kv: Arc<CachedKv>,
    config: SessionConfig,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(kv: Arc<CachedKv>, config: SessionConfig) -> Self {
        Self {
            kv,
            config,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Writes a new session and attaches its identifier cookie to `jar`.
    pub async fn create_session(
        &self,
        jar: CookieJar,
        fields: NewSession,
    ) -> Result<(CookieJar, Session), StoreError> {
        let session = Session {
            schema_version: SESSION_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            user_id: fields.user_id,
            display_name: fields.display_name,
            avatar_url: fields.avatar_url,
            access_token: fields.access_token,
            refresh_token: fields.refresh_token,
            token_expires_at: fields.token_expires_at,
            csrf_token: csrf::issue_token(),
            created_at: utils::now_millis(),
            revision: 0,
        };

        self.kv
            .put(
                &session_key(&session.id),
                &session,
                PutOptions::immediate().with_ttl(self.config.ttl),
            )
            .await?;

        info!(user_id = %session.user_id, "session created");
        let jar = jar.add(self.session_cookie(&session.id));
        Ok((jar, session))
    }

    /// Resolves the session named by the request's cookie.
    pub async fn get_session(&self, jar: &CookieJar) -> Option<Session> {
        let id = jar.get(SESSION_COOKIE)?.value().to_string();
        self.load(&id).await
    }

    /// Loads a session by id. Missing, expired, corrupt and future-schema
    /// records all come back as `None`.
    pub async fn load(&self, id: &str) -> Option<Session> {
        if id.is_empty() {
            return None;
        }

        let session: Session = self.kv.get(&session_key(id)).await?;
        if session.schema_version > SESSION_SCHEMA_VERSION {
            warn!(
                schema_version = session.schema_version,
                "session written by a newer schema, ignoring"
            );
            return None;
        }
        if session.id != id || self.remaining_ttl(&session).is_none() {
            return None;
        }
        Some(session)
    }

    pub async fn update_session(
        &self,
        jar: &CookieJar,
        patch: SessionUpdate,
    ) -> Result<Option<Session>, StoreError> {
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(None);
        };
        self.update_by_id(cookie.value(), patch).await
    }

    /// Read, merge, rewrite. The record keeps its original expiry.
    pub async fn update_by_id(
        &self,
        id: &str,
        patch: SessionUpdate,
    ) -> Result<Option<Session>, StoreError> {
        let Some(mut session) = self.load(id).await else {
            return Ok(None);
        };
        let Some(remaining) = self.remaining_ttl(&session) else {
            return Ok(None);
        };

        patch.apply(&mut session);
        session.revision += 1;

        self.kv
            .put(
                &session_key(id),
                &session,
                PutOptions::immediate().with_ttl(remaining),
            )
            .await?;
        Ok(Some(session))
    }

    /// Deletes the record and expires the cookie.
    pub async fn delete_session(&self, jar: CookieJar) -> Result<CookieJar, StoreError> {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            self.kv.delete(&session_key(cookie.value())).await?;
            debug!("session deleted");
        }
        Ok(jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
    }

    pub fn needs_refresh(&self, session: &Session) -> bool {
        let threshold = utils::now_millis() + self.config.refresh_buffer.as_millis() as i64;
        session.token_expires_at <= threshold
    }

    /// Returns a session whose access token is good for at least the
    /// refresh buffer, refreshing it through `refresher` if needed.
    ///
    /// Refreshes are single-flight per session: within this process through
    /// an async lock, across processes through a short-lived marker key. A
    /// caller that finds the marker waits for the holder's result instead of
    /// refreshing again, and refreshes itself only if none shows up.
    pub async fn ensure_fresh_token(
        &self,
        session: Session,
        refresher: &dyn TokenRefresher,
    ) -> Result<Session, AuthError> {
        if !self.needs_refresh(&session) {
            return Ok(session);
        }

        let lock = self.refresh_lock(&session.id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(&session.id, refresher).await
        };
        self.release_refresh_lock(&session.id, lock);
        result
    }

    async fn refresh_locked(
        &self,
        id: &str,
        refresher: &dyn TokenRefresher,
    ) -> Result<Session, AuthError> {
        let current = self.load(id).await.ok_or(AuthError::NotAuthenticated)?;
        if !self.needs_refresh(&current) {
            return Ok(current);
        }

        let marker = format!("{REFRESH_LOCK_PREFIX}{id}");
        if self.kv.get_fresh::<String>(&marker).await.is_some() {
            debug!("refresh in flight elsewhere, waiting");
            if let Some(refreshed) = self.wait_for_refresh(id).await {
                return Ok(refreshed);
            }
        }

        let owner = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self
            .kv
            .put(
                &marker,
                &owner,
                PutOptions::immediate().with_ttl(self.config.refresh_lock_ttl),
            )
            .await
        {
            warn!(error = %e, "could not place refresh marker");
        }

        let refreshed = refresher.refresh(&current.refresh_token).await;
        if let Err(e) = self.kv.delete(&marker).await {
            warn!(error = %e, "could not clear refresh marker");
        }
        let token = refreshed?;

        self.update_by_id(id, SessionUpdate::from_token(&token))
            .await?
            .ok_or(AuthError::NotAuthenticated)
    }

    async fn wait_for_refresh(&self, id: &str) -> Option<Session> {
        let key = session_key(id);
        for _ in 0..self.config.refresh_poll_attempts {
            tokio::time::sleep(self.config.refresh_poll_interval).await;
            self.kv.forget(&key);
            let session = self.load(id).await?;
            if !self.needs_refresh(&session) {
                return Some(session);
            }
        }
        None
    }

    fn refresh_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn release_refresh_lock(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.refresh_locks.lock();
        // one reference in the map, one here: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
    }

    fn remaining_ttl(&self, session: &Session) -> Option<Duration> {
        let expires_at = session.created_at + self.config.ttl.as_millis() as i64;
        let remaining = expires_at - utils::now_millis();
        (remaining > 0).then(|| Duration::from_millis(remaining as u64))
    }

    fn session_cookie(&self, id: &str) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, id.to_string()))
            .path("/")
            .http_only(true)
            .secure(self.config.secure_cookie)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.config.ttl.as_secs() as i64))
            .build()
    }
}

fn session_key(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}
