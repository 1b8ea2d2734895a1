use std::{collections::HashMap, sync::Arc, time::Duration};

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{Engine, engine::general_purpose::STANDARD};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    kv::{CachedKv, PutOptions},
    utils,
};

pub const STATE_COOKIE: &str = "oauth_state";
pub const STATE_COOKIE_PATH: &str = "/auth";

const STATE_PREFIX: &str = "oauth_state:";
const CONSUMED_PREFIX: &str = "oauth_state_used:";
// tolerated clock difference for envelopes issued by another instance
const CLOCK_SKEW_MS: i64 = 60_000;

/// What a login attempt needs to remember until the provider redirects back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthState {
    pub provider: String,
    pub code_verifier: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl OAuthState {
    pub fn new(provider: impl Into<String>, code_verifier: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            code_verifier,
            created_at: utils::now_millis(),
        }
    }
}

/// Client-carried copy of a state record. Integrity rests on the token being
/// unguessable, the envelope itself is not signed.
#[derive(Debug, Serialize, Deserialize)]
struct StateEnvelope {
    token: String,
    state: OAuthState,
    issued_at: i64,
}

/// Single-use login state, written through to two tiers.
///
/// The durable tier is the KV store. The carried tier is a narrowly scoped
/// cookie that travels with the callback request itself and therefore never
/// lags behind replication. Verification tries the durable tier first and
/// falls back to the carried one; either way the token is consumed in both.
pub struct OAuthStateStore {
    kv: Arc<CachedKv>,
    ttl: Duration,
    secure_cookie: bool,
    verify_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OAuthStateStore {
    pub fn new(kv: Arc<CachedKv>, ttl: Duration, secure_cookie: bool) -> Self {
        Self {
            kv,
            ttl,
            secure_cookie,
            verify_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Persists `state` under `token` and attaches the fallback cookie.
    ///
    /// A failed store write is logged, not returned: the cookie alone can
    /// still complete the login.
    pub async fn store_state(
        &self,
        jar: CookieJar,
        token: &str,
        state: OAuthState,
    ) -> Result<CookieJar, StoreError> {
        if let Err(e) = self
            .kv
            .put(
                &state_key(token),
                &state,
                PutOptions::immediate().with_ttl(self.ttl),
            )
            .await
        {
            warn!(error = %e, "login state not persisted, relying on cookie");
        }

        let envelope = encode_envelope(&StateEnvelope {
            token: token.to_string(),
            state,
            issued_at: utils::now_millis(),
        })?;

        let cookie = Cookie::build((STATE_COOKIE, envelope))
            .path(STATE_COOKIE_PATH)
            .http_only(true)
            .secure(self.secure_cookie)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.ttl.as_secs() as i64))
            .build();

        Ok(jar.add(cookie))
    }

    /// Consumes `token`. Returns the state at most once per token; the
    /// returned jar always clears the fallback cookie.
    pub async fn verify_state(&self, jar: CookieJar, token: &str) -> (CookieJar, Option<OAuthState>) {
        let carried = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
        let jar = jar.remove(Cookie::build(STATE_COOKIE).path(STATE_COOKIE_PATH));

        if token.is_empty() {
            return (jar, None);
        }

        let lock = self.verify_lock(token);
        let state = {
            let _guard = lock.lock().await;
            self.verify_locked(token, carried).await
        };
        self.release_verify_lock(token, lock);
        (jar, state)
    }

    async fn verify_locked(&self, token: &str, carried: Option<String>) -> Option<OAuthState> {
        if self
            .kv
            .get_fresh::<bool>(&consumed_key(token))
            .await
            .is_some()
        {
            debug!("login state replayed");
            return None;
        }

        let state = match self.kv.get::<OAuthState>(&state_key(token)).await {
            Some(state) => Some(state),
            None => carried.and_then(|value| self.accept_envelope(&value, token)),
        };

        if state.is_some() {
            self.consume(token).await;
        }
        state
    }

    fn verify_lock(&self, token: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.verify_locks.lock();
        Arc::clone(locks.entry(token.to_string()).or_default())
    }

    fn release_verify_lock(&self, token: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.verify_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(token);
        }
    }

    fn accept_envelope(&self, value: &str, token: &str) -> Option<OAuthState> {
        let envelope = match decode_envelope(value) {
            Some(envelope) => envelope,
            None => {
                debug!("unreadable login state cookie");
                return None;
            }
        };

        if !utils::constant_time_eq(&envelope.token, token) {
            return None;
        }

        let now = utils::now_millis();
        let age = now - envelope.issued_at;
        if age > self.ttl.as_millis() as i64 || age < -CLOCK_SKEW_MS {
            debug!(age_ms = age, "login state cookie outside its window");
            return None;
        }

        debug!("login state recovered from cookie");
        Some(envelope.state)
    }

    async fn consume(&self, token: &str) {
        if let Err(e) = self.kv.delete(&state_key(token)).await {
            warn!(error = %e, "could not delete consumed login state");
        }
        // the marker outlives any copy of the state that is still replicating
        if let Err(e) = self
            .kv
            .put(
                &consumed_key(token),
                &true,
                PutOptions::immediate().with_ttl(self.ttl),
            )
            .await
        {
            warn!(error = %e, "could not mark login state consumed");
        }
    }
}

fn state_key(token: &str) -> String {
    format!("{STATE_PREFIX}{token}")
}

fn consumed_key(token: &str) -> String {
    format!("{CONSUMED_PREFIX}{token}")
}

fn encode_envelope(envelope: &StateEnvelope) -> Result<String, StoreError> {
    Ok(STANDARD.encode(serde_json::to_vec(envelope)?))
}

fn decode_envelope(value: &str) -> Option<StateEnvelope> {
    let bytes = STANDARD.decode(value).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv};

    fn state_store(store: Arc<MemoryKv>) -> OAuthStateStore {
        OAuthStateStore::new(
            Arc::new(CachedKv::new(store)),
            Duration::from_secs(600),
            true,
        )
    }

    fn pkce_state() -> OAuthState {
        OAuthState::new("spotify", Some("verifier".into()))
    }

    #[tokio::test]
    async fn test_state_verifies_exactly_once() {
        let store = state_store(Arc::new(MemoryKv::new()));
        let token = utils::generate_secure_token();
        let jar = store
            .store_state(CookieJar::new(), &token, pkce_state())
            .await
            .unwrap();

        let (cleared, first) = store.verify_state(jar.clone(), &token).await;
        assert_eq!(first.unwrap().code_verifier.as_deref(), Some("verifier"));
        assert!(cleared.get(STATE_COOKIE).is_none());

        // replaying the original cookie does not help either
        let (_, second) = store.verify_state(jar, &token).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_cookie_bridges_replication_lag() {
        // the login started on a node whose write the callback node cannot see yet
        let origin = state_store(Arc::new(MemoryKv::new()));
        let lagging = state_store(Arc::new(MemoryKv::new()));
        let token = utils::generate_secure_token();

        let issued = pkce_state();
        let jar = origin
            .store_state(CookieJar::new(), &token, issued.clone())
            .await
            .unwrap();

        let (_, state) = lagging.verify_state(jar.clone(), &token).await;
        assert_eq!(state, Some(issued));

        let (_, again) = lagging.verify_state(jar, &token).await;
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_cookie_for_another_token_is_rejected() {
        let origin = state_store(Arc::new(MemoryKv::new()));
        let lagging = state_store(Arc::new(MemoryKv::new()));

        let jar = origin
            .store_state(CookieJar::new(), "token-a", pkce_state())
            .await
            .unwrap();

        let (_, state) = lagging.verify_state(jar, "token-b").await;
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_expired_envelope_is_rejected() {
        let store = state_store(Arc::new(MemoryKv::new()));
        let envelope = encode_envelope(&StateEnvelope {
            token: "t".into(),
            state: pkce_state(),
            issued_at: utils::now_millis() - 11 * 60 * 1000,
        })
        .unwrap();
        let jar = CookieJar::new().add(Cookie::new(STATE_COOKIE, envelope));

        let (_, state) = store.verify_state(jar, "t").await;
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_primary_is_deleted_on_consume() {
        let kv = Arc::new(MemoryKv::new());
        let store = state_store(kv.clone());
        store
            .store_state(CookieJar::new(), "t", pkce_state())
            .await
            .unwrap();
        assert!(kv.get("oauth_state:t").await.unwrap().is_some());

        let (_, state) = store.verify_state(CookieJar::new(), "t").await;
        assert!(state.is_some());
        assert!(kv.get("oauth_state:t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_callbacks_verify_once() {
        let store = state_store(Arc::new(MemoryKv::new()));
        let token = utils::generate_secure_token();
        let jar = store
            .store_state(CookieJar::new(), &token, pkce_state())
            .await
            .unwrap();

        let results = futures_util::future::join_all(
            (0..8).map(|_| store.verify_state(jar.clone(), &token)),
        )
        .await;

        let verified = results.iter().filter(|(_, state)| state.is_some()).count();
        assert_eq!(verified, 1);
        assert!(store.verify_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_token_never_verifies() {
        let store = state_store(Arc::new(MemoryKv::new()));
        let (_, state) = store.verify_state(CookieJar::new(), "").await;
        assert!(state.is_none());
    }
}
