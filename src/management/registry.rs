use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::StoreError,
    kv::{CachedKv, PutOptions},
    types::UserProfile,
    utils,
};

const USER_PREFIX: &str = "user:";
const USER_COUNT_KEY: &str = "stats:user_count";
const FIRST_USERS_PREFIX: &str = "first_users:";

pub const FIRST_USERS_LIMIT: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Position in registration order, starting at 1.
    pub ordinal: u64,
    /// Unix milliseconds.
    pub registered_at: i64,
    pub last_login_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    New(UserRecord),
    Returning(UserRecord),
}

impl Registration {
    pub fn record(&self) -> &UserRecord {
        match self {
            Registration::New(r) | Registration::Returning(r) => r,
        }
    }
}

/// Every user who ever logged in, a running total, and the first
/// [`FIRST_USERS_LIMIT`] of them by ordinal.
///
/// The counter is a plain read-modify-write; two first logins racing on
/// different instances can be assigned the same ordinal.
pub struct UserRegistry {
    kv: Arc<CachedKv>,
}

impl UserRegistry {
    pub fn new(kv: Arc<CachedKv>) -> Self {
        Self { kv }
    }

    pub async fn register(&self, profile: &UserProfile) -> Result<Registration, StoreError> {
        let now = utils::now_millis();
        let key = user_key(&profile.id);

        if let Some(mut existing) = self.kv.get_fresh::<UserRecord>(&key).await {
            existing.display_name = profile.display_name.clone();
            existing.avatar_url = profile.avatar_url();
            existing.last_login_at = now;
            self.kv.put(&key, &existing, PutOptions::immediate()).await?;
            return Ok(Registration::Returning(existing));
        }

        let ordinal = self.user_count().await + 1;
        let record = UserRecord {
            id: profile.id.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url(),
            ordinal,
            registered_at: now,
            last_login_at: now,
        };

        self.kv.put(&key, &record, PutOptions::immediate()).await?;
        self.kv
            .put(USER_COUNT_KEY, &ordinal, PutOptions::immediate())
            .await?;
        if ordinal <= FIRST_USERS_LIMIT {
            self.kv
                .put(
                    &format!("{FIRST_USERS_PREFIX}{ordinal}"),
                    &record.id,
                    PutOptions::immediate(),
                )
                .await?;
        }

        info!(user_id = %record.id, ordinal, "new user registered");
        Ok(Registration::New(record))
    }

    pub async fn user(&self, user_id: &str) -> Option<UserRecord> {
        self.kv.get(&user_key(user_id)).await
    }

    pub async fn user_count(&self) -> u64 {
        self.kv.get_fresh(USER_COUNT_KEY).await.unwrap_or(0)
    }

    /// User ids in registration order.
    pub async fn first_users(&self) -> Vec<String> {
        let count = self.user_count().await.min(FIRST_USERS_LIMIT);
        let mut ids = Vec::with_capacity(count as usize);
        for ordinal in 1..=count {
            if let Some(id) = self
                .kv
                .get::<String>(&format!("{FIRST_USERS_PREFIX}{ordinal}"))
                .await
            {
                ids.push(id);
            }
        }
        ids
    }
}

fn user_key(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}
