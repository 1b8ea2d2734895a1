use std::{collections::BTreeMap, ops::Bound, time::Duration};

use async_trait::async_trait;
use tokio::{sync::RwLock, time::Instant};

use super::{KvStore, ListPage};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local backing store.
///
/// Ordered so that `list` can page with the last returned key as cursor.
/// Expired keys are hidden from reads and listings and dropped on the next
/// write to the same key.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, StoredValue>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|v| !v.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|stored| !stored.is_expired(now))
            .map(|stored| stored.value.clone()))
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let limit = limit.max(1);
        let now = Instant::now();
        let entries = self.entries.read().await;

        let start = match cursor {
            Some(c) if c >= prefix => Bound::Excluded(c.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let mut keys = Vec::new();
        let mut more_available = false;
        for (key, stored) in entries.range::<String, _>((start, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            if stored.is_expired(now) {
                continue;
            }
            if keys.len() == limit {
                more_available = true;
                break;
            }
            keys.push(key.clone());
        }

        let cursor = if more_available {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys,
            more_available,
            cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_pages_follow_cursor() {
        let kv = MemoryKv::new();
        for i in 0..5 {
            kv.put(&format!("a:{i}"), i.to_string(), None).await.unwrap();
        }
        kv.put("b:0", "x".into(), None).await.unwrap();

        let first = kv.list("a:", None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["a:0", "a:1"]);
        assert!(first.more_available);

        let second = kv.list("a:", first.cursor.as_deref(), 2).await.unwrap();
        assert_eq!(second.keys, vec!["a:2", "a:3"]);

        let third = kv.list("a:", second.cursor.as_deref(), 2).await.unwrap();
        assert_eq!(third.keys, vec!["a:4"]);
        assert!(!third.more_available);
        assert!(third.cursor.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_are_hidden() {
        let kv = MemoryKv::new();
        kv.put("k", "v".into(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(kv.get("k").await.unwrap().is_none());
        assert!(kv.list("", None, 10).await.unwrap().keys.is_empty());
    }
}
