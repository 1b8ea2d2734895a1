use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    BatchConfig, CacheConfig, KvMetrics, KvMetricsSnapshot, KvStore, ListPage, MemoryCache,
    WriteBatcher,
};
use crate::error::StoreError;

/// Durability class and lifetimes of a single `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Backing-store TTL. `None` stores without expiry.
    pub ttl: Option<Duration>,
    /// Write through synchronously instead of queueing.
    pub immediate: bool,
    /// In-process TTL, capped by `ttl`. Defaults to the cache default.
    pub cache_ttl: Option<Duration>,
}

impl PutOptions {
    /// Security-critical write: goes straight to the backing store.
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    /// Cost-sensitive write: may be lost if the process dies before flush.
    pub fn batched() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// The KV façade every handler goes through.
///
/// Combines the process-local [`MemoryCache`], the [`WriteBatcher`] and the
/// backing store. Construct one per process and share it behind an `Arc`.
pub struct CachedKv {
    store: Arc<dyn KvStore>,
    cache: MemoryCache,
    batcher: Arc<WriteBatcher>,
    metrics: Arc<KvMetrics>,
}

impl CachedKv {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_config(store, CacheConfig::default(), BatchConfig::default())
    }

    pub fn with_config(store: Arc<dyn KvStore>, cache: CacheConfig, batch: BatchConfig) -> Self {
        let metrics = Arc::new(KvMetrics::default());
        let batcher = Arc::new(WriteBatcher::new(
            Arc::clone(&store),
            Arc::clone(&metrics),
            batch,
        ));
        Self {
            store,
            cache: MemoryCache::new(cache),
            batcher,
            metrics,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_ttl(key, None).await
    }

    /// Read-through lookup. Store failures and unparseable records both come
    /// back as `None`; a miss is a valid outcome, never an error.
    pub async fn get_with_ttl<T: DeserializeOwned>(
        &self,
        key: &str,
        cache_ttl: Option<Duration>,
    ) -> Option<T> {
        if let Some(cached) = self.cache.get(key) {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => {
                    self.metrics.record_hit();
                    return Some(value);
                }
                Err(e) => {
                    debug!(key, error = %e, "cached value has unexpected shape");
                    self.cache.remove(key);
                }
            }
        }

        self.metrics.record_miss();
        self.metrics.record_read();

        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "store read failed, treating as miss");
                return None;
            }
        };

        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(key, error = %e, "corrupt record, treating as miss");
                return None;
            }
        };

        match serde_json::from_value::<T>(parsed.clone()) {
            Ok(value) => {
                self.cache.insert(key, parsed, cache_ttl);
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "record does not match expected type, treating as miss");
                None
            }
        }
    }

    /// Like [`get`](Self::get) but skips this process's cache, for reads
    /// whose answer may have been changed by another instance.
    pub async fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.remove(key);
        self.get(key).await
    }

    /// Writes `value`, updating the in-process cache first.
    ///
    /// Only immediate writes can fail; batched writes are accepted
    /// optimistically and any later failure is logged by the batcher.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        opts: PutOptions,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        let raw = serde_json::to_string(&value)?;

        let mut cache_ttl = opts.cache_ttl.unwrap_or(self.cache.default_ttl());
        if let Some(ttl) = opts.ttl {
            cache_ttl = cache_ttl.min(ttl);
        }
        self.cache.insert(key, value, Some(cache_ttl));

        if opts.immediate {
            self.batcher.discard(key);
            if let Err(e) = self.store.put(key, raw, opts.ttl).await {
                self.cache.remove(key);
                return Err(e);
            }
            self.metrics.record_write();
        } else {
            self.batcher.enqueue(key.to_string(), raw, opts.ttl).await;
        }

        Ok(())
    }

    /// Always immediate; deletions are never batched.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.cache.remove(key);
        self.batcher.discard(key);
        self.store.delete(key).await?;
        self.metrics.record_delete();
        Ok(())
    }

    /// Straight pass-through to the store's paginated listing.
    pub async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        self.metrics.record_read();
        self.store.list(prefix, cursor, limit).await
    }

    /// Drops `key` from this process's cache so the next read hits the store.
    pub fn forget(&self, key: &str) {
        self.cache.remove(key);
    }

    pub fn clear_local(&self) {
        self.cache.clear();
    }

    pub fn pending_writes(&self) -> usize {
        self.batcher.pending()
    }

    pub async fn flush(&self) -> usize {
        self.batcher.flush().await
    }

    pub async fn flush_all(&self) -> usize {
        self.batcher.flush_all().await
    }

    pub fn metrics(&self) -> KvMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryKv, testing::FlakyKv};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        plays: u32,
    }

    fn profile() -> Profile {
        Profile {
            name: "ada".into(),
            plays: 7,
        }
    }

    #[tokio::test]
    async fn test_immediate_put_round_trips() {
        let store = Arc::new(MemoryKv::new());
        let kv = CachedKv::new(store.clone());

        kv.put("p", &profile(), PutOptions::immediate()).await.unwrap();
        assert!(store.get("p").await.unwrap().is_some());
        assert_eq!(kv.get::<Profile>("p").await, Some(profile()));

        // a cold instance over the same store sees the same value
        let cold = CachedKv::new(store);
        assert_eq!(cold.get::<Profile>("p").await, Some(profile()));
    }

    #[tokio::test]
    async fn test_hits_and_misses_are_counted() {
        let kv = CachedKv::new(Arc::new(MemoryKv::new()));
        kv.put("p", &profile(), PutOptions::immediate()).await.unwrap();

        assert!(kv.get::<Profile>("p").await.is_some());
        assert!(kv.get::<Profile>("missing").await.is_none());

        let metrics = kv.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.reads, 1);
        assert_eq!(metrics.writes, 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_miss() {
        let store = Arc::new(MemoryKv::new());
        store.put("p", "{not json".into(), None).await.unwrap();
        store.put("q", "{\"other\":true}".into(), None).await.unwrap();
        let kv = CachedKv::new(store);

        assert!(kv.get::<Profile>("p").await.is_none());
        assert!(kv.get::<Profile>("q").await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_on_read_is_a_miss() {
        let store = Arc::new(FlakyKv::failing_reads(Arc::new(MemoryKv::new())));
        let kv = CachedKv::new(store);
        assert!(kv.get::<Profile>("p").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_immediate_put_is_not_cached() {
        let store = Arc::new(FlakyKv::failing_puts(Arc::new(MemoryKv::new()), "p"));
        let kv = CachedKv::new(store);

        assert!(kv.put("p", &profile(), PutOptions::immediate()).await.is_err());
        assert!(kv.get::<Profile>("p").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_put_is_visible_locally_before_flush() {
        let store = Arc::new(MemoryKv::new());
        let kv = CachedKv::new(store.clone());

        kv.put("p", &profile(), PutOptions::batched()).await.unwrap();
        assert_eq!(kv.get::<Profile>("p").await, Some(profile()));
        assert!(store.get("p").await.unwrap().is_none());
        assert_eq!(kv.pending_writes(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get("p").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_is_immediate() {
        let store = Arc::new(MemoryKv::new());
        let kv = CachedKv::new(store.clone());
        kv.put("p", &profile(), PutOptions::immediate()).await.unwrap();

        kv.delete("p").await.unwrap();
        assert!(store.get("p").await.unwrap().is_none());
        assert!(kv.get::<Profile>("p").await.is_none());
        assert_eq!(kv.metrics().deletes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_discards_queued_write() {
        let store = Arc::new(MemoryKv::new());
        let kv = CachedKv::new(store.clone());

        kv.put("p", &profile(), PutOptions::batched()).await.unwrap();
        kv.delete("p").await.unwrap();
        assert_eq!(kv.pending_writes(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get("p").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_is_capped_by_store_ttl() {
        let store = Arc::new(MemoryKv::new());
        let kv = CachedKv::new(store);
        kv.put(
            "p",
            &profile(),
            PutOptions::immediate().with_ttl(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(kv.get::<Profile>("p").await.is_none());
    }
}
