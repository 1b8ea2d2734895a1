use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::StoreError,
    kv::{CachedKv, PutOptions},
    utils,
};

const ENTRY_PREFIX: &str = "entity_cache:";
const STATS_KEY: &str = "entity_cache_stats";

#[derive(Debug, Clone)]
pub struct GenreCacheConfig {
    /// Backing-store lifetime; genres of an artist rarely change.
    pub store_ttl: Duration,
    /// In-process lifetime layered over the façade's own cache.
    pub memory_ttl: Duration,
    /// How many artists the provider returns per lookup call.
    pub api_batch_size: u64,
    pub cleanup_page_size: usize,
}

impl Default for GenreCacheConfig {
    fn default() -> Self {
        Self {
            store_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            memory_ttl: Duration::from_secs(5 * 60),
            api_batch_size: 50,
            cleanup_page_size: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistGenreEntry {
    pub genres: Vec<String>,
    /// Unix milliseconds.
    pub cached_at: i64,
}

/// Cumulative usage, persisted through the same façade it describes and
/// therefore possibly served stale from an in-process cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenreCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Estimated provider calls avoided: hits over the provider batch size.
    pub api_calls_saved: u64,
    /// Unix milliseconds, 0 when never written.
    pub last_updated: i64,
}

impl GenreCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub pages: usize,
    pub scanned: usize,
    pub removed: usize,
}

/// Long-lived artist id → genre list cache.
pub struct ArtistGenreCache {
    kv: Arc<CachedKv>,
    config: GenreCacheConfig,
}

impl ArtistGenreCache {
    pub fn new(kv: Arc<CachedKv>, config: GenreCacheConfig) -> Self {
        Self { kv, config }
    }

    pub fn config(&self) -> &GenreCacheConfig {
        &self.config
    }

    pub async fn get(&self, artist_id: &str) -> Option<Vec<String>> {
        let genres = self.lookup(artist_id).await;
        let hit = u64::from(genres.is_some());
        self.record_usage(hit, 1 - hit).await;
        genres
    }

    /// One façade read per distinct id, issued concurrently. Callers with
    /// very large id sets should chunk them first.
    pub async fn get_batch(&self, artist_ids: &[String]) -> HashMap<String, Vec<String>> {
        let ids: Vec<&String> = {
            let mut seen = HashSet::new();
            artist_ids.iter().filter(|id| seen.insert(*id)).collect()
        };

        let found: HashMap<String, Vec<String>> =
            join_all(ids.iter().map(|id| async move { (*id, self.lookup(id).await) }))
                .await
                .into_iter()
                .filter_map(|(id, genres)| genres.map(|g| (id.clone(), g)))
                .collect();

        let hits = found.len() as u64;
        let misses = ids.len() as u64 - hits;
        debug!(hits, misses, "genre batch lookup");
        self.record_usage(hits, misses).await;
        found
    }

    pub async fn put(&self, artist_id: &str, genres: Vec<String>) -> Result<(), StoreError> {
        let entry = ArtistGenreEntry {
            genres,
            cached_at: utils::now_millis(),
        };
        self.kv
            .put(&entry_key(artist_id), &entry, self.put_options())
            .await
    }

    pub async fn put_batch(&self, entries: &HashMap<String, Vec<String>>) -> Result<(), StoreError> {
        let results = join_all(
            entries
                .iter()
                .map(|(id, genres)| self.put(id, genres.clone())),
        )
        .await;
        results.into_iter().collect()
    }

    pub async fn stats(&self) -> GenreCacheStats {
        self.kv.get(STATS_KEY).await.unwrap_or_default()
    }

    pub async fn invalidate(&self, artist_ids: &[String]) -> Result<usize, StoreError> {
        for id in artist_ids {
            self.kv.delete(&entry_key(id)).await?;
        }
        info!(count = artist_ids.len(), "genre cache entries invalidated");
        Ok(artist_ids.len())
    }

    /// Removes every entry and resets the statistics.
    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        // queued entries must reach the store so the listing below sees them
        self.kv.flush_all().await;

        let mut removed = 0;
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .kv
                .list(ENTRY_PREFIX, cursor.as_deref(), self.config.cleanup_page_size)
                .await?;
            for key in &page.keys {
                self.kv.delete(key).await?;
                removed += 1;
            }
            if !page.more_available {
                break;
            }
            cursor = page.cursor;
        }

        self.kv
            .put(STATS_KEY, &GenreCacheStats::default(), PutOptions::immediate())
            .await?;
        info!(removed, "genre cache cleared");
        Ok(removed)
    }

    /// Deletes entries cached more than `max_age_days` ago, following the
    /// listing cursor until the store reports no further pages.
    pub async fn cleanup(&self, max_age_days: u32) -> Result<CleanupReport, StoreError> {
        let cutoff = utils::now_millis() - utils::days_to_millis(max_age_days);
        let mut report = CleanupReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .kv
                .list(ENTRY_PREFIX, cursor.as_deref(), self.config.cleanup_page_size)
                .await?;
            report.pages += 1;

            for key in &page.keys {
                report.scanned += 1;
                // straight from the store: a sweep must not churn the shared LRU
                let Some(entry) = self.read_stored(key).await else {
                    continue;
                };
                if entry.cached_at < cutoff {
                    self.kv.delete(key).await?;
                    report.removed += 1;
                }
            }

            match page.cursor {
                Some(next) if page.more_available => cursor = Some(next),
                _ => break,
            }
        }

        info!(
            pages = report.pages,
            scanned = report.scanned,
            removed = report.removed,
            "genre cache cleanup finished"
        );
        Ok(report)
    }

    async fn read_stored(&self, key: &str) -> Option<ArtistGenreEntry> {
        match self.kv.store().get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw)
                .inspect_err(|e| warn!(key, error = %e, "corrupt genre entry skipped"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "genre entry unreadable, skipped");
                None
            }
        }
    }

    async fn lookup(&self, artist_id: &str) -> Option<Vec<String>> {
        self.kv
            .get_with_ttl::<ArtistGenreEntry>(&entry_key(artist_id), Some(self.config.memory_ttl))
            .await
            .map(|entry| entry.genres)
    }

    async fn record_usage(&self, hits: u64, misses: u64) {
        if hits == 0 && misses == 0 {
            return;
        }

        let mut stats = self.stats().await;
        stats.hits += hits;
        stats.misses += misses;
        stats.api_calls_saved = stats.hits / self.config.api_batch_size.max(1);
        stats.last_updated = utils::now_millis();

        if let Err(e) = self.kv.put(STATS_KEY, &stats, PutOptions::batched()).await {
            debug!(error = %e, "genre cache stats not recorded");
        }
    }

    fn put_options(&self) -> PutOptions {
        PutOptions::batched()
            .with_ttl(self.config.store_ttl)
            .with_cache_ttl(self.config.memory_ttl)
    }
}

fn entry_key(artist_id: &str) -> String {
    format!("{ENTRY_PREFIX}{artist_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv};

    fn genre_cache(store: Arc<MemoryKv>, page_size: usize) -> ArtistGenreCache {
        ArtistGenreCache::new(
            Arc::new(CachedKv::new(store)),
            GenreCacheConfig {
                cleanup_page_size: page_size,
                ..GenreCacheConfig::default()
            },
        )
    }

    fn genres(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    async fn seed(store: &MemoryKv, id: &str, cached_at: i64) {
        let entry = ArtistGenreEntry {
            genres: genres(&["rock"]),
            cached_at,
        };
        store
            .put(&entry_key(id), serde_json::to_string(&entry).unwrap(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_put_and_stats() {
        let cache = genre_cache(Arc::new(MemoryKv::new()), 100);

        assert!(cache.get("a1").await.is_none());
        cache.put("a1", genres(&["rock", "indie"])).await.unwrap();
        assert_eq!(cache.get("a1").await, Some(genres(&["rock", "indie"])));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_batch_returns_hits_only() {
        let cache = genre_cache(Arc::new(MemoryKv::new()), 100);
        let mut entries = HashMap::new();
        entries.insert("a1".to_string(), genres(&["rock"]));
        entries.insert("a2".to_string(), genres(&["pop"]));
        cache.put_batch(&entries).await.unwrap();

        let ids = vec!["a1".to_string(), "a2".to_string(), "a3".to_string(), "a1".to_string()];
        let found = cache.get_batch(&ids).await;

        assert_eq!(found.len(), 2);
        assert_eq!(found["a2"], genres(&["pop"]));
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[tokio::test]
    async fn test_api_calls_saved_follows_batch_size() {
        let cache = genre_cache(Arc::new(MemoryKv::new()), 100);
        let ids: Vec<String> = (0..120).map(|i| format!("a{i}")).collect();
        let entries: HashMap<String, Vec<String>> =
            ids.iter().map(|id| (id.clone(), genres(&["jazz"]))).collect();
        cache.put_batch(&entries).await.unwrap();

        cache.get_batch(&ids).await;
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 120);
        assert_eq!(stats.api_calls_saved, 2);
    }

    #[tokio::test]
    async fn test_cleanup_spans_pages_and_keeps_fresh_entries() {
        let store = Arc::new(MemoryKv::new());
        let now = utils::now_millis();
        let old = now - utils::days_to_millis(40);
        for id in ["a", "c", "e"] {
            seed(&store, id, old).await;
        }
        for id in ["b", "d", "f"] {
            seed(&store, id, now).await;
        }

        let cache = genre_cache(store.clone(), 2);
        let report = cache.cleanup(30).await.unwrap();

        assert_eq!(report.removed, 3);
        assert_eq!(report.scanned, 6);
        assert!(report.pages >= 3);
        for id in ["a", "c", "e"] {
            assert!(store.get(&entry_key(id)).await.unwrap().is_none());
        }
        for id in ["b", "d", "f"] {
            assert!(store.get(&entry_key(id)).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_all() {
        let store = Arc::new(MemoryKv::new());
        let cache = genre_cache(store.clone(), 2);
        for id in ["a", "b", "c"] {
            seed(&store, id, utils::now_millis()).await;
        }
        assert!(cache.get("a").await.is_some());

        cache.invalidate(&["a".to_string()]).await.unwrap();
        assert!(cache.get("a").await.is_none());

        let removed = cache.clear_all().await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("b").await.is_none());
        assert_eq!(cache.stats().await.hits, 0);
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_removes_queued_entries() {
        let store = Arc::new(MemoryKv::new());
        let cache = genre_cache(store.clone(), 100);

        cache.put("a1", genres(&["rock"])).await.unwrap();
        let removed = cache.clear_all().await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("a1").await.is_none());

        // past the batch delay nothing queued earlier may land
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.get(&entry_key("a1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_leaves_memory_cache_alone() {
        let store = Arc::new(MemoryKv::new());
        seed(&store, "b", utils::now_millis()).await;
        let kv = Arc::new(CachedKv::new(store.clone()));
        let cache = ArtistGenreCache::new(Arc::clone(&kv), GenreCacheConfig::default());

        let report = cache.cleanup(30).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, 0);

        let before = kv.metrics();
        let entry: Option<ArtistGenreEntry> = kv.get(&entry_key("b")).await;
        assert!(entry.is_some());
        let after = kv.metrics();
        assert_eq!(after.cache_hits, before.cache_hits);
        assert_eq!(after.cache_misses, before.cache_misses + 1);
    }
}
