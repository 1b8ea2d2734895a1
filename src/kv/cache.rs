use std::{collections::HashMap, time::Duration};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

/// Limits of the process-local cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            default_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    /// Monotonic access tick, smallest is least recently used.
    last_access: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Bounded TTL cache with LRU eviction.
///
/// Lives only as long as the process stays warm. Nothing read from here is
/// authoritative: every caller must be prepared for a miss.
#[derive(Debug)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let tick = state.next_tick();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.last_access = tick;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(key);
        }
        None
    }

    /// Inserts or replaces `key`; `ttl` falls back to the configured default.
    pub fn insert(&self, key: &str, value: Value, ttl: Option<Duration>) {
        if self.config.max_entries == 0 {
            return;
        }

        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(self.config.default_ttl);
        let mut state = self.state.lock();
        let tick = state.next_tick();

        if !state.entries.contains_key(key) && state.entries.len() >= self.config.max_entries {
            state.entries.retain(|_, entry| now < entry.expires_at);
            while state.entries.len() >= self.config.max_entries {
                let Some(oldest) = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                state.entries.remove(&oldest);
            }
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                last_access: tick,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.state.lock().entries.remove(key);
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(max_entries: usize) -> MemoryCache {
        MemoryCache::new(CacheConfig {
            max_entries,
            default_ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = cache(2);
        cache.insert("a", json!(1), None);
        cache.insert("b", json!(2), None);

        // touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get("a"), Some(json!(1)));
        cache.insert("c", json!(3), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[test]
    fn test_replacing_a_key_does_not_evict() {
        let cache = cache(2);
        cache.insert("a", json!(1), None);
        cache.insert("b", json!(2), None);
        cache.insert("a", json!(10), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(json!(10)));
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = cache(10);
        cache.insert("short", json!("x"), Some(Duration::from_secs(1)));
        cache.insert("long", json!("y"), None);

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(cache.get("short").is_none());
        assert_eq!(cache.get("long"), Some(json!("y")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_purged_before_lru() {
        let cache = cache(2);
        cache.insert("stale", json!(0), Some(Duration::from_secs(1)));
        cache.insert("fresh", json!(1), None);
        tokio::time::advance(Duration::from_secs(2)).await;

        cache.insert("new", json!(2), None);
        assert_eq!(cache.get("fresh"), Some(json!(1)));
        assert_eq!(cache.get("new"), Some(json!(2)));
    }
}
