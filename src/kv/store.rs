use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// `true` when the store has more keys under the prefix after this page.
    pub more_available: bool,
    /// Opaque continuation token, present whenever `more_available` is set.
    pub cursor: Option<String>,
}

/// The remote, eventually consistent key-value system of record.
///
/// Implementations give no cross-node consistency: a `put` may not be
/// visible to a `get` served by another node for some time. TTLs are whole
/// seconds on real backends; `Duration` is kept here so tests can use
/// sub-second values against the in-memory store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the raw stored value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>)
    -> Result<(), StoreError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists keys under `prefix` in lexicographic order, starting after
    /// `cursor` when one is given.
    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError>;
}
