use std::{io::ErrorKind, path::PathBuf, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::{KvStore, ListPage};
use crate::error::StoreError;

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    value: String,
    /// Unix milliseconds.
    expires_at: Option<i64>,
}

/// Backing store that keeps one JSON file per key in the local data directory.
///
/// File names are the base64url form of the key so any key is a valid name.
/// Expiry is enforced on read; `list` does not open files and may therefore
/// report keys that a following `get` finds expired.
pub struct FileKv {
    root: PathBuf,
}

impl FileKv {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `<data_local_dir>/genresort/kv`
    pub fn default_root() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("genresort/kv");
        path
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(key.as_bytes())))
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        let encoded = name.strip_suffix(".json")?;
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        let content = match async_fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: FileRecord = serde_json::from_str(&content)?;
        if record
            .expires_at
            .is_some_and(|at| Utc::now().timestamp_millis() >= at)
        {
            let _ = async_fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(record.value))
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        async_fs::create_dir_all(&self.root).await?;

        let record = FileRecord {
            value,
            expires_at: ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64),
        };
        let json = serde_json::to_string(&record)?;

        // rename keeps readers from seeing a half-written file
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        async_fs::write(&tmp, json).await?;
        async_fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match async_fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let limit = limit.max(1);
        let mut dir = match async_fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ListPage::default()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next().await {
            let entry = entry?;
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(Self::key_from_file_name) else {
                continue;
            };
            if key.starts_with(prefix) && cursor.is_none_or(|c| key.as_str() > c) {
                keys.push(key);
            }
        }
        keys.sort();

        let more_available = keys.len() > limit;
        keys.truncate(limit);
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

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("genresort-filekv-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let root = temp_root();
        let kv = FileKv::new(root.clone());

        kv.put("session:abc", "{\"a\":1}".into(), None).await.unwrap();
        assert_eq!(
            kv.get("session:abc").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        kv.delete("session:abc").await.unwrap();
        assert!(kv.get("session:abc").await.unwrap().is_none());
        kv.delete("session:abc").await.unwrap();

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_paged() {
        let root = temp_root();
        let kv = FileKv::new(root.clone());
        for id in ["c", "a", "b"] {
            kv.put(&format!("entity_cache:{id}"), "1".into(), None)
                .await
                .unwrap();
        }
        kv.put("other", "1".into(), None).await.unwrap();

        let page = kv.list("entity_cache:", None, 2).await.unwrap();
        assert_eq!(page.keys, vec!["entity_cache:a", "entity_cache:b"]);
        assert!(page.more_available);

        let rest = kv
            .list("entity_cache:", page.cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(rest.keys, vec!["entity_cache:c"]);
        assert!(!rest.more_available);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let kv = FileKv::new(temp_root());
        assert_eq!(kv.list("", None, 10).await.unwrap(), ListPage::default());
        assert!(kv.get("nothing").await.unwrap().is_none());
    }
}
