//! Filesystem cache backend.
//!
//! Every entry lives in its own file named after the SHA-256 of its key, so
//! any process pointed at the same directory sees the same entries. Tags are
//! versioned: each tag has a `.tag` file holding its current version, and an
//! entry remembers the version it was written under. Invalidating a tag bumps
//! the version, which turns every older entry into a miss without touching
//! the entries themselves.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use dbkit_core::{DbError, DbResult};

use crate::backend::{CacheBackend, CacheValue};

/// A filesystem-based cache backend using async I/O.
#[derive(Debug, Clone)]
pub struct FileCache {
    /// The directory where cache files are stored.
    pub dir: PathBuf,
}

/// Serialized representation of a file cache entry.
#[derive(Serialize, Deserialize)]
struct FileCacheEntry {
    value: CacheValue,
    expires_at_ms: Option<u128>,
    tag: Option<TagStamp>,
}

#[derive(Serialize, Deserialize)]
struct TagStamp {
    name: String,
    version: u128,
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn digest(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl FileCache {
    /// Creates a new file cache that stores entries in the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.cache", digest(key)))
    }

    fn tag_path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{}.tag", digest(tag)))
    }

    async fn tag_version(&self, tag: &str) -> DbResult<u128> {
        match tokio::fs::read_to_string(self.tag_path(tag)).await {
            Ok(text) => Ok(text.trim().parse().unwrap_or(0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(DbError::Io(e)),
        }
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn get(&self, key: &str) -> DbResult<Option<CacheValue>> {
        let path = self.key_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DbError::Io(e)),
        };

        // A torn or foreign file is a miss, never an error.
        let Ok(entry) = serde_json::from_slice::<FileCacheEntry>(&data) else {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        };

        if entry.expires_at_ms.is_some_and(|exp| now_ms() > exp) {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        if let Some(stamp) = &entry.tag {
            if self.tag_version(&stamp.name).await? != stamp.version {
                return Ok(None);
            }
        }

        Ok(Some(entry.value))
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        tag: Option<&str>,
    ) -> DbResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let tag = match tag {
            Some(name) => Some(TagStamp {
                name: name.to_string(),
                version: self.tag_version(name).await?,
            }),
            None => None,
        };

        let entry = FileCacheEntry {
            value,
            expires_at_ms: ttl.map(|d| now_ms() + d.as_millis()),
            tag,
        };

        let data = serde_json::to_vec(&entry)?;
        tokio::fs::write(self.key_path(key), &data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DbError::Io(e)),
        }
    }

    async fn invalidate_tag(&self, tag: &str) -> DbResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let next = now_ms().max(self.tag_version(tag).await? + 1);
        tokio::fs::write(self.tag_path(tag), next.to_string()).await?;
        Ok(())
    }

    async fn clear(&self) -> DbResult<()> {
        if self.dir.exists() {
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path
                    .extension()
                    .is_some_and(|ext| ext == "cache" || ext == "tag")
                {
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_cache_get_set() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());

        cache
            .set("key", CacheValue::Json(serde_json::json!([1, 2])), None, None)
            .await
            .unwrap();
        assert_eq!(
            cache.get("key").await.unwrap(),
            Some(CacheValue::Json(serde_json::json!([1, 2])))
        );
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_cache_shared_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileCache::new(dir.path());
        let reader = FileCache::new(dir.path());

        writer.set("dead", CacheValue::Integer(1), Some(Duration::from_secs(60)), None).await.unwrap();
        assert!(reader.has_key("dead").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_cache_ttl_expired() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache
            .set("key", CacheValue::Integer(1), Some(Duration::from_millis(1)), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_cache_invalidate_tag() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache.set("a", CacheValue::Integer(1), None, Some("schema")).await.unwrap();
        cache.set("b", CacheValue::Integer(2), None, None).await.unwrap();

        cache.invalidate_tag("schema").await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert_eq!(cache.get("b").await.unwrap(), Some(CacheValue::Integer(2)));

        // Entries written after the invalidation are live again.
        cache.set("a", CacheValue::Integer(3), None, Some("schema")).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(CacheValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_file_cache_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        tokio::fs::write(cache.key_path("bad"), b"not json").await.unwrap();
        assert!(cache.get("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_cache_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache.set("a", CacheValue::Integer(1), None, None).await.unwrap();
        cache.set("b", CacheValue::Integer(2), None, None).await.unwrap();

        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());

        cache.clear().await.unwrap();
        assert!(cache.get("b").await.unwrap().is_none());
    }
}
