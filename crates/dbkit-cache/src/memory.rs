//! In-process cache backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use dbkit_core::DbResult;

use crate::backend::{CacheBackend, CacheValue};

/// An entry in the in-memory cache, wrapping a value with its expiration time.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
    tag: Option<String>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// A thread-safe in-memory cache backend with TTL and tag support.
///
/// Uses `RwLock<HashMap>` for concurrent read access. Expired entries are
/// ignored on read and purged on the next write. Clones share the same
/// store, which makes this suitable for single-process deployments and
/// testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    /// Creates a new empty in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entries.
    pub async fn len(&self) -> usize {
        self.store
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired())
            .count()
    }

    /// Returns `true` if no live entry is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> DbResult<Option<CacheValue>> {
        let store = self.store.read().await;
        match store.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        tag: Option<&str>,
    ) -> DbResult<()> {
        let mut store = self.store.write().await;
        store.retain(|_, entry| !entry.is_expired());
        let expires_at = ttl.map(|d| Instant::now() + d);
        store.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                tag: tag.map(ToString::to_string),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        let mut store = self.store.write().await;
        Ok(store.remove(key).is_some())
    }

    async fn invalidate_tag(&self, tag: &str) -> DbResult<()> {
        let mut store = self.store.write().await;
        store.retain(|_, entry| entry.tag.as_deref() != Some(tag));
        Ok(())
    }

    async fn has_key(&self, key: &str) -> DbResult<bool> {
        let store = self.store.read().await;
        Ok(store.get(key).is_some_and(|entry| !entry.is_expired()))
    }

    async fn clear(&self) -> DbResult<()> {
        self.store.write().await.clear();
        Ok(())
    }
}
