//! Persistence of table metadata in the cache service.
//!
//! Entries are stored as JSON documents stamped with a cache-format version:
//!
//! ```json
//! {"cache_version": 1, "kinds": {"schema": {...}, "primaryKey": [...]}}
//! ```
//!
//! An entry with another version, or one that fails to decode, is a miss.
//! Bumping [`SCHEMA_CACHE_VERSION`] therefore retires every entry written by
//! older builds without flushing anything. All entries of one connection
//! share a tag so they can be invalidated together.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dbkit_cache::{CacheBackend, CacheValue};
use dbkit_core::DbResult;

use super::table::TableMetadata;

/// Current layout version of persisted table metadata.
pub const SCHEMA_CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredMetadata {
    cache_version: u32,
    kinds: TableMetadata,
}

/// Versioned, tagged storage of per-table metadata.
#[derive(Clone)]
pub struct MetadataCache {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    version: u32,
    duration: Option<Duration>,
    exclude: HashSet<String>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("duration", &self.duration)
            .field("exclude", &self.exclude)
            .finish_non_exhaustive()
    }
}

impl MetadataCache {
    /// Creates a metadata cache for the connection identified by `dsn` and
    /// `username`. Entries never expire until [`with_duration`](Self::with_duration)
    /// says otherwise.
    pub fn new(backend: Arc<dyn CacheBackend>, dsn: &str, username: Option<&str>) -> Self {
        Self {
            backend,
            namespace: format!("dbkit.schema::{dsn}::{}", username.unwrap_or_default()),
            version: SCHEMA_CACHE_VERSION,
            duration: None,
            exclude: HashSet::new(),
        }
    }

    /// Sets the expected cache-format version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the lifetime of stored entries in seconds. 0 means no expiry.
    #[must_use]
    pub const fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = if seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(seconds))
        };
        self
    }

    /// Sets the raw table names whose metadata is never persisted.
    #[must_use]
    pub fn with_exclusions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = names.into_iter().map(Into::into).collect();
        self
    }

    /// The expected cache-format version.
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// The tag shared by every entry of this connection.
    pub fn tag(&self) -> &str {
        &self.namespace
    }

    /// The cache key for a raw table name.
    pub fn key(&self, raw_name: &str) -> String {
        format!("{}::{raw_name}", self.namespace)
    }

    /// Whether metadata for `raw_name` goes through the cache service at all.
    pub fn is_cacheable(&self, raw_name: &str) -> bool {
        self.backend.is_enabled() && !self.exclude.contains(raw_name)
    }

    /// Reads the stored metadata of a table.
    ///
    /// Returns `None` on a miss, on a version mismatch and on an entry that
    /// does not decode.
    pub async fn load(&self, raw_name: &str) -> DbResult<Option<TableMetadata>> {
        let Some(value) = self.backend.get(&self.key(raw_name)).await? else {
            return Ok(None);
        };
        let Some(json) = value.into_json() else {
            tracing::debug!(table = raw_name, "Ignoring non-JSON schema cache entry");
            return Ok(None);
        };
        match serde_json::from_value::<StoredMetadata>(json) {
            Ok(stored) if stored.cache_version == self.version => Ok(Some(stored.kinds)),
            Ok(stored) => {
                tracing::debug!(
                    table = raw_name,
                    found = stored.cache_version,
                    expected = self.version,
                    "Ignoring schema cache entry with stale version"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::debug!(table = raw_name, error = %e, "Ignoring malformed schema cache entry");
                Ok(None)
            }
        }
    }

    /// Persists the full metadata entry of a table under the shared tag.
    pub async fn store(&self, raw_name: &str, metadata: &TableMetadata) -> DbResult<()> {
        let stored = StoredMetadata {
            cache_version: self.version,
            kinds: metadata.clone(),
        };
        let json = serde_json::to_value(&stored)?;
        self.backend
            .set(
                &self.key(raw_name),
                CacheValue::Json(json),
                self.duration,
                Some(&self.namespace),
            )
            .await
    }

    /// Removes the stored entry of a table.
    pub async fn evict(&self, raw_name: &str) -> DbResult<()> {
        self.backend.delete(&self.key(raw_name)).await?;
        Ok(())
    }

    /// Invalidates every entry of this connection.
    pub async fn invalidate_all(&self) -> DbResult<()> {
        self.backend.invalidate_tag(&self.namespace).await
    }
}
