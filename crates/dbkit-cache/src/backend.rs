//! The [`CacheBackend`] trait and the [`CacheValue`] type it stores.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dbkit_core::DbResult;

/// A value that can be stored in a cache backend.
///
/// Supports common types: strings, integers, floats, raw bytes, and JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    /// A string value.
    String(String),
    /// A 64-bit integer value.
    Integer(i64),
    /// A 64-bit floating-point value.
    Float(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A JSON value.
    Json(serde_json::Value),
}

impl CacheValue {
    /// Returns the value as a string, if it is a `String` variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an i64, if it is an `Integer` variant.
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as JSON, if it is a `Json` variant.
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(j) => Some(j),
            _ => None,
        }
    }

    /// Consumes the value, returning the JSON payload if it is a `Json` variant.
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Self::Json(j) => Some(j),
            _ => None,
        }
    }
}

/// A key-value cache with TTL and tag-based invalidation.
///
/// Connections may live in separate processes, so nothing in dbkit assumes a
/// backend shares memory with its caller. Individual `get`/`set` calls are
/// assumed atomic; no additional locking is performed on top of them.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Whether the backend actually stores anything.
    ///
    /// Callers skip the cache entirely when this returns `false`.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Retrieves a value from the cache by key.
    ///
    /// Returns `None` if the key does not exist, has expired, or belongs to
    /// an invalidated tag.
    async fn get(&self, key: &str) -> DbResult<Option<CacheValue>>;

    /// Stores a value with an optional TTL and an optional dependency tag.
    ///
    /// If `ttl` is `None`, the value does not expire.
    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
        tag: Option<&str>,
    ) -> DbResult<()>;

    /// Deletes a value from the cache.
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> DbResult<bool>;

    /// Invalidates every entry stored with the given tag.
    async fn invalidate_tag(&self, tag: &str) -> DbResult<()>;

    /// Checks whether a live value exists for the key.
    async fn has_key(&self, key: &str) -> DbResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Removes all entries from the cache.
    async fn clear(&self) -> DbResult<()>;
}
