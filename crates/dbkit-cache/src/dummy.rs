//! A disabled cache backend.

use std::time::Duration;

use async_trait::async_trait;

use dbkit_core::DbResult;

use crate::backend::{CacheBackend, CacheValue};

/// A no-op cache backend that never stores anything.
///
/// Reports itself as disabled, so schema and query caching are skipped
/// entirely when it is configured. All operations succeed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyCache;

#[async_trait]
impl CacheBackend for DummyCache {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> DbResult<Option<CacheValue>> {
        Ok(None)
    }

    async fn set(
        &self,
        _key: &str,
        _value: CacheValue,
        _ttl: Option<Duration>,
        _tag: Option<&str>,
    ) -> DbResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> DbResult<bool> {
        Ok(false)
    }

    async fn invalidate_tag(&self, _tag: &str) -> DbResult<()> {
        Ok(())
    }

    async fn clear(&self) -> DbResult<()> {
        Ok(())
    }
}
