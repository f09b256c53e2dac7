//! Building connections from settings.

use std::sync::Arc;

use dbkit_cache::CacheBackend;
use dbkit_core::{ConnectionSettings, DbError, DbResult};

use super::Connection;
use crate::client::ClientFactory;
use crate::quoting::Quoter;
use crate::schema::{MetadataCache, SchemaLoader, SchemaRegistry, UnsupportedLoader, SCHEMA_CACHE_VERSION};

/// Builder for [`Connection`].
///
/// Only the settings and the client factory are required. Without a schema
/// loader every metadata lookup fails with `NotSupported`. The server status
/// cache, which holds dead-server markers, defaults to the schema cache.
pub struct ConnectionBuilder {
    settings: ConnectionSettings,
    factory: Arc<dyn ClientFactory>,
    loader: Arc<dyn SchemaLoader>,
    schema_cache: Option<Arc<dyn CacheBackend>>,
    schema_cache_version: u32,
    query_cache: Option<Arc<dyn CacheBackend>>,
    server_status_cache: Option<Arc<dyn CacheBackend>>,
}

impl ConnectionBuilder {
    /// Creates a builder.
    pub fn new(settings: ConnectionSettings, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            settings,
            factory,
            loader: Arc::new(UnsupportedLoader),
            schema_cache: None,
            schema_cache_version: SCHEMA_CACHE_VERSION,
            query_cache: None,
            server_status_cache: None,
        }
    }

    /// Sets the engine-specific schema loader.
    #[must_use]
    pub fn schema_loader(mut self, loader: Arc<dyn SchemaLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Sets the cache service for table metadata. It is only used for
    /// metadata when `enable_schema_cache` is on.
    #[must_use]
    pub fn schema_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.schema_cache = Some(cache);
        self
    }

    /// Overrides the expected metadata cache-format version.
    #[must_use]
    pub const fn schema_cache_version(mut self, version: u32) -> Self {
        self.schema_cache_version = version;
        self
    }

    /// Sets the cache service for query results.
    #[must_use]
    pub fn query_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    /// Sets the cache service for dead-server markers.
    #[must_use]
    pub fn server_status_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.server_status_cache = Some(cache);
        self
    }

    /// Builds the connection. Nothing is opened yet.
    pub fn build(self) -> DbResult<Connection> {
        let settings = self.settings;
        if settings.dsn.is_none() && settings.masters.is_empty() && !settings.slaves.is_empty() {
            return Err(DbError::configuration(
                "Slaves are configured but neither dsn nor masters is set.",
            ));
        }

        let dsn = settings
            .dsn
            .clone()
            .or_else(|| settings.masters.first().map(|m| m.dsn.clone()))
            .unwrap_or_default();
        let username = settings
            .username
            .clone()
            .or_else(|| settings.master_defaults.username.clone())
            .unwrap_or_default();

        let metadata_cache = self
            .schema_cache
            .as_ref()
            .filter(|_| settings.enable_schema_cache)
            .map(|backend| {
                MetadataCache::new(Arc::clone(backend), &dsn, Some(&username))
                    .with_version(self.schema_cache_version)
                    .with_duration(settings.schema_cache_duration)
                    .with_exclusions(settings.schema_cache_exclude.iter().cloned())
            });
        let registry = SchemaRegistry::new(
            self.loader,
            Quoter::new(settings.quote_style, settings.table_prefix.clone()),
            metadata_cache,
        );
        let status_cache = self.server_status_cache.or(self.schema_cache);

        tracing::debug!(dsn = %dsn, masters = settings.masters.len(), slaves = settings.slaves.len(), "Connection configured");
        Ok(Connection::from_parts(
            settings,
            dsn,
            username,
            self.factory,
            registry,
            status_cache,
            self.query_cache,
        ))
    }
}
