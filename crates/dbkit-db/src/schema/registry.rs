//! Per-table metadata lifecycle.
//!
//! The registry keeps an in-process map from raw table name to the metadata
//! loaded so far. On first access to a table it consults the
//! [`MetadataCache`]; kinds still missing afterwards are fetched from the
//! [`SchemaLoader`] and the whole entry is written back to the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dbkit_core::{DbError, DbResult};

use super::cache::MetadataCache;
use super::loader::SchemaLoader;
use super::names::NameCache;
use super::table::{MetadataKind, TableMetadata, TableSchema};
use crate::connection::Connection;
use crate::quoting::Quoter;

/// Owns the metadata of every table seen by one connection.
pub struct SchemaRegistry {
    loader: Arc<dyn SchemaLoader>,
    quoter: Quoter,
    cache: Option<MetadataCache>,
    tables: Mutex<HashMap<String, TableMetadata>>,
    names: NameCache,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("quoter", &self.quoter)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SchemaRegistry {
    /// Creates a registry. Without a metadata cache every table is loaded
    /// from the database on first access.
    pub fn new(loader: Arc<dyn SchemaLoader>, quoter: Quoter, cache: Option<MetadataCache>) -> Self {
        Self {
            loader,
            quoter,
            cache,
            tables: Mutex::new(HashMap::new()),
            names: NameCache::new(),
        }
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, TableMetadata>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The metadata cache, if schema caching is enabled.
    pub const fn metadata_cache(&self) -> Option<&MetadataCache> {
        self.cache.as_ref()
    }

    /// Resolves `{{...}}` markers and the `%` prefix placeholder.
    pub fn raw_table_name(&self, name: &str) -> String {
        self.quoter.raw_table_name(name)
    }

    fn cache_for(&self, raw_name: &str) -> Option<&MetadataCache> {
        self.cache.as_ref().filter(|cache| cache.is_cacheable(raw_name))
    }

    /// Returns one kind of metadata for a table, loading it if needed.
    ///
    /// `Ok(None)` means the table does not exist. A missing table is not
    /// remembered: the next call asks the loader again.
    pub async fn table_metadata(
        &self,
        db: &Connection,
        name: &str,
        kind: MetadataKind,
        refresh: bool,
    ) -> DbResult<Option<serde_json::Value>> {
        let raw_name = self.raw_table_name(name);
        let cache = self.cache_for(&raw_name);

        let known = self.tables().contains_key(&raw_name);
        if !known {
            let cached = match cache {
                Some(cache) => cache.load(&raw_name).await?,
                None => None,
            };
            self.tables()
                .entry(raw_name.clone())
                .or_insert_with(|| cached.unwrap_or_default());
        }

        if !refresh {
            let hit = self
                .tables()
                .get(&raw_name)
                .and_then(|entry| entry.get(&kind).cloned());
            if hit.is_some() {
                return Ok(hit);
            }
        }

        tracing::debug!(table = %raw_name, kind = %kind, "Loading table metadata");
        let loaded = self.loader.load_table_metadata(db, &raw_name, kind).await?;

        let snapshot = {
            let mut tables = self.tables();
            let entry = tables.entry(raw_name.clone()).or_default();
            match &loaded {
                Some(value) => {
                    entry.insert(kind, value.clone());
                }
                None => {
                    entry.remove(&kind);
                }
            }
            entry.clone()
        };

        if let Some(cache) = cache {
            cache.store(&raw_name, &snapshot).await?;
        }
        Ok(loaded)
    }

    /// Returns one kind of metadata for every table of a schema, in listing
    /// order. Tables that vanished between listing and loading are skipped.
    pub async fn schema_metadata(
        &self,
        db: &Connection,
        schema: &str,
        kind: MetadataKind,
        refresh: bool,
    ) -> DbResult<Vec<serde_json::Value>> {
        let names = self.table_names(db, schema, refresh).await?;
        let mut result = Vec::with_capacity(names.len());
        for name in names {
            let name = if schema.is_empty() {
                name
            } else {
                format!("{schema}.{name}")
            };
            if let Some(value) = self.table_metadata(db, &name, kind, refresh).await? {
                result.push(value);
            }
        }
        Ok(result)
    }

    /// Returns the typed structure of a table.
    pub async fn table_schema(
        &self,
        db: &Connection,
        name: &str,
        refresh: bool,
    ) -> DbResult<Option<TableSchema>> {
        self.table_metadata(db, name, MetadataKind::Schema, refresh)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(DbError::from)
    }

    /// Returns the typed structure of every table of a schema.
    pub async fn table_schemas(
        &self,
        db: &Connection,
        schema: &str,
        refresh: bool,
    ) -> DbResult<Vec<TableSchema>> {
        self.schema_metadata(db, schema, MetadataKind::Schema, refresh)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(DbError::from))
            .collect()
    }

    /// Returns all schema names, memoized until refreshed.
    pub async fn schema_names(&self, db: &Connection, refresh: bool) -> DbResult<Vec<String>> {
        let lister = self.loader.schema_lister().ok_or_else(|| {
            DbError::not_supported("This database does not support fetching all schema names.")
        })?;
        if !refresh {
            if let Some(names) = self.names.schema_names() {
                return Ok(names);
            }
        }
        let generation = self.names.generation();
        let names = lister.find_schema_names(db).await?;
        self.names.set_schema_names(generation, names.clone());
        Ok(names)
    }

    /// Returns the table names of a schema, memoized until refreshed.
    pub async fn table_names(
        &self,
        db: &Connection,
        schema: &str,
        refresh: bool,
    ) -> DbResult<Vec<String>> {
        let lister = self.loader.table_lister().ok_or_else(|| {
            DbError::not_supported("This database does not support fetching all table names.")
        })?;
        if !refresh {
            if let Some(names) = self.names.table_names(schema) {
                return Ok(names);
            }
        }
        let generation = self.names.generation();
        let names = lister.find_table_names(db, schema).await?;
        self.names.set_table_names(schema, generation, names.clone());
        Ok(names)
    }

    /// Forgets the metadata of one table, here and in the cache service.
    /// Name lists are dropped as well.
    pub async fn refresh_table_schema(&self, name: &str) -> DbResult<()> {
        let raw_name = self.raw_table_name(name);
        self.tables().remove(&raw_name);
        self.names.invalidate();
        if let Some(cache) = &self.cache {
            cache.evict(&raw_name).await?;
        }
        Ok(())
    }

    /// Forgets all metadata: the cache tag is invalidated and every
    /// in-process entry dropped.
    pub async fn refresh(&self) -> DbResult<()> {
        if let Some(cache) = &self.cache {
            cache.invalidate_all().await?;
        }
        self.clear_local();
        Ok(())
    }

    /// Drops in-process state only. The cache service is left alone.
    pub fn clear_local(&self) {
        self.tables().clear();
        self.names.invalidate();
    }

    /// Whether any metadata of the table is held in process.
    pub fn is_loaded(&self, name: &str) -> bool {
        let raw_name = self.raw_table_name(name);
        self.tables()
            .get(&raw_name)
            .is_some_and(|entry| !entry.is_empty())
    }
}
