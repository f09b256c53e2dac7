//! Table metadata: loading, caching and invalidation.
//!
//! - [`table`] - [`TableSchema`], [`ColumnSchema`] and the [`MetadataKind`]s
//! - [`loader`] - The engine-specific [`SchemaLoader`] seam and name listers
//! - [`cache`] - Versioned persistence in the cache service
//! - [`names`] - Generation-counted name lists
//! - [`registry`] - The per-connection [`SchemaRegistry`]
//!
//! Most callers go through [`Connection::schema`], which returns a
//! [`Schema`] view bound to the connection.

pub mod cache;
pub mod loader;
pub mod names;
pub mod registry;
pub mod table;

pub use cache::{MetadataCache, SCHEMA_CACHE_VERSION};
pub use loader::{SchemaLoader, SchemaNameLister, TableNameLister, UnsupportedLoader};
pub use names::NameCache;
pub use registry::SchemaRegistry;
pub use table::{ColumnSchema, ForeignKey, MetadataKind, TableMetadata, TableSchema};

use dbkit_core::DbResult;

use crate::connection::Connection;

/// The schema registry of a connection, bound to that connection.
#[derive(Debug, Clone, Copy)]
pub struct Schema<'a> {
    db: &'a Connection,
}

impl<'a> Schema<'a> {
    pub(crate) const fn new(db: &'a Connection) -> Self {
        Self { db }
    }

    fn registry(&self) -> &'a SchemaRegistry {
        self.db.schema_registry()
    }

    /// See [`SchemaRegistry::table_metadata`].
    pub async fn table_metadata(
        &self,
        name: &str,
        kind: MetadataKind,
        refresh: bool,
    ) -> DbResult<Option<serde_json::Value>> {
        self.registry().table_metadata(self.db, name, kind, refresh).await
    }

    /// See [`SchemaRegistry::schema_metadata`].
    pub async fn schema_metadata(
        &self,
        schema: &str,
        kind: MetadataKind,
        refresh: bool,
    ) -> DbResult<Vec<serde_json::Value>> {
        self.registry().schema_metadata(self.db, schema, kind, refresh).await
    }

    /// Returns the structure of a table, or `None` if it does not exist.
    pub async fn table_schema(&self, name: &str) -> DbResult<Option<TableSchema>> {
        self.registry().table_schema(self.db, name, false).await
    }

    /// Like [`table_schema`](Self::table_schema), bypassing loaded metadata.
    pub async fn reload_table_schema(&self, name: &str) -> DbResult<Option<TableSchema>> {
        self.registry().table_schema(self.db, name, true).await
    }

    /// Returns the structure of every table in `schema`.
    pub async fn table_schemas(&self, schema: &str, refresh: bool) -> DbResult<Vec<TableSchema>> {
        self.registry().table_schemas(self.db, schema, refresh).await
    }

    /// See [`SchemaRegistry::schema_names`].
    pub async fn schema_names(&self, refresh: bool) -> DbResult<Vec<String>> {
        self.registry().schema_names(self.db, refresh).await
    }

    /// See [`SchemaRegistry::table_names`].
    pub async fn table_names(&self, schema: &str, refresh: bool) -> DbResult<Vec<String>> {
        self.registry().table_names(self.db, schema, refresh).await
    }

    /// See [`SchemaRegistry::refresh_table_schema`].
    pub async fn refresh_table_schema(&self, name: &str) -> DbResult<()> {
        self.registry().refresh_table_schema(name).await
    }

    /// See [`SchemaRegistry::refresh`].
    pub async fn refresh(&self) -> DbResult<()> {
        self.registry().refresh().await
    }

    /// See [`SchemaRegistry::raw_table_name`].
    pub fn raw_table_name(&self, name: &str) -> String {
        self.registry().raw_table_name(name)
    }
}
