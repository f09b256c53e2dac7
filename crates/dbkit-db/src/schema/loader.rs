//! Engine-specific metadata retrieval.
//!
//! A [`SchemaLoader`] reads table metadata from the database. Name listing is
//! a separate capability: an engine that cannot enumerate tables or schemas
//! simply does not expose the corresponding lister, and callers get
//! [`DbError::NotSupported`] instead of an empty list.

use async_trait::async_trait;

use dbkit_core::{DbError, DbResult};

use super::table::MetadataKind;
use crate::connection::Connection;

/// Loads table metadata for one database engine.
#[async_trait]
pub trait SchemaLoader: Send + Sync {
    /// Loads one kind of metadata for a raw table name.
    ///
    /// Returns `Ok(None)` when the table does not exist. Kinds the engine
    /// cannot describe are reported as [`DbError::NotSupported`].
    async fn load_table_metadata(
        &self,
        db: &Connection,
        raw_name: &str,
        kind: MetadataKind,
    ) -> DbResult<Option<serde_json::Value>>;

    /// The table name lister, if the engine can enumerate tables.
    fn table_lister(&self) -> Option<&dyn TableNameLister> {
        None
    }

    /// The schema name lister, if the engine can enumerate schemas.
    fn schema_lister(&self) -> Option<&dyn SchemaNameLister> {
        None
    }
}

/// Enumerates the tables of a schema.
#[async_trait]
pub trait TableNameLister: Send + Sync {
    /// Returns the table names of `schema` (`""` is the default schema),
    /// without the schema prefix.
    async fn find_table_names(&self, db: &Connection, schema: &str) -> DbResult<Vec<String>>;
}

/// Enumerates the schemas of a database.
#[async_trait]
pub trait SchemaNameLister: Send + Sync {
    /// Returns all schema names, system schemas excluded.
    async fn find_schema_names(&self, db: &Connection) -> DbResult<Vec<String>>;
}

/// A loader for engines without metadata support. Every call fails with
/// [`DbError::NotSupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedLoader;

#[async_trait]
impl SchemaLoader for UnsupportedLoader {
    async fn load_table_metadata(
        &self,
        _db: &Connection,
        _raw_name: &str,
        kind: MetadataKind,
    ) -> DbResult<Option<serde_json::Value>> {
        Err(DbError::not_supported(format!(
            "Loading '{kind}' metadata is not supported by this database."
        )))
    }
}
