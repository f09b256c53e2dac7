//! An in-memory schema loader.
//!
//! [`InMemoryLoader`] serves [`TableSchema`]s registered by the test and
//! counts how often each (table, kind) pair was loaded, which is how the
//! metadata cache tests prove that a lookup never reached the loader.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use dbkit_core::{DbError, DbResult};
use dbkit_db::{Connection, MetadataKind, SchemaLoader, SchemaNameLister, TableNameLister, TableSchema};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serves table metadata from memory.
///
/// Tables are keyed by their raw name, schema-qualified when they live
/// outside the default schema (`"audit.tbl_log"`). [`MetadataKind::Schema`]
/// is derived from the registered [`TableSchema`]; other kinds must be set
/// with [`with_metadata`](Self::with_metadata) or are reported as not
/// supported.
#[derive(Default)]
pub struct InMemoryLoader {
    tables: Mutex<BTreeMap<String, TableSchema>>,
    extra: Mutex<HashMap<(String, MetadataKind), serde_json::Value>>,
    schemas: Vec<String>,
    listed: HashMap<String, Vec<String>>,
    listing: bool,
    loads: Mutex<HashMap<(String, MetadataKind), usize>>,
}

impl InMemoryLoader {
    /// Creates a loader without tables and without name listing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table under its full name.
    #[must_use]
    pub fn with_table(self, table: TableSchema) -> Self {
        lock(&self.tables).insert(table.full_name.clone(), table);
        self
    }

    /// Registers metadata of a kind other than [`MetadataKind::Schema`].
    #[must_use]
    pub fn with_metadata(self, table: &str, kind: MetadataKind, value: serde_json::Value) -> Self {
        lock(&self.extra).insert((table.to_string(), kind), value);
        self
    }

    /// Enables table and schema name listing. `schemas` are the non-default
    /// schemas reported by the schema lister.
    #[must_use]
    pub fn with_listing<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.listing = true;
        self.schemas = schemas.into_iter().map(Into::into).collect();
        self
    }

    /// Fixes the table names listed for `schema`, in the given order, instead
    /// of deriving them from the registered tables. Names need not have a
    /// table behind them. Enables listing.
    #[must_use]
    pub fn with_listed_tables<I, S>(mut self, schema: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.listing = true;
        self.listed
            .insert(schema.to_string(), names.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces or adds a table after construction, as a migration would.
    pub fn put_table(&self, table: TableSchema) {
        lock(&self.tables).insert(table.full_name.clone(), table);
    }

    /// Removes a table, as `DROP TABLE` would.
    pub fn drop_table(&self, full_name: &str) {
        lock(&self.tables).remove(full_name);
    }

    /// How many times metadata of `kind` was loaded for `table`.
    pub fn load_count(&self, table: &str, kind: MetadataKind) -> usize {
        lock(&self.loads)
            .get(&(table.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }

    /// Total loads across all tables and kinds.
    pub fn total_loads(&self) -> usize {
        lock(&self.loads).values().sum()
    }
}

#[async_trait]
impl SchemaLoader for InMemoryLoader {
    async fn load_table_metadata(
        &self,
        _db: &Connection,
        raw_name: &str,
        kind: MetadataKind,
    ) -> DbResult<Option<serde_json::Value>> {
        *lock(&self.loads).entry((raw_name.to_string(), kind)).or_default() += 1;

        let Some(table) = lock(&self.tables).get(raw_name).cloned() else {
            return Ok(None);
        };
        if kind == MetadataKind::Schema {
            return Ok(Some(serde_json::to_value(table)?));
        }
        lock(&self.extra)
            .get(&(raw_name.to_string(), kind))
            .cloned()
            .map(Some)
            .ok_or_else(|| DbError::not_supported(format!("'{kind}' metadata is not registered.")))
    }

    fn table_lister(&self) -> Option<&dyn TableNameLister> {
        self.listing.then_some(self as &dyn TableNameLister)
    }

    fn schema_lister(&self) -> Option<&dyn SchemaNameLister> {
        self.listing.then_some(self as &dyn SchemaNameLister)
    }
}

#[async_trait]
impl TableNameLister for InMemoryLoader {
    async fn find_table_names(&self, _db: &Connection, schema: &str) -> DbResult<Vec<String>> {
        if let Some(names) = self.listed.get(schema) {
            return Ok(names.clone());
        }
        Ok(lock(&self.tables)
            .values()
            .filter(|table| table.schema_name.as_deref().unwrap_or("") == schema)
            .map(|table| table.name.clone())
            .collect())
    }
}

#[async_trait]
impl SchemaNameLister for InMemoryLoader {
    async fn find_schema_names(&self, _db: &Connection) -> DbResult<Vec<String>> {
        Ok(self.schemas.clone())
    }
}
