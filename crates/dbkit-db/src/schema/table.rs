//! Table and column descriptions produced by schema loaders.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named category of table metadata. Each kind is loaded and cached on its
/// own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetadataKind {
    /// The full [`TableSchema`].
    #[serde(rename = "schema")]
    Schema,
    /// The primary key constraint.
    #[serde(rename = "primaryKey")]
    PrimaryKey,
    /// Unique constraints.
    #[serde(rename = "uniques")]
    Uniques,
    /// Foreign key constraints.
    #[serde(rename = "foreignKeys")]
    ForeignKeys,
    /// Indexes.
    #[serde(rename = "indexes")]
    Indexes,
    /// Check constraints.
    #[serde(rename = "checks")]
    Checks,
    /// Column default value constraints.
    #[serde(rename = "defaultValues")]
    DefaultValues,
}

impl MetadataKind {
    /// All kinds, in a stable order.
    pub const ALL: [Self; 7] = [
        Self::Schema,
        Self::PrimaryKey,
        Self::Uniques,
        Self::ForeignKeys,
        Self::Indexes,
        Self::Checks,
        Self::DefaultValues,
    ];

    /// Returns the name used for this kind in persisted metadata.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::PrimaryKey => "primaryKey",
            Self::Uniques => "uniques",
            Self::ForeignKeys => "foreignKeys",
            Self::Indexes => "indexes",
            Self::Checks => "checks",
            Self::DefaultValues => "defaultValues",
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata loaded so far for one table, keyed by kind.
pub type TableMetadata = BTreeMap<MetadataKind, serde_json::Value>;

/// Describes one column of a table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name, unquoted.
    pub name: String,
    /// Engine type as reported by the database, e.g. `varchar(255)`.
    pub db_type: String,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,
    /// Whether the column is auto-incremental.
    pub auto_increment: bool,
    /// Default value, if any.
    pub default_value: Option<serde_json::Value>,
    /// Display size.
    pub size: Option<u32>,
    /// Numeric precision.
    pub precision: Option<u32>,
    /// Numeric scale.
    pub scale: Option<u32>,
    /// Allowed values of an enum column.
    #[serde(default)]
    pub enum_values: Vec<String>,
    /// Column comment.
    pub comment: Option<String>,
}

impl ColumnSchema {
    /// Creates a nullable column of the given type.
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_type: db_type.into(),
            allow_null: true,
            ..Self::default()
        }
    }
}

/// A foreign key: the referenced table and the local → foreign column pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Name of the constraint, when the engine reports one.
    pub name: Option<String>,
    /// The referenced table.
    pub foreign_table: String,
    /// Local column name → referenced column name.
    pub columns: BTreeMap<String, String>,
}

/// The structure of one table, as returned for [`MetadataKind::Schema`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    /// Schema the table belongs to, if not the default one.
    pub schema_name: Option<String>,
    /// Table name without schema.
    pub name: String,
    /// Schema-qualified name.
    pub full_name: String,
    /// Primary key column names.
    pub primary_key: Vec<String>,
    /// Sequence used for the primary key, if any.
    pub sequence_name: Option<String>,
    /// Foreign keys of the table.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Columns in declaration order.
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates an empty schema for a table in the default schema.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            ..Self::default()
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn with_column(mut self, column: ColumnSchema) -> Self {
        if column.is_primary_key && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    /// Returns the named column.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns all column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Replaces the primary key, updating the columns' primary key flags.
    pub fn fix_primary_key<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = keys.into_iter().map(Into::into).collect();
        for column in &mut self.columns {
            column.is_primary_key = self.primary_key.contains(&column.name);
        }
    }
}
