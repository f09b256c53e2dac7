//! Table metadata loading and the two-tier metadata cache.

use std::sync::Arc;

use dbkit_cache::{CacheBackend, DummyCache, FileCache, InMemoryCache};
use dbkit_core::{ConnectionSettings, DbError};
use dbkit_db::schema::SCHEMA_CACHE_VERSION;
use dbkit_db::{ColumnSchema, Connection, MetadataKind, SchemaLoader, TableSchema};
use dbkit_test::{InMemoryLoader, MockFactory};

fn post_table() -> TableSchema {
    TableSchema::new("tbl_post")
        .with_column(ColumnSchema {
            is_primary_key: true,
            auto_increment: true,
            allow_null: false,
            ..ColumnSchema::new("id", "int(11)")
        })
        .with_column(ColumnSchema::new("title", "varchar(255)"))
}

fn audit_log() -> TableSchema {
    TableSchema {
        schema_name: Some("audit".into()),
        full_name: "audit.tbl_log".into(),
        ..TableSchema::new("tbl_log")
    }
}

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        enable_schema_cache: true,
        table_prefix: "tbl_".into(),
        username: Some("app".into()),
        ..ConnectionSettings::with_dsn("db:master")
    }
}

fn connect(loader: &Arc<InMemoryLoader>, cache: Arc<dyn CacheBackend>) -> Connection {
    Connection::builder(settings(), MockFactory::new().as_factory())
        .schema_loader(Arc::clone(loader) as Arc<dyn SchemaLoader>)
        .schema_cache(cache)
        .build()
        .unwrap()
}

// ============================================================================
// In-process registry
// ============================================================================

/// 1. Placeholders and the table prefix resolve before lookup.
#[tokio::test]
async fn test_lookup_by_placeholder_name() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let db = connect(&loader, Arc::new(DummyCache));

    let table = db.schema().table_schema("{{%post}}").await.unwrap().unwrap();
    assert_eq!(table.name, "tbl_post");
    assert_eq!(table.primary_key, vec!["id"]);
    assert_eq!(db.schema().raw_table_name("{{%post}}"), "tbl_post");
}

/// 2. A second lookup is served in process.
#[tokio::test]
async fn test_second_lookup_served_in_process() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let db = connect(&loader, Arc::new(DummyCache));

    db.schema().table_schema("tbl_post").await.unwrap();
    db.schema().table_schema("tbl_post").await.unwrap();
    assert_eq!(loader.load_count("tbl_post", MetadataKind::Schema), 1);

    db.schema().reload_table_schema("tbl_post").await.unwrap();
    assert_eq!(loader.load_count("tbl_post", MetadataKind::Schema), 2);
}

/// 3. A missing table is not remembered.
#[tokio::test]
async fn test_missing_table_reloaded() {
    let loader = Arc::new(InMemoryLoader::new());
    let db = connect(&loader, Arc::new(InMemoryCache::new()));

    assert!(db.schema().table_schema("tbl_post").await.unwrap().is_none());
    loader.put_table(post_table());
    assert!(db.schema().table_schema("tbl_post").await.unwrap().is_some());
    assert_eq!(loader.load_count("tbl_post", MetadataKind::Schema), 2);
}

/// 4. Kinds are loaded and cached independently.
#[tokio::test]
async fn test_metadata_kinds_independent() {
    let loader = Arc::new(
        InMemoryLoader::new()
            .with_table(post_table())
            .with_metadata("tbl_post", MetadataKind::Indexes, serde_json::json!([{"name": "idx_title"}])),
    );
    let db = connect(&loader, Arc::new(InMemoryCache::new()));

    let indexes = db
        .schema()
        .table_metadata("tbl_post", MetadataKind::Indexes, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(indexes[0]["name"], "idx_title");
    assert_eq!(loader.load_count("tbl_post", MetadataKind::Schema), 0);

    let err = db
        .schema()
        .table_metadata("tbl_post", MetadataKind::Checks, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotSupported(_)));
}

// ============================================================================
// Cache service
// ============================================================================

/// 5. Metadata stored by one connection is read by another without
/// reaching the loader.
#[tokio::test]
async fn test_cache_shared_between_connections() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());

    let first = connect(&loader, Arc::clone(&cache));
    let loaded = first.schema().table_schema("tbl_post").await.unwrap().unwrap();

    let second = connect(&loader, Arc::clone(&cache));
    let cached = second.schema().table_schema("tbl_post").await.unwrap().unwrap();
    assert_eq!(cached, loaded);
    assert_eq!(loader.total_loads(), 1);
}

/// 6. The same round trip through the filesystem cache.
#[tokio::test]
async fn test_file_cache_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));

    let first = connect(&loader, Arc::new(FileCache::new(dir.path())));
    first.schema().table_schema("tbl_post").await.unwrap();

    let second = connect(&loader, Arc::new(FileCache::new(dir.path())));
    let table = second.schema().table_schema("tbl_post").await.unwrap().unwrap();
    assert_eq!(table.column_names(), vec!["id", "title"]);
    assert_eq!(loader.total_loads(), 1);
}

/// 7. Bumping the cache-format version forces a reload.
#[tokio::test]
async fn test_version_bump_forces_reload() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());

    let current = connect(&loader, Arc::clone(&cache));
    current.schema().table_schema("tbl_post").await.unwrap();

    let next_version = SCHEMA_CACHE_VERSION + 1;
    let upgraded = Connection::builder(settings(), MockFactory::new().as_factory())
        .schema_loader(Arc::clone(&loader) as Arc<dyn SchemaLoader>)
        .schema_cache(cache)
        .schema_cache_version(next_version)
        .build()
        .unwrap();
    upgraded.schema().table_schema("tbl_post").await.unwrap();
    assert_eq!(loader.load_count("tbl_post", MetadataKind::Schema), 2);
}

/// 8. Excluded tables never reach the cache service.
#[tokio::test]
async fn test_excluded_table_not_cached() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
    let build = || {
        Connection::builder(
            ConnectionSettings {
                schema_cache_exclude: vec!["tbl_post".into()],
                ..settings()
            },
            MockFactory::new().as_factory(),
        )
        .schema_loader(Arc::clone(&loader) as Arc<dyn SchemaLoader>)
        .schema_cache(Arc::clone(&cache))
        .build()
        .unwrap()
    };

    build().schema().table_schema("tbl_post").await.unwrap();
    build().schema().table_schema("tbl_post").await.unwrap();
    assert_eq!(loader.total_loads(), 2);
}

/// 9. refresh() drops metadata everywhere.
#[tokio::test]
async fn test_refresh_invalidates_everything() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
    let first = connect(&loader, Arc::clone(&cache));
    let second = connect(&loader, Arc::clone(&cache));

    first.schema().table_schema("tbl_post").await.unwrap();
    first.schema().refresh().await.unwrap();
    second.schema().table_schema("tbl_post").await.unwrap();
    assert_eq!(loader.total_loads(), 2);
}

/// 10. refresh_table_schema() picks up a migrated table.
#[tokio::test]
async fn test_refresh_one_table() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let db = connect(&loader, Arc::new(InMemoryCache::new()));

    db.schema().table_schema("tbl_post").await.unwrap();
    loader.put_table(post_table().with_column(ColumnSchema::new("body", "text")));
    db.schema().refresh_table_schema("{{%post}}").await.unwrap();

    let table = db.schema().table_schema("tbl_post").await.unwrap().unwrap();
    assert_eq!(table.column_names(), vec!["id", "title", "body"]);
}

/// 11. Without enable_schema_cache the cache service is never used.
#[tokio::test]
async fn test_schema_cache_disabled() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let cache = Arc::new(InMemoryCache::new());
    let db = Connection::builder(
        ConnectionSettings {
            enable_schema_cache: false,
            ..settings()
        },
        MockFactory::new().as_factory(),
    )
    .schema_loader(Arc::clone(&loader) as Arc<dyn SchemaLoader>)
    .schema_cache(Arc::clone(&cache) as Arc<dyn CacheBackend>)
    .build()
    .unwrap();

    db.schema().table_schema("tbl_post").await.unwrap();
    assert!(cache.is_empty().await);
}

// ============================================================================
// Name listing
// ============================================================================

/// 12. Table and schema names come from the listers and are memoized.
#[tokio::test]
async fn test_name_listing() {
    let loader = Arc::new(
        InMemoryLoader::new()
            .with_table(post_table())
            .with_table(audit_log())
            .with_listing(["audit"]),
    );
    let db = connect(&loader, Arc::new(DummyCache));

    assert_eq!(db.schema().schema_names(false).await.unwrap(), vec!["audit"]);
    assert_eq!(db.schema().table_names("", false).await.unwrap(), vec!["tbl_post"]);

    let audit = db.schema().table_schemas("audit", false).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].full_name, "audit.tbl_log");
    assert_eq!(loader.load_count("audit.tbl_log", MetadataKind::Schema), 1);

    loader.put_table(TableSchema::new("tbl_tag"));
    assert_eq!(db.schema().table_names("", false).await.unwrap(), vec!["tbl_post"]);
    assert_eq!(
        db.schema().table_names("", true).await.unwrap(),
        vec!["tbl_post", "tbl_tag"]
    );
}

/// 13. Engines without listers report NotSupported.
#[tokio::test]
async fn test_name_listing_not_supported() {
    let loader = Arc::new(InMemoryLoader::new().with_table(post_table()));
    let db = connect(&loader, Arc::new(DummyCache));

    let err = db.schema().table_names("", false).await.unwrap_err();
    assert!(err.is_not_supported());
    let err = db.schema().schema_names(false).await.unwrap_err();
    assert!(err.to_string().contains("fetching all schema names"));
}

/// 14. Schema-wide metadata follows listing order and drops vanished tables.
#[tokio::test]
async fn test_schema_metadata_keeps_listing_order() {
    let loader = Arc::new(
        InMemoryLoader::new()
            .with_table(TableSchema::new("tbl_zeta"))
            .with_table(TableSchema::new("tbl_alpha"))
            .with_table(TableSchema::new("tbl_mid"))
            .with_listed_tables("", ["tbl_zeta", "tbl_gone", "tbl_alpha", "tbl_mid"]),
    );
    let db = connect(&loader, Arc::new(InMemoryCache::new()));

    let values = db
        .schema()
        .schema_metadata("", MetadataKind::Schema, false)
        .await
        .unwrap();
    let names: Vec<String> = values
        .into_iter()
        .map(|value| serde_json::from_value::<TableSchema>(value).unwrap().name)
        .collect();
    assert_eq!(names, vec!["tbl_zeta", "tbl_alpha", "tbl_mid"]);
    assert_eq!(loader.load_count("tbl_gone", MetadataKind::Schema), 1);

    let schemas = db.schema().table_schemas("", false).await.unwrap();
    let names: Vec<&str> = schemas.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["tbl_zeta", "tbl_alpha", "tbl_mid"]);
}
