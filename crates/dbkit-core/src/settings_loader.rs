//! Settings loading from configuration files.
//!
//! [`ConnectionSettings`] can be loaded from TOML or JSON. Whatever the file
//! leaves out keeps its default value, and environment variables are applied
//! last.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `DBKIT_DSN` | `dsn` |
//! | `DBKIT_USERNAME` | `username` |
//! | `DBKIT_PASSWORD` | `password` |
//! | `DBKIT_TABLE_PREFIX` | `table_prefix` |
//! | `DBKIT_ENABLE_SLAVES` | `enable_slaves` |
//! | `DBKIT_SERVER_RETRY_INTERVAL` | `server_retry_interval` |
//! | `DBKIT_LOG_LEVEL` | `log_level` |
//! | `DBKIT_DEBUG` | `debug` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use dbkit_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/db.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::DbError;
use crate::settings::ConnectionSettings;

/// Loads settings from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<ConnectionSettings, DbError> {
    // TOML is converted to JSON and merged over the serialized defaults so
    // every key the file omits keeps its default.
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| DbError::Configuration(format!("Failed to parse TOML: {e}")))?;

    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<ConnectionSettings, DbError> {
    from_toml_str(&read_file(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<ConnectionSettings, DbError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<ConnectionSettings, DbError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| DbError::Configuration(format!("Failed to parse JSON: {e}")))?;

    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<ConnectionSettings, DbError> {
    from_json_str(&read_file(path.as_ref(), "JSON")?)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> ConnectionSettings {
    let mut settings = ConnectionSettings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `DBKIT_*` environment variable overrides to a settings struct.
pub fn apply_env_overrides(settings: &mut ConnectionSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Applies overrides using an arbitrary variable lookup.
///
/// Boolean values accept "true"/"1"/"yes"; an unparseable retry interval is
/// ignored.
pub fn apply_overrides<F>(settings: &mut ConnectionSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("DBKIT_DSN") {
        settings.dsn = Some(val);
    }

    if let Some(val) = lookup("DBKIT_USERNAME") {
        settings.username = Some(val);
    }

    if let Some(val) = lookup("DBKIT_PASSWORD") {
        settings.password = Some(val);
    }

    if let Some(val) = lookup("DBKIT_TABLE_PREFIX") {
        settings.table_prefix = val;
    }

    if let Some(val) = lookup("DBKIT_ENABLE_SLAVES") {
        settings.enable_slaves = parse_bool(&val);
    }

    if let Some(val) = lookup("DBKIT_SERVER_RETRY_INTERVAL") {
        if let Ok(secs) = val.parse::<u64>() {
            settings.server_retry_interval = secs;
        }
    }

    if let Some(val) = lookup("DBKIT_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Some(val) = lookup("DBKIT_DEBUG") {
        settings.debug = parse_bool(&val);
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_bool(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn read_file(path: &Path, format: &str) -> Result<String, DbError> {
    std::fs::read_to_string(path).map_err(|e| {
        DbError::Configuration(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(
    value: serde_json::Value,
    format: &str,
) -> Result<ConnectionSettings, DbError> {
    let default_json = serde_json::to_value(ConnectionSettings::default()).map_err(|e| {
        DbError::Configuration(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        DbError::Configuration(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::QuoteStyle;
    use std::collections::HashMap;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            dsn = "mysql:host=localhost;dbname=app"
            username = "app"
            table_prefix = "tbl_"
            quote_style = "mysql"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.dsn.as_deref(), Some("mysql:host=localhost;dbname=app"));
        assert_eq!(settings.table_prefix, "tbl_");
        assert_eq!(settings.quote_style, QuoteStyle::Mysql);
        // Defaults preserved
        assert_eq!(settings.server_retry_interval, 600);
        assert!(settings.enable_slaves);
    }

    #[test]
    fn test_from_toml_str_pools() {
        let toml = r#"
            shuffle_masters = false

            [[masters]]
            dsn = "mysql:host=db1"

            [[masters]]
            dsn = "mysql:host=db2"
            username = "override"

            [[slaves]]
            dsn = "mysql:host=replica1"

            [slave_defaults]
            username = "reader"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.shuffle_masters);
        assert_eq!(settings.masters.len(), 2);
        assert_eq!(settings.masters[1].username.as_deref(), Some("override"));
        assert_eq!(settings.slaves[0].dsn, "mysql:host=replica1");
        assert_eq!(settings.slave_defaults.username.as_deref(), Some("reader"));
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.dsn.is_none());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(matches!(result, Err(DbError::Configuration(_))));
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{
            "dsn": "pgsql:host=localhost",
            "enable_schema_cache": true,
            "schema_cache_exclude": ["audit_log"]
        }"#;

        let settings = from_json_str(json).unwrap();
        assert!(settings.enable_schema_cache);
        assert_eq!(settings.schema_cache_exclude, vec!["audit_log".to_string()]);
        assert_eq!(settings.schema_cache_duration, 3600);
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{invalid json").is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = std::env::temp_dir().join("dbkit_test_toml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("db.toml");
        std::fs::write(&path, "dsn = \"sqlite:/tmp/app.db\"\nenable_slaves = false\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.dsn.as_deref(), Some("sqlite:/tmp/app.db"));
        assert!(!settings.enable_slaves);

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_from_toml_file_missing() {
        assert!(from_toml_file("/nonexistent/path/db.toml").is_err());
    }

    #[test]
    fn test_from_json_file_missing() {
        assert!(from_json_file("/nonexistent/path/db.json").is_err());
    }

    // ── Overrides ───────────────────────────────────────────────────

    #[test]
    fn test_apply_overrides() {
        let vars = HashMap::from([
            ("DBKIT_DSN", "mysql:host=override"),
            ("DBKIT_TABLE_PREFIX", "pre_"),
            ("DBKIT_ENABLE_SLAVES", "0"),
            ("DBKIT_SERVER_RETRY_INTERVAL", "30"),
            ("DBKIT_DEBUG", "yes"),
        ]);
        let mut settings = ConnectionSettings::default();
        apply_overrides(&mut settings, |key| vars.get(key).map(ToString::to_string));

        assert_eq!(settings.dsn.as_deref(), Some("mysql:host=override"));
        assert_eq!(settings.table_prefix, "pre_");
        assert!(!settings.enable_slaves);
        assert_eq!(settings.server_retry_interval, 30);
        assert!(settings.debug);
    }

    #[test]
    fn test_apply_overrides_ignores_bad_interval() {
        let mut settings = ConnectionSettings::default();
        apply_overrides(&mut settings, |key| {
            (key == "DBKIT_SERVER_RETRY_INTERVAL").then(|| "soon".to_string())
        });
        assert_eq!(settings.server_retry_interval, 600);
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn test_merge_json_deep() {
        let base = serde_json::json!({"a": 1, "b": {"c": 2, "d": 3}});
        let over = serde_json::json!({"b": {"c": 20}, "e": 5});
        let merged = merge_json(base, over);
        assert_eq!(merged, serde_json::json!({"a": 1, "b": {"c": 20, "d": 3}, "e": 5}));
    }
}
