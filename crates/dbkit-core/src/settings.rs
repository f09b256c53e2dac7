//! Connection settings.
//!
//! [`ConnectionSettings`] holds everything needed to build one logical
//! connection: the primary endpoint, the master and slave pools, routing and
//! failover flags, schema and query cache tuning, and logging options.
//! Defaults mirror a conservative single-server setup with read/write
//! splitting enabled as soon as slaves are listed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier quoting characters used by a family of database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStyle {
    /// Standard SQL double quotes (`"name"`). PostgreSQL, SQLite, Oracle.
    #[default]
    Ansi,
    /// Backticks (`` `name` ``). MySQL, MariaDB.
    Mysql,
    /// Square brackets (`[name]`). SQL Server.
    Mssql,
}

impl QuoteStyle {
    /// Returns the (start, end) characters used to quote table names.
    pub const fn table_quotes(self) -> (char, char) {
        match self {
            Self::Ansi => ('"', '"'),
            Self::Mysql => ('`', '`'),
            Self::Mssql => ('[', ']'),
        }
    }

    /// Returns the (start, end) characters used to quote column names.
    pub const fn column_quotes(self) -> (char, char) {
        self.table_quotes()
    }
}

/// One database endpoint in a master or slave pool.
///
/// Fields left as `None` inherit the pool's shared defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// The data source name, e.g. `mysql:host=db1;dbname=app`.
    pub dsn: String,
    /// The user name used to authenticate.
    pub username: Option<String>,
    /// The password used to authenticate.
    pub password: Option<String>,
    /// Whether the driver should emulate prepared statements.
    pub emulate_prepare: Option<bool>,
    /// Driver-specific attributes.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl EndpointSettings {
    /// Creates endpoint settings with only a DSN.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Self::default()
        }
    }

    /// Merges pool-wide defaults into this endpoint. Values already set on
    /// the endpoint win.
    #[must_use]
    pub fn merged_with(&self, defaults: &PoolDefaults) -> Self {
        let mut attributes = defaults.attributes.clone();
        attributes.extend(self.attributes.clone());
        Self {
            dsn: self.dsn.clone(),
            username: self.username.clone().or_else(|| defaults.username.clone()),
            password: self.password.clone().or_else(|| defaults.password.clone()),
            emulate_prepare: self.emulate_prepare.or(defaults.emulate_prepare),
            attributes,
        }
    }
}

/// Settings shared by every endpoint of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDefaults {
    /// Default user name.
    pub username: Option<String>,
    /// Default password.
    pub password: Option<String>,
    /// Default prepared-statement emulation flag.
    pub emulate_prepare: Option<bool>,
    /// Default driver attributes.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// The complete set of settings for one logical connection.
///
/// # Examples
///
/// ```
/// use dbkit_core::settings::ConnectionSettings;
///
/// let settings = ConnectionSettings::default();
/// assert!(settings.enable_slaves);
/// assert_eq!(settings.server_retry_interval, 600);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    // ── Primary endpoint ─────────────────────────────────────────────

    /// DSN of the primary server. Used as the only master when `masters`
    /// is empty.
    pub dsn: Option<String>,
    /// User name for the primary server.
    pub username: Option<String>,
    /// Password for the primary server.
    pub password: Option<String>,
    /// Whether drivers should emulate prepared statements.
    pub emulate_prepare: Option<bool>,

    // ── Quoting ──────────────────────────────────────────────────────

    /// Substituted for `%` inside `{{...}}` table placeholders.
    pub table_prefix: String,
    /// Identifier quote characters.
    pub quote_style: QuoteStyle,

    // ── Pools ────────────────────────────────────────────────────────

    /// Master endpoints, probed in declared or shuffled order.
    pub masters: Vec<EndpointSettings>,
    /// Settings merged into every master endpoint.
    pub master_defaults: PoolDefaults,
    /// Read replica endpoints.
    pub slaves: Vec<EndpointSettings>,
    /// Settings merged into every slave endpoint.
    pub slave_defaults: PoolDefaults,
    /// Whether reads are routed to slaves.
    pub enable_slaves: bool,
    /// Whether masters are shuffled before probing.
    pub shuffle_masters: bool,
    /// Seconds a failed endpoint is skipped before being retried.
    pub server_retry_interval: u64,

    // ── Transactions ─────────────────────────────────────────────────

    /// Whether nested transactions use savepoints.
    pub enable_savepoint: bool,

    // ── Schema cache ─────────────────────────────────────────────────

    /// Whether table metadata is persisted to the cache service.
    pub enable_schema_cache: bool,
    /// Lifetime of cached metadata in seconds. 0 means no expiry.
    pub schema_cache_duration: u64,
    /// Raw table names whose metadata is never cached.
    pub schema_cache_exclude: Vec<String>,

    // ── Query cache ──────────────────────────────────────────────────

    /// Master switch for query result caching.
    pub enable_query_cache: bool,
    /// Default lifetime of cached query results in seconds. 0 means no expiry.
    pub query_cache_duration: u64,

    // ── Logging ──────────────────────────────────────────────────────

    /// Tracing filter directive (e.g. "info", "dbkit_db=debug").
    pub log_level: String,
    /// Human-readable log output instead of JSON.
    pub debug: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            dsn: None,
            username: None,
            password: None,
            emulate_prepare: None,
            table_prefix: String::new(),
            quote_style: QuoteStyle::default(),
            masters: Vec::new(),
            master_defaults: PoolDefaults::default(),
            slaves: Vec::new(),
            slave_defaults: PoolDefaults::default(),
            enable_slaves: true,
            shuffle_masters: true,
            server_retry_interval: 600,
            enable_savepoint: true,
            enable_schema_cache: false,
            schema_cache_duration: 3600,
            schema_cache_exclude: Vec::new(),
            enable_query_cache: true,
            query_cache_duration: 3600,
            log_level: "info".to_string(),
            debug: false,
        }
    }
}

impl ConnectionSettings {
    /// Creates settings for a single server.
    pub fn with_dsn(dsn: impl Into<String>) -> Self {
        Self {
            dsn: Some(dsn.into()),
            ..Self::default()
        }
    }

    /// Returns the primary endpoint described by `dsn`/`username`/`password`.
    pub fn primary_endpoint(&self) -> Option<EndpointSettings> {
        self.dsn.as_ref().map(|dsn| EndpointSettings {
            dsn: dsn.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            emulate_prepare: self.emulate_prepare,
            attributes: HashMap::new(),
        })
    }
}
