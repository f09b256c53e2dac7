//! The connection manager.
//!
//! A [`Connection`] is one logical database handle made of a master pool and
//! an optional slave pool. Endpoints are resolved lazily and stay bound until
//! [`Connection::close`]. The connection routes statements (reads to a
//! slave, writes and anything inside a transaction to the master), owns the
//! current [`Transaction`], the query cache scope stack and the
//! [`SchemaRegistry`].
//!
//! `Connection` is a cheap handle: clones share the same state. Callbacks
//! passed to [`transaction`](Connection::transaction),
//! [`cache`](Connection::cache) and friends receive such a clone.

pub mod builder;
pub mod pool;
pub mod query_cache;

pub use builder::ConnectionBuilder;
pub use pool::dead_server_key;
pub use query_cache::{query_cache_key, CacheScope, QueryCacheInfo, ScopeGuard, ScopeStack};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::Instrument;

use dbkit_cache::{CacheBackend, CacheValue};
use dbkit_core::{ConnectionSettings, DbError, DbResult};

use crate::client::{ClientFactory, DbClient};
use crate::quoting::{is_read_query, Quoter};
use crate::schema::{Schema, SchemaRegistry};
use crate::transaction::{IsolationLevel, Transaction};
use crate::value::{Row, Value};

use pool::PoolProber;

const NO_MASTER_AVAILABLE: &str = "None of the master DB servers is available.";

#[derive(Clone, Default)]
enum MasterBinding {
    #[default]
    Unresolved,
    Bound(Arc<dyn DbClient>),
    /// Probing found nothing; stays unavailable until `close()`.
    Unavailable,
}

impl MasterBinding {
    fn client(&self) -> Option<Arc<dyn DbClient>> {
        match self {
            Self::Bound(client) => Some(Arc::clone(client)),
            Self::Unresolved | Self::Unavailable => None,
        }
    }
}

#[derive(Clone, Default)]
enum SlaveBinding {
    #[default]
    Unresolved,
    Bound(Arc<dyn DbClient>),
    /// Probing found nothing; reads use the master until `close()`.
    Unavailable,
}

#[derive(Default)]
struct PoolState {
    master: MasterBinding,
    slave: SlaveBinding,
}

#[derive(Default)]
struct QuoteMemo {
    tables: HashMap<String, String>,
    columns: HashMap<String, String>,
}

pub(crate) struct ConnectionInner {
    settings: ConnectionSettings,
    dsn: String,
    username: String,
    factory: Arc<dyn ClientFactory>,
    quoter: Quoter,
    schema: SchemaRegistry,
    status_cache: Option<Arc<dyn CacheBackend>>,
    query_cache: Option<Arc<dyn CacheBackend>>,
    enable_slaves: AtomicBool,
    pools: Mutex<PoolState>,
    resolving: tokio::sync::Mutex<()>,
    transaction: Mutex<Option<Transaction>>,
    scopes: ScopeStack,
    memo: Mutex<QuoteMemo>,
    span: tracing::Span,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Restores the slave routing flag when dropped.
struct SlaveRoutingGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for SlaveRoutingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

/// A logical database connection with master/slave routing.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dbkit_core::ConnectionSettings;
/// use dbkit_db::client::ClientFactory;
/// use dbkit_db::connection::Connection;
///
/// async fn example(factory: Arc<dyn ClientFactory>) -> dbkit_core::DbResult<()> {
///     let db = Connection::builder(ConnectionSettings::with_dsn("mysql:host=db1"), factory).build()?;
///     db.transaction(None, |db| async move {
///         db.execute("UPDATE {{%post}} SET [[views]] = [[views]] + 1", &[]).await
///     })
///     .await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("dsn", &self.inner.dsn)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Starts building a connection from settings and a client factory.
    pub fn builder(settings: ConnectionSettings, factory: Arc<dyn ClientFactory>) -> ConnectionBuilder {
        ConnectionBuilder::new(settings, factory)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        settings: ConnectionSettings,
        dsn: String,
        username: String,
        factory: Arc<dyn ClientFactory>,
        schema: SchemaRegistry,
        status_cache: Option<Arc<dyn CacheBackend>>,
        query_cache: Option<Arc<dyn CacheBackend>>,
    ) -> Self {
        let quoter = Quoter::new(settings.quote_style, settings.table_prefix.clone());
        let span = dbkit_core::logging::connection_span(&dsn);
        Self {
            inner: Arc::new(ConnectionInner {
                enable_slaves: AtomicBool::new(settings.enable_slaves),
                settings,
                dsn,
                username,
                factory,
                quoter,
                schema,
                status_cache,
                query_cache,
                pools: Mutex::new(PoolState::default()),
                resolving: tokio::sync::Mutex::new(()),
                transaction: Mutex::new(None),
                scopes: ScopeStack::new(),
                memo: Mutex::new(QuoteMemo::default()),
                span,
            }),
        }
    }

    pub(crate) const fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    /// The settings this connection was built from.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// The DSN identifying this connection: the primary DSN, or the first
    /// master's.
    pub fn dsn(&self) -> &str {
        &self.inner.dsn
    }

    /// The user name identifying this connection.
    pub fn username(&self) -> &str {
        &self.inner.username
    }

    /// The quoting engine configured for this connection.
    pub fn quoter(&self) -> &Quoter {
        &self.inner.quoter
    }

    pub(crate) fn schema_registry(&self) -> &SchemaRegistry {
        &self.inner.schema
    }

    /// Table metadata access bound to this connection.
    pub const fn schema(&self) -> Schema<'_> {
        Schema::new(self)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Whether a master endpoint is bound.
    pub fn is_active(&self) -> bool {
        matches!(lock(&self.inner.pools).master, MasterBinding::Bound(_))
    }

    /// Binds a master endpoint. Opening an active connection is a no-op.
    pub async fn open(&self) -> DbResult<()> {
        if self.is_active() {
            return Ok(());
        }
        async {
            tracing::debug!("Opening DB connection");
            match self.get_master().await? {
                Some(_) => Ok(()),
                None => Err(DbError::connection_failed(self.dsn(), NO_MASTER_AVAILABLE)),
            }
        }
        .instrument(self.inner.span.clone())
        .await
    }

    /// Closes bound endpoints and forgets every per-session state: the
    /// transaction, cache scopes, quoting memo and in-process metadata.
    pub async fn close(&self) -> DbResult<()> {
        let (master, slave) = {
            let mut pools = lock(&self.inner.pools);
            let master = std::mem::take(&mut pools.master).client();
            let slave = match std::mem::take(&mut pools.slave) {
                SlaveBinding::Bound(client) => Some(client),
                SlaveBinding::Unresolved | SlaveBinding::Unavailable => None,
            };
            (master, slave)
        };
        *lock(&self.inner.transaction) = None;
        self.inner.scopes.clear();
        *lock(&self.inner.memo) = QuoteMemo::default();
        self.inner.schema.clear_local();

        if let Some(master) = master {
            tracing::debug!(dsn = %master.dsn(), "Closing DB connection");
            master.close().await?;
        }
        if let Some(slave) = slave {
            tracing::debug!(dsn = %slave.dsn(), "Closing slave DB connection");
            slave.close().await?;
        }
        Ok(())
    }

    // ── Pools ────────────────────────────────────────────────────────

    fn prober(&self) -> PoolProber<'_> {
        PoolProber {
            factory: self.inner.factory.as_ref(),
            status_cache: self.inner.status_cache.as_deref(),
            retry_interval: self.inner.settings.server_retry_interval,
        }
    }

    /// Returns the bound master, resolving it if needed.
    ///
    /// With a master pool, masters are probed shuffled or in declared order
    /// depending on `shuffle_masters`; `Ok(None)` means the probe found no
    /// available master. That outcome is kept until [`close`](Self::close).
    /// Without a pool the primary DSN is opened directly and its failure is
    /// returned as is, leaving the master unresolved.
    pub async fn get_master(&self) -> DbResult<Option<Arc<dyn DbClient>>> {
        match lock(&self.inner.pools).master.clone() {
            MasterBinding::Bound(client) => return Ok(Some(client)),
            MasterBinding::Unavailable => return Ok(None),
            MasterBinding::Unresolved => {}
        }

        let _resolving = self.inner.resolving.lock().await;
        match lock(&self.inner.pools).master.clone() {
            MasterBinding::Bound(client) => return Ok(Some(client)),
            MasterBinding::Unavailable => return Ok(None),
            MasterBinding::Unresolved => {}
        }

        let settings = &self.inner.settings;
        let master = if settings.masters.is_empty() {
            let endpoint = settings
                .primary_endpoint()
                .ok_or_else(|| DbError::configuration("Connection::dsn cannot be empty."))?
                .merged_with(&settings.master_defaults);
            let client = self.inner.factory.create(&endpoint)?;
            client.open().await?;
            Some(client)
        } else if settings.shuffle_masters {
            self.prober()
                .open_shuffled(&settings.masters, &settings.master_defaults)
                .await?
        } else {
            self.prober()
                .open_in_order(&settings.masters, &settings.master_defaults)
                .await?
        };

        lock(&self.inner.pools).master = master
            .as_ref()
            .map_or(MasterBinding::Unavailable, |client| MasterBinding::Bound(Arc::clone(client)));
        Ok(master)
    }

    /// Returns the bound slave, resolving it once per session.
    ///
    /// When slave routing is disabled or no slave is available, the master
    /// is returned if `fallback_to_master` is set, `None` otherwise.
    pub async fn get_slave(&self, fallback_to_master: bool) -> DbResult<Option<Arc<dyn DbClient>>> {
        let slave = if self.slaves_enabled() {
            self.resolve_slave().await?
        } else {
            None
        };
        match slave {
            Some(client) => Ok(Some(client)),
            None if fallback_to_master => self.get_master().await,
            None => Ok(None),
        }
    }

    async fn resolve_slave(&self) -> DbResult<Option<Arc<dyn DbClient>>> {
        match lock(&self.inner.pools).slave.clone() {
            SlaveBinding::Bound(client) => return Ok(Some(client)),
            SlaveBinding::Unavailable => return Ok(None),
            SlaveBinding::Unresolved => {}
        }

        let _resolving = self.inner.resolving.lock().await;
        match lock(&self.inner.pools).slave.clone() {
            SlaveBinding::Bound(client) => return Ok(Some(client)),
            SlaveBinding::Unavailable => return Ok(None),
            SlaveBinding::Unresolved => {}
        }

        let settings = &self.inner.settings;
        let slave = if settings.slaves.is_empty() {
            None
        } else {
            self.prober()
                .open_shuffled(&settings.slaves, &settings.slave_defaults)
                .await?
        };

        lock(&self.inner.pools).slave = slave
            .as_ref()
            .map_or(SlaveBinding::Unavailable, |client| SlaveBinding::Bound(Arc::clone(client)));
        Ok(slave)
    }

    /// Whether reads are currently routed to slaves.
    pub fn slaves_enabled(&self) -> bool {
        self.inner.enable_slaves.load(Ordering::SeqCst)
    }

    pub(crate) async fn master_client(&self) -> DbResult<Arc<dyn DbClient>> {
        self.get_master()
            .await?
            .ok_or_else(|| DbError::connection_failed(self.dsn(), NO_MASTER_AVAILABLE))
    }

    async fn read_client(&self) -> DbResult<Arc<dyn DbClient>> {
        if self.transaction_handle().is_some() {
            return self.master_client().await;
        }
        match self.get_slave(false).await? {
            Some(client) => Ok(client),
            None => self.master_client().await,
        }
    }

    pub(crate) fn savepoints_enabled(&self, client: &dyn DbClient) -> bool {
        self.inner.settings.enable_savepoint && client.supports_savepoint()
    }

    // ── Statements ───────────────────────────────────────────────────

    /// Runs a statement on the master and returns the affected row count.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let sql = self.quote_sql(sql);
        let client = self.master_client().await?;
        tracing::debug!(sql = %sql, "Executing statement");
        client.execute(&sql, params).await.map_err(|e| e.with_sql(&sql))
    }

    /// Runs a query and returns all rows.
    ///
    /// Reads go to a slave unless a transaction is active. Inside an
    /// enabled [`cache`](Self::cache) scope results are served from and
    /// stored in the query cache.
    pub async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let sql = self.quote_sql(sql);

        let target = match (self.query_cache_info(), &self.inner.query_cache) {
            (Some(info), Some(cache)) => Some((
                Arc::clone(cache),
                info,
                query_cache_key(self.dsn(), self.username(), &sql, params),
            )),
            _ => None,
        };

        if let Some((cache, _, key)) = &target {
            let hit = cache
                .get(key)
                .await?
                .and_then(CacheValue::into_json)
                .and_then(|json| serde_json::from_value::<Vec<Row>>(json).ok());
            if let Some(rows) = hit {
                tracing::debug!(sql = %sql, "Query result served from cache");
                return Ok(rows);
            }
        }

        let client = if is_read_query(&sql) {
            self.read_client().await?
        } else {
            self.master_client().await?
        };
        tracing::debug!(sql = %sql, dsn = %client.dsn(), "Running query");
        let rows = client.query(&sql, params).await.map_err(|e| e.with_sql(&sql))?;

        if let Some((cache, info, key)) = target {
            let json = serde_json::to_value(&rows)?;
            cache
                .set(&key, CacheValue::Json(json), info.duration, info.dependency.as_deref())
                .await?;
        }
        Ok(rows)
    }

    /// Runs a query and returns its first row.
    pub async fn query_one(&self, sql: &str, params: &[Value]) -> DbResult<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Runs a query and returns the first column of its first row.
    pub async fn query_scalar(&self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        Ok(self
            .query_one(sql, params)
            .await?
            .and_then(|row| row.get_index(0).cloned()))
    }

    // ── Transactions ─────────────────────────────────────────────────

    /// Begins a transaction, or a nested level of the active one.
    ///
    /// The active transaction is reused, so two calls without a commit or
    /// rollback in between return the same transaction at level 2.
    pub async fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> DbResult<Transaction> {
        self.open().await?;
        let transaction = match self.transaction_handle() {
            Some(active) => active,
            None => {
                let created = Transaction::new(self.downgrade());
                *lock(&self.inner.transaction) = Some(created.clone());
                created
            }
        };
        transaction.begin(isolation).await?;
        Ok(transaction)
    }

    /// The active transaction, if any.
    pub fn transaction_handle(&self) -> Option<Transaction> {
        let current = lock(&self.inner.transaction).clone();
        current.filter(Transaction::is_active)
    }

    /// Runs `f` inside a transaction.
    ///
    /// The transaction is committed after `f` succeeds, unless `f` already
    /// committed or rolled back its level. When `f` fails the level is
    /// rolled back and the original error is returned; a failing rollback
    /// is logged and swallowed.
    pub async fn transaction<F, Fut, T>(&self, isolation: Option<IsolationLevel>, f: F) -> DbResult<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let transaction = self.begin_transaction(isolation).await?;
        let level = transaction.level();

        match f(self.clone()).await {
            Ok(result) => {
                if transaction.is_active() && transaction.level() == level {
                    if let Err(e) = transaction.commit().await {
                        self.rollback_transaction_on_level(&transaction, level).await;
                        return Err(e);
                    }
                }
                Ok(result)
            }
            Err(e) => {
                self.rollback_transaction_on_level(&transaction, level).await;
                Err(e)
            }
        }
    }

    async fn rollback_transaction_on_level(&self, transaction: &Transaction, level: u32) {
        if transaction.is_active() && transaction.level() == level {
            if let Err(e) = transaction.rollback().await {
                tracing::error!(dsn = %self.dsn(), error = %e, "Failed to roll back transaction");
            }
        }
    }

    // ── Query cache ──────────────────────────────────────────────────

    /// Runs `f` with query caching enabled.
    ///
    /// `duration` defaults to `query_cache_duration`; zero means results
    /// never expire. Results are tagged with `dependency` when given.
    pub async fn cache<F, Fut, T>(
        &self,
        duration: Option<Duration>,
        dependency: Option<&str>,
        f: F,
    ) -> DbResult<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let duration = duration
            .unwrap_or_else(|| Duration::from_secs(self.inner.settings.query_cache_duration));
        let _scope = self
            .inner
            .scopes
            .push(CacheScope::enabled(duration, dependency));
        f(self.clone()).await
    }

    /// Runs `f` with query caching disabled.
    pub async fn no_cache<F, Fut, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let _scope = self.inner.scopes.push(CacheScope::Disabled);
        f(self.clone()).await
    }

    /// How the next query would be cached, or `None` if it would not.
    pub fn query_cache_info(&self) -> Option<QueryCacheInfo> {
        if !self.inner.settings.enable_query_cache {
            return None;
        }
        if !self
            .inner
            .query_cache
            .as_ref()
            .is_some_and(|cache| cache.is_enabled())
        {
            return None;
        }
        match self.inner.scopes.current()? {
            CacheScope::Enabled {
                duration,
                dependency,
            } => Some(QueryCacheInfo {
                duration,
                dependency,
            }),
            CacheScope::Disabled => None,
        }
    }

    /// Invalidates every cached query result stored under `dependency`.
    pub async fn invalidate_query_cache(&self, dependency: &str) -> DbResult<()> {
        match &self.inner.query_cache {
            Some(cache) => cache.invalidate_tag(dependency).await,
            None => Ok(()),
        }
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Runs `f` with every read routed to the master. The previous routing
    /// setting is restored afterwards, whatever `f` returns.
    pub async fn use_master<F, Fut, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let previous = self.inner.enable_slaves.swap(false, Ordering::SeqCst);
        let _restore = SlaveRoutingGuard {
            flag: &self.inner.enable_slaves,
            previous,
        };
        f(self.clone()).await
    }

    // ── Quoting ──────────────────────────────────────────────────────

    /// Quotes a table name. Results are memoized until [`close`](Self::close).
    pub fn quote_table_name(&self, name: &str) -> String {
        let mut memo = lock(&self.inner.memo);
        if let Some(quoted) = memo.tables.get(name) {
            return quoted.clone();
        }
        let quoted = self.inner.quoter.quote_table_name(name);
        memo.tables.insert(name.to_string(), quoted.clone());
        quoted
    }

    /// Quotes a column name. Results are memoized until [`close`](Self::close).
    pub fn quote_column_name(&self, name: &str) -> String {
        let mut memo = lock(&self.inner.memo);
        if let Some(quoted) = memo.columns.get(name) {
            return quoted.clone();
        }
        let quoted = self.inner.quoter.quote_column_name(name);
        memo.columns.insert(name.to_string(), quoted.clone());
        quoted
    }

    /// Resolves `{{table}}` and `[[column]]` placeholders.
    pub fn quote_sql(&self, sql: &str) -> String {
        self.inner.quoter.quote_sql(sql)
    }

    /// Quotes a string value with the client's native escaping, falling
    /// back to generic escaping. Other values are returned unchanged
    /// without touching the database.
    pub async fn quote_value(&self, value: Value) -> DbResult<Value> {
        if !matches!(value, Value::String(_)) {
            return Ok(value);
        }
        let client = self.read_client().await?;
        Ok(self
            .inner
            .quoter
            .quote_value(value, |s| client.escape_literal(s)))
    }
}
