//! Scriptable database clients.
//!
//! [`MockClient`] implements [`DbClient`] without a server. It records every
//! statement it receives, including `BEGIN`, `COMMIT` and `ROLLBACK`, and
//! returns rows or errors queued up by the test. [`MockFactory`] hands out
//! one shared client per DSN, so a test can inspect what each endpoint of a
//! pool received.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbkit_core::DbError;
//! use dbkit_db::{Row, Value};
//! use dbkit_test::MockFactory;
//!
//! let factory = MockFactory::new().failing("db:m1");
//! let replica = factory.client("db:s1");
//! replica.push_rows(vec![Row::from_pairs([("id", Value::Int(1))])]);
//! replica.fail_next(DbError::driver("gone away", None));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use dbkit_core::{DbError, DbResult, EndpointSettings};
use dbkit_db::{ClientFactory, DbClient, Row, Value};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory [`DbClient`] that records statements.
pub struct MockClient {
    dsn: String,
    open: AtomicBool,
    fail_open: AtomicBool,
    native_escaping: AtomicBool,
    savepoints: AtomicBool,
    open_attempts: AtomicUsize,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    rows: Mutex<VecDeque<Vec<Row>>>,
    failures: Mutex<VecDeque<DbError>>,
    endpoint: Mutex<Option<EndpointSettings>>,
}

impl MockClient {
    /// Creates a closed client for `dsn`.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            native_escaping: AtomicBool::new(false),
            savepoints: AtomicBool::new(true),
            open_attempts: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
            rows: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
            endpoint: Mutex::new(None),
        }
    }

    /// The SQL of every recorded statement, in execution order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements)
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// The parameters bound to the `index`-th recorded statement.
    pub fn params(&self, index: usize) -> Option<Vec<Value>> {
        lock(&self.statements).get(index).map(|(_, params)| params.clone())
    }

    /// The number of recorded statements.
    pub fn statement_count(&self) -> usize {
        lock(&self.statements).len()
    }

    /// Forgets recorded statements.
    pub fn clear_statements(&self) {
        lock(&self.statements).clear();
    }

    /// Queues the result of the next `query` call. Queries with nothing
    /// queued return no rows.
    pub fn push_rows(&self, rows: Vec<Row>) {
        lock(&self.rows).push_back(rows);
    }

    /// Makes the next statement fail with `error`. Failed statements are
    /// not recorded.
    pub fn fail_next(&self, error: DbError) {
        lock(&self.failures).push_back(error);
    }

    /// Scripted failures not yet consumed by a statement.
    pub fn pending_failures(&self) -> usize {
        lock(&self.failures).len()
    }

    /// Makes every `open` call fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Switches native literal escaping on. Escaped values render as
    /// `N'value'`.
    pub fn set_native_escaping(&self, enabled: bool) {
        self.native_escaping.store(enabled, Ordering::SeqCst);
    }

    /// Sets whether the client reports savepoint support.
    pub fn set_supports_savepoint(&self, supported: bool) {
        self.savepoints.store(supported, Ordering::SeqCst);
    }

    /// How many times `open` was called, successful or not.
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// The merged endpoint settings this client was last created with.
    pub fn endpoint(&self) -> Option<EndpointSettings> {
        lock(&self.endpoint).clone()
    }

    fn record(&self, sql: &str, params: &[Value]) -> DbResult<()> {
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        lock(&self.statements).push((sql.to_string(), params.to_vec()));
        Ok(())
    }
}

impl std::fmt::Debug for MockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClient")
            .field("dsn", &self.dsn)
            .field("open", &self.is_open())
            .field("statements", &self.statement_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DbClient for MockClient {
    fn dsn(&self) -> &str {
        &self.dsn
    }

    async fn open(&self) -> DbResult<()> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DbError::connection_failed(&self.dsn, "connection refused"));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.record(sql, params)?;
        Ok(1)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.record(sql, params)?;
        Ok(lock(&self.rows).pop_front().unwrap_or_default())
    }

    async fn begin(&self) -> DbResult<()> {
        self.record("BEGIN", &[])
    }

    async fn commit(&self) -> DbResult<()> {
        self.record("COMMIT", &[])
    }

    async fn rollback(&self) -> DbResult<()> {
        self.record("ROLLBACK", &[])
    }

    fn escape_literal(&self, value: &str) -> Option<String> {
        self.native_escaping
            .load(Ordering::SeqCst)
            .then(|| format!("N'{value}'"))
    }

    fn supports_savepoint(&self) -> bool {
        self.savepoints.load(Ordering::SeqCst)
    }
}

/// A [`ClientFactory`] that hands out one shared [`MockClient`] per DSN.
///
/// Clones share the same clients, so a test keeps one handle and passes
/// [`as_factory`](Self::as_factory) to the connection under test.
#[derive(Clone, Default)]
pub struct MockFactory {
    clients: Arc<Mutex<HashMap<String, Arc<MockClient>>>>,
    created: Arc<Mutex<Vec<String>>>,
}

impl MockFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` fail for the client of `dsn`.
    #[must_use]
    pub fn failing(self, dsn: &str) -> Self {
        self.client(dsn).set_fail_open(true);
        self
    }

    /// The client for `dsn`, created on first use.
    pub fn client(&self, dsn: &str) -> Arc<MockClient> {
        Arc::clone(
            lock(&self.clients)
                .entry(dsn.to_string())
                .or_insert_with(|| Arc::new(MockClient::new(dsn))),
        )
    }

    /// DSNs passed to `create`, in call order.
    pub fn created(&self) -> Vec<String> {
        lock(&self.created).clone()
    }

    /// DSNs whose clients are currently open, sorted.
    pub fn open_dsns(&self) -> Vec<String> {
        let mut open: Vec<String> = lock(&self.clients)
            .values()
            .filter(|client| client.is_open())
            .map(|client| client.dsn.clone())
            .collect();
        open.sort();
        open
    }

    /// Total statements recorded across every client.
    pub fn total_statements(&self) -> usize {
        lock(&self.clients)
            .values()
            .map(|client| client.statement_count())
            .sum()
    }

    /// Forgets the statements of every client.
    pub fn clear_statements(&self) {
        for client in lock(&self.clients).values() {
            client.clear_statements();
        }
    }

    /// This factory as a trait object for [`dbkit_db::Connection::builder`].
    pub fn as_factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(self.clone())
    }
}

impl ClientFactory for MockFactory {
    fn create(&self, endpoint: &EndpointSettings) -> DbResult<Arc<dyn DbClient>> {
        tracing::trace!(dsn = %endpoint.dsn, "Creating mock client");
        lock(&self.created).push(endpoint.dsn.clone());
        let client = self.client(&endpoint.dsn);
        *lock(&client.endpoint) = Some(endpoint.clone());
        Ok(client)
    }
}
