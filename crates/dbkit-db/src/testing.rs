//! In-crate test doubles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use dbkit_core::{ConnectionSettings, DbError, DbResult, EndpointSettings};

use crate::client::{ClientFactory, DbClient};
use crate::connection::Connection;
use crate::value::{Row, Value};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records statements and returns scripted rows.
pub struct MockClient {
    dsn: String,
    open: AtomicBool,
    fail_open: AtomicBool,
    native_escaping: AtomicBool,
    statements: Mutex<Vec<String>>,
    rows: Mutex<VecDeque<Vec<Row>>>,
    failures: Mutex<VecDeque<DbError>>,
}

impl MockClient {
    pub fn new(dsn: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            native_escaping: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
            rows: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        lock(&self.rows).push_back(rows);
    }

    pub fn fail_next(&self, error: DbError) {
        lock(&self.failures).push_back(error);
    }

    pub fn set_native_escaping(&self, enabled: bool) {
        self.native_escaping.store(enabled, Ordering::SeqCst);
    }

    fn record(&self, sql: &str) -> DbResult<()> {
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        lock(&self.statements).push(sql.to_string());
        Ok(())
    }
}

#[async_trait]
impl DbClient for MockClient {
    fn dsn(&self) -> &str {
        &self.dsn
    }

    async fn open(&self) -> DbResult<()> {
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

    async fn execute(&self, sql: &str, _params: &[Value]) -> DbResult<u64> {
        self.record(sql)?;
        Ok(1)
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> DbResult<Vec<Row>> {
        self.record(sql)?;
        Ok(lock(&self.rows).pop_front().unwrap_or_default())
    }

    async fn begin(&self) -> DbResult<()> {
        self.record("BEGIN")
    }

    async fn commit(&self) -> DbResult<()> {
        self.record("COMMIT")
    }

    async fn rollback(&self) -> DbResult<()> {
        self.record("ROLLBACK")
    }

    fn escape_literal(&self, value: &str) -> Option<String> {
        self.native_escaping
            .load(Ordering::SeqCst)
            .then(|| format!("N'{value}'"))
    }
}

/// Hands out one shared [`MockClient`] per DSN.
#[derive(Clone, Default)]
pub struct MockFactory {
    clients: Arc<Mutex<HashMap<String, Arc<MockClient>>>>,
    created: Arc<Mutex<Vec<String>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` fail for the given DSN.
    pub fn failing(self, dsn: &str) -> Self {
        self.client(dsn).fail_open.store(true, Ordering::SeqCst);
        self
    }

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

    pub fn as_factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(self.clone())
    }
}

impl ClientFactory for MockFactory {
    fn create(&self, endpoint: &EndpointSettings) -> DbResult<Arc<dyn DbClient>> {
        lock(&self.created).push(endpoint.dsn.clone());
        Ok(self.client(&endpoint.dsn))
    }
}

pub fn connection(settings: ConnectionSettings, factory: &MockFactory) -> Connection {
    Connection::builder(settings, factory.as_factory())
        .build()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poisoned_lock_still_records() {
        let client = Arc::new(MockClient::new("db:m"));
        let poisoner = Arc::clone(&client);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.statements.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(client.statements.is_poisoned());

        client.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(client.statements(), vec!["SELECT 1"]);
    }
}
