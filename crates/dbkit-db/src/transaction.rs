//! Transactions.
//!
//! A [`Transaction`] is created by [`Connection::begin_transaction`] and
//! shared by every nested `begin` on that connection until its level drops
//! back to 0. Levels above 1 map to savepoints named `LEVEL1`, `LEVEL2`, ...
//! when savepoints are enabled and supported by the engine.
//!
//! A transaction only holds a weak reference to its connection; using it
//! after the connection is gone is an error.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dbkit_core::{DbError, DbResult};

use crate::connection::{Connection, ConnectionInner};

static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Transaction isolation levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// READ UNCOMMITTED - allows dirty reads.
    ReadUncommitted,
    /// READ COMMITTED - prevents dirty reads.
    ReadCommitted,
    /// REPEATABLE READ - prevents non-repeatable reads.
    RepeatableRead,
    /// SERIALIZABLE - strictest isolation level.
    Serializable,
    /// A database-specific level, emitted verbatim.
    Custom(String),
}

impl IsolationLevel {
    /// Returns the SQL name of this level.
    pub fn as_sql(&self) -> &str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Custom(level) => level,
        }
    }

    /// Returns the statement that applies this level.
    pub fn set_sql(&self) -> String {
        format!("SET TRANSACTION ISOLATION LEVEL {}", self.as_sql())
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

struct TransactionInner {
    id: u64,
    db: Weak<ConnectionInner>,
    level: AtomicU32,
    isolation: Mutex<Option<IsolationLevel>>,
}

/// A transaction and its nesting level. Clones refer to the same
/// transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("level", &self.level())
            .field("isolation", &self.isolation_level())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(db: Weak<ConnectionInner>) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: TRANSACTION_COUNTER.fetch_add(1, Ordering::Relaxed),
                db,
                level: AtomicU32::new(0),
                isolation: Mutex::new(None),
            }),
        }
    }

    fn connection(&self) -> DbResult<Connection> {
        self.inner
            .db
            .upgrade()
            .map(Connection::from_inner)
            .ok_or_else(|| DbError::transaction("The connection of this transaction has been dropped."))
    }

    /// Current nesting level. 0 means no transaction is in progress.
    pub fn level(&self) -> u32 {
        self.inner.level.load(Ordering::SeqCst)
    }

    /// The isolation level requested by the outermost `begin`, or set later
    /// with [`set_isolation_level`](Self::set_isolation_level).
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.inner
            .isolation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_isolation(&self, level: Option<IsolationLevel>) {
        *self
            .inner
            .isolation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = level;
    }

    /// Whether the transaction is in progress on a live, active connection.
    pub fn is_active(&self) -> bool {
        self.level() > 0
            && self
                .inner
                .db
                .upgrade()
                .is_some_and(|inner| Connection::from_inner(inner).is_active())
    }

    /// Begins the transaction, or a nested level of it.
    ///
    /// At level 0 the isolation level, if any, is applied before the
    /// transaction starts; it is ignored for nested levels. A nested level
    /// creates a savepoint when savepoints are available and otherwise
    /// joins the enclosing transaction.
    pub async fn begin(&self, isolation: Option<IsolationLevel>) -> DbResult<()> {
        let db = self.connection()?;
        db.open().await?;
        let client = db.master_client().await?;
        let level = self.level();

        if level == 0 {
            if let Some(isolation) = &isolation {
                let sql = isolation.set_sql();
                client.execute(&sql, &[]).await.map_err(|e| e.with_sql(&sql))?;
            }
            tracing::debug!(isolation = ?isolation, "Begin transaction");
            client.begin().await?;
            self.remember_isolation(isolation);
            self.inner.level.store(1, Ordering::SeqCst);
            return Ok(());
        }

        if db.savepoints_enabled(client.as_ref()) {
            tracing::debug!(level, "Set savepoint");
            let sql = format!("SAVEPOINT LEVEL{level}");
            client.execute(&sql, &[]).await.map_err(|e| e.with_sql(&sql))?;
        } else {
            tracing::info!(level, "Nested transaction not supported: joining the enclosing transaction");
        }
        self.inner.level.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Commits the transaction, or releases the savepoint of the current
    /// nested level.
    pub async fn commit(&self) -> DbResult<()> {
        if !self.is_active() {
            return Err(DbError::transaction(
                "Failed to commit transaction: transaction was inactive.",
            ));
        }
        let db = self.connection()?;
        let client = db.master_client().await?;
        let level = self.inner.level.fetch_sub(1, Ordering::SeqCst) - 1;

        if level == 0 {
            tracing::debug!("Commit transaction");
            return client.commit().await;
        }

        if db.savepoints_enabled(client.as_ref()) {
            tracing::debug!(level, "Release savepoint");
            let sql = format!("RELEASE SAVEPOINT LEVEL{level}");
            client.execute(&sql, &[]).await.map_err(|e| e.with_sql(&sql))?;
        } else {
            tracing::info!(level, "Transaction not committed: nested transaction not supported");
        }
        Ok(())
    }

    /// Rolls back the transaction, or to the savepoint of the current nested
    /// level. Rolling back an inactive transaction does nothing.
    ///
    /// Without savepoints a nested level cannot be rolled back on its own:
    /// the level is still left and [`DbError::NotSupported`] is returned.
    pub async fn rollback(&self) -> DbResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        let db = self.connection()?;
        let client = db.master_client().await?;
        let level = self.inner.level.fetch_sub(1, Ordering::SeqCst) - 1;

        if level == 0 {
            tracing::debug!("Roll back transaction");
            return client.rollback().await;
        }

        if db.savepoints_enabled(client.as_ref()) {
            tracing::debug!(level, "Roll back to savepoint");
            let sql = format!("ROLLBACK TO SAVEPOINT LEVEL{level}");
            client.execute(&sql, &[]).await.map_err(|e| e.with_sql(&sql))?;
            Ok(())
        } else {
            tracing::info!(level, "Transaction not rolled back: nested transaction not supported");
            Err(DbError::not_supported(
                "Roll back failed: nested transaction not supported.",
            ))
        }
    }

    /// Changes the isolation level of the active transaction.
    pub async fn set_isolation_level(&self, isolation: IsolationLevel) -> DbResult<()> {
        if !self.is_active() {
            return Err(DbError::transaction(
                "Failed to set isolation level: transaction was inactive.",
            ));
        }
        let db = self.connection()?;
        let client = db.master_client().await?;
        tracing::debug!(isolation = %isolation, "Setting transaction isolation level");
        let sql = isolation.set_sql();
        client.execute(&sql, &[]).await.map_err(|e| e.with_sql(&sql))?;
        self.remember_isolation(Some(isolation));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connection, MockFactory};
    use dbkit_core::ConnectionSettings;

    fn settings() -> ConnectionSettings {
        ConnectionSettings::with_dsn("db:master")
    }

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(
            IsolationLevel::Serializable.set_sql(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
        assert_eq!(
            IsolationLevel::Custom("SNAPSHOT".into()).set_sql(),
            "SET TRANSACTION ISOLATION LEVEL SNAPSHOT"
        );
    }

    #[tokio::test]
    async fn test_begin_commit() {
        let factory = MockFactory::new();
        let db = connection(settings(), &factory);

        let txn = db.begin_transaction(Some(IsolationLevel::RepeatableRead)).await.unwrap();
        assert_eq!(txn.level(), 1);
        assert!(txn.is_active());
        assert_eq!(txn.isolation_level(), Some(IsolationLevel::RepeatableRead));
        txn.commit().await.unwrap();
        assert_eq!(txn.level(), 0);
        assert!(!txn.is_active());

        assert_eq!(
            factory.client("db:master").statements(),
            vec![
                "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
                "BEGIN",
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_savepoints() {
        let factory = MockFactory::new();
        let db = connection(settings(), &factory);

        let outer = db.begin_transaction(None).await.unwrap();
        let inner = db.begin_transaction(None).await.unwrap();
        assert_eq!(outer, inner);
        assert_eq!(inner.level(), 2);

        inner.rollback().await.unwrap();
        let again = db.begin_transaction(None).await.unwrap();
        again.commit().await.unwrap();
        outer.commit().await.unwrap();

        assert_eq!(
            factory.client("db:master").statements(),
            vec![
                "BEGIN",
                "SAVEPOINT LEVEL1",
                "ROLLBACK TO SAVEPOINT LEVEL1",
                "SAVEPOINT LEVEL1",
                "RELEASE SAVEPOINT LEVEL1",
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_without_savepoints() {
        let factory = MockFactory::new();
        let db = connection(
            ConnectionSettings {
                enable_savepoint: false,
                ..settings()
            },
            &factory,
        );

        let txn = db.begin_transaction(None).await.unwrap();
        db.begin_transaction(None).await.unwrap();
        assert_eq!(txn.level(), 2);

        db.begin_transaction(None).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(txn.level(), 2);

        let err = txn.rollback().await.unwrap_err();
        assert!(err.is_not_supported());
        assert_eq!(txn.level(), 1);

        txn.rollback().await.unwrap();
        assert_eq!(factory.client("db:master").statements(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_commit_inactive_fails_rollback_inactive_is_noop() {
        let factory = MockFactory::new();
        let db = connection(settings(), &factory);
        let txn = db.begin_transaction(None).await.unwrap();
        txn.commit().await.unwrap();

        let err = txn.commit().await.unwrap_err();
        assert!(err.to_string().contains("transaction was inactive"));
        tokio_test::assert_ok!(txn.rollback().await);
        tokio_test::assert_err!(txn.set_isolation_level(IsolationLevel::Serializable).await);
    }

    #[tokio::test]
    async fn test_set_isolation_level_on_active() {
        let factory = MockFactory::new();
        let db = connection(settings(), &factory);
        let txn = db.begin_transaction(None).await.unwrap();
        txn.set_isolation_level(IsolationLevel::Custom("SNAPSHOT".into()))
            .await
            .unwrap();
        assert_eq!(
            txn.isolation_level(),
            Some(IsolationLevel::Custom("SNAPSHOT".into()))
        );
        assert_eq!(
            factory.client("db:master").statements().last().map(String::as_str),
            Some("SET TRANSACTION ISOLATION LEVEL SNAPSHOT")
        );
    }

    #[tokio::test]
    async fn test_transaction_outliving_connection() {
        let factory = MockFactory::new();
        let db = connection(settings(), &factory);
        let txn = db.begin_transaction(None).await.unwrap();
        drop(db);

        assert!(!txn.is_active());
        assert!(txn.commit().await.is_err());
        assert!(matches!(
            txn.begin(None).await.unwrap_err(),
            DbError::Transaction(_)
        ));
    }
}
