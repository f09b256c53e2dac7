//! The underlying database client seam.
//!
//! dbkit never speaks a wire protocol itself. Each endpoint of a pool is
//! served by a [`DbClient`] created on demand by a [`ClientFactory`]; the
//! connection manager only opens, probes and dispatches statements to it.

use std::sync::Arc;

use async_trait::async_trait;

use dbkit_core::{DbResult, EndpointSettings};

use crate::value::{Row, Value};

/// Minimal async client for one database endpoint.
///
/// Implementations use interior mutability: a client is shared behind an
/// `Arc` by the connection that bound it. Failures should be reported as
/// [`DbError::Driver`](dbkit_core::DbError::Driver) (with the SQLSTATE when
/// known) so the connection can classify them, or as
/// [`DbError::ConnectionFailed`](dbkit_core::DbError::ConnectionFailed) from
/// [`open`](Self::open).
#[async_trait]
pub trait DbClient: Send + Sync {
    /// Returns the data source name. Used as the dead-server key component.
    fn dsn(&self) -> &str;

    /// Opens the endpoint. Opening an open client is a no-op.
    async fn open(&self) -> DbResult<()>;

    /// Closes the endpoint.
    async fn close(&self) -> DbResult<()>;

    /// Whether the endpoint is currently open.
    fn is_open(&self) -> bool;

    /// Runs a statement that does not return rows and returns the number of
    /// rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64>;

    /// Runs a query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>>;

    /// Starts a transaction.
    async fn begin(&self) -> DbResult<()>;

    /// Commits the current transaction.
    async fn commit(&self) -> DbResult<()>;

    /// Rolls back the current transaction.
    async fn rollback(&self) -> DbResult<()>;

    /// Escapes a string literal using the engine's native routine, quotes
    /// included. Returns `None` when the engine has no such routine.
    fn escape_literal(&self, value: &str) -> Option<String>;

    /// Whether the engine supports `SAVEPOINT` statements.
    fn supports_savepoint(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for dyn DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient").field("dsn", &self.dsn()).finish_non_exhaustive()
    }
}

/// Creates clients for pool candidates.
///
/// The endpoint passed in already has the pool's shared defaults merged in.
/// Creating a client must not touch the network; the connection opens it
/// right afterwards.
pub trait ClientFactory: Send + Sync {
    /// Creates an unopened client for the endpoint.
    fn create(&self, endpoint: &EndpointSettings) -> DbResult<Arc<dyn DbClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&EndpointSettings) -> DbResult<Arc<dyn DbClient>> + Send + Sync,
{
    fn create(&self, endpoint: &EndpointSettings) -> DbResult<Arc<dyn DbClient>> {
        self(endpoint)
    }
}
