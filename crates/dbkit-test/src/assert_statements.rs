//! Statement assertions for database tests.
//!
//! [`assert_num_statements`] counts the statements a [`MockClient`] receives
//! while an async closure runs. It is the tool for proving that a cache hit
//! never reached the database, or that a nested transaction issued exactly
//! one savepoint.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbkit_core::ConnectionSettings;
//! use dbkit_db::Connection;
//! use dbkit_test::{assert_num_statements, MockFactory};
//!
//! async fn example() {
//!     let factory = MockFactory::new();
//!     let db = Connection::builder(ConnectionSettings::with_dsn("db:m"), factory.as_factory())
//!         .build()
//!         .unwrap();
//!
//!     assert_num_statements(&factory.client("db:m"), 1, || async {
//!         db.execute("DELETE FROM t", &[]).await.unwrap();
//!     })
//!     .await;
//! }
//! ```

use std::future::Future;

use crate::mock_client::MockClient;

/// Asserts that exactly `expected_count` statements reach `client` during
/// the async closure.
///
/// Statements recorded earlier are forgotten first.
///
/// # Panics
///
/// Panics if the number of statements does not match `expected_count`.
pub async fn assert_num_statements<F, Fut>(client: &MockClient, expected_count: usize, f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    client.clear_statements();
    f().await;
    let actual = client.statement_count();
    assert_eq!(
        actual, expected_count,
        "Expected {expected_count} statements, but {actual} were executed: {:?}",
        client.statements()
    );
}

/// Asserts that `client` received exactly `expected`, in order, during the
/// async closure.
///
/// # Panics
///
/// Panics if the recorded statements differ from `expected`.
pub async fn assert_statements_eq<F, Fut>(client: &MockClient, expected: &[&str], f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    client.clear_statements();
    f().await;
    let actual = client.statements();
    assert_eq!(actual, expected, "Unexpected statements");
}
