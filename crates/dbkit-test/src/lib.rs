//! # dbkit-test
//!
//! Test doubles for code built on dbkit. No database server is needed:
//!
//! - [`mock_client`] - [`MockClient`], a scriptable client that records every
//!   statement, and [`MockFactory`], which hands out one client per DSN and
//!   can make chosen endpoints fail to open
//! - [`mock_loader`] - [`InMemoryLoader`], a schema loader serving
//!   [`TableSchema`](dbkit_db::TableSchema)s registered up front, with load
//!   counters
//! - [`assert_statements`] - Assertions on the statements a block runs
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbkit_core::ConnectionSettings;
//! use dbkit_db::Connection;
//! use dbkit_test::MockFactory;
//!
//! async fn example() {
//!     let factory = MockFactory::new();
//!     let db = Connection::builder(ConnectionSettings::with_dsn("db:master"), factory.as_factory())
//!         .build()
//!         .unwrap();
//!     db.execute("DELETE FROM {{post}}", &[]).await.unwrap();
//!     assert_eq!(factory.client("db:master").statements(), vec!["DELETE FROM \"post\""]);
//! }
//! ```

pub mod assert_statements;
pub mod mock_client;
pub mod mock_loader;

pub use assert_statements::{assert_num_statements, assert_statements_eq};
pub use mock_client::{MockClient, MockFactory};
pub use mock_loader::InMemoryLoader;
