//! # dbkit
//!
//! A database access layer: one logical connection over a master pool and
//! read replicas, nested transactions with savepoints, query result caching,
//! table metadata with a shared cache, and SQL identifier quoting.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `dbkit` to get everything, or depend on individual crates
//! for finer-grained control.

/// Settings, error types and logging setup.
pub use dbkit_core as core;

/// Cache backends: in-memory, filesystem and dummy.
#[cfg(feature = "cache")]
pub use dbkit_cache as cache;

/// Connections, transactions, schema metadata and quoting.
#[cfg(feature = "db")]
pub use dbkit_db as db;

/// Mock clients, an in-memory schema loader and statement assertions.
#[cfg(feature = "testing")]
pub use dbkit_test as test;

pub use dbkit_core::{ConnectionSettings, DbError, DbResult};

#[cfg(feature = "db")]
pub use dbkit_db::{Connection, ConnectionBuilder, IsolationLevel, Transaction, Value};

// Third-party re-exports
pub use async_trait;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use tracing_subscriber;
