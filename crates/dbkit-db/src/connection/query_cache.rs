//! Query result caching scopes.
//!
//! [`Connection::cache`](super::Connection::cache) and
//! [`Connection::no_cache`](super::Connection::no_cache) push a
//! [`CacheScope`] for the duration of a closure. Only the innermost scope is
//! consulted when a query runs. The push returns a [`ScopeGuard`] that pops
//! the scope when dropped, so the stack is restored on every exit path,
//! including errors, panics and cancelled futures.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::value::Value;

/// One entry of the scope stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheScope {
    /// Query results are cached.
    Enabled {
        /// Lifetime of cached results. `None` means no expiry.
        duration: Option<Duration>,
        /// Tag the results are stored under.
        dependency: Option<String>,
    },
    /// Query results are not cached, whatever the outer scopes say.
    Disabled,
}

impl CacheScope {
    /// Creates an enabled scope. A zero duration means no expiry.
    pub fn enabled(duration: Duration, dependency: Option<&str>) -> Self {
        Self::Enabled {
            duration: (!duration.is_zero()).then_some(duration),
            dependency: dependency.map(ToString::to_string),
        }
    }
}

/// Where and how long a query result is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCacheInfo {
    /// Lifetime of the result. `None` means no expiry.
    pub duration: Option<Duration>,
    /// Tag the result is stored under.
    pub dependency: Option<String>,
}

/// LIFO stack of cache scopes.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Mutex<Vec<CacheScope>>,
}

impl ScopeStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CacheScope>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes a scope. It stays current until the guard is dropped.
    #[must_use = "the scope is popped as soon as the guard is dropped"]
    pub fn push(&self, scope: CacheScope) -> ScopeGuard<'_> {
        let mut scopes = self.lock();
        let depth = scopes.len();
        scopes.push(scope);
        ScopeGuard { stack: self, depth }
    }

    /// The innermost scope.
    pub fn current(&self) -> Option<CacheScope> {
        self.lock().last().cloned()
    }

    /// Number of scopes on the stack.
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    /// Removes every scope.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Pops its scope, and anything pushed after it, when dropped.
#[derive(Debug)]
pub struct ScopeGuard<'a> {
    stack: &'a ScopeStack,
    depth: usize,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.stack.lock().truncate(self.depth);
    }
}

#[derive(Serialize)]
struct KeyParts<'a> {
    dsn: &'a str,
    username: &'a str,
    sql: &'a str,
    params: &'a [Value],
}

/// Cache key of a query result: a SHA-256 over the endpoint identity, the
/// final SQL text and the bound parameters.
pub fn query_cache_key(dsn: &str, username: &str, sql: &str, params: &[Value]) -> String {
    let parts = KeyParts {
        dsn,
        username,
        sql,
        params,
    };
    let encoded = serde_json::to_vec(&parts).unwrap_or_else(|_| sql.as_bytes().to_vec());
    let digest = Sha256::digest(&encoded);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("dbkit.query::{hex}")
}
