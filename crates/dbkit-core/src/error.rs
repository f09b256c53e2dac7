//! Core error types for dbkit.
//!
//! [`DbError`] covers every failure the data-access layer can surface:
//! missing engine capabilities, unreachable servers, constraint violations,
//! generic statement failures, invalid transaction state, configuration and
//! cache problems.

use thiserror::Error;

/// SQLSTATE class reserved for integrity constraint violations.
pub const INTEGRITY_SQLSTATE_CLASS: &str = "23";

/// Message prefix drivers use when reporting an integrity constraint violation.
pub const INTEGRITY_MESSAGE_MARKER: &str = "SQLSTATE[23";

/// The primary error type for dbkit.
///
/// Connectivity and execution failures are always propagated to the caller.
/// The only place an error is swallowed is the rollback performed while a
/// failed unit of work unwinds (see `Connection::transaction`).
#[derive(Error, Debug)]
pub enum DbError {
    // ── Capability ───────────────────────────────────────────────────

    /// The database engine lacks a feature. Never retried.
    #[error("Not supported: {0}")]
    NotSupported(String),

    // ── Connectivity ─────────────────────────────────────────────────

    /// An endpoint could not be opened.
    #[error("Connection failed ({dsn}): {message}")]
    ConnectionFailed { dsn: String, message: String },

    // ── Execution ────────────────────────────────────────────────────

    /// A statement violated an integrity constraint.
    #[error("Integrity constraint violation: {message}\nThe SQL being executed was: {sql}")]
    Integrity { message: String, sql: String },

    /// A statement failed for any other reason.
    #[error("Database error: {message}\nThe SQL being executed was: {sql}")]
    Execution { message: String, sql: String },

    /// A failure reported by the underlying client, not yet classified.
    #[error("Driver error: {message}")]
    Driver {
        message: String,
        /// e.g. "23000" for a duplicate key
        sql_state: Option<String>,
    },

    // ── Transactions ─────────────────────────────────────────────────

    /// A transaction operation was invalid for the transaction's state.
    #[error("Transaction error: {0}")]
    Transaction(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Cache / serialization / IO ───────────────────────────────────

    /// The cache service failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// A value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Creates a capability-gap error.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported(message.into())
    }

    /// Creates a connectivity error for the given endpoint.
    pub fn connection_failed(dsn: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            dsn: dsn.into(),
            message: message.into(),
        }
    }

    /// Creates an unclassified driver error.
    pub fn driver(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state,
        }
    }

    /// Creates a transaction state error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction(message.into())
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Attaches the SQL text to a driver failure, classifying it as an
    /// integrity violation or a generic execution failure.
    ///
    /// Errors that are not driver failures are returned unchanged.
    #[must_use]
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Self::Driver { message, sql_state } => {
                let integrity = sql_state
                    .as_deref()
                    .is_some_and(|state| state.starts_with(INTEGRITY_SQLSTATE_CLASS))
                    || message.starts_with(INTEGRITY_MESSAGE_MARKER);
                if integrity {
                    Self::Integrity {
                        message,
                        sql: sql.to_string(),
                    }
                } else {
                    Self::Execution {
                        message,
                        sql: sql.to_string(),
                    }
                }
            }
            other => other,
        }
    }

    /// Returns the SQL attached to an execution or integrity failure.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Integrity { sql, .. } | Self::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Returns `true` for capability gaps.
    pub const fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }

    /// Returns `true` for integrity constraint violations.
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Check if this error is retryable.
    ///
    /// Only connectivity failures are, and only once the dead-server
    /// interval of the failing endpoint has elapsed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A convenience type alias for `Result<T, DbError>`.
pub type DbResult<T> = Result<T, DbError>;
