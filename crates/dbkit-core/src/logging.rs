//! Logging integration for dbkit.
//!
//! dbkit logs through [`tracing`]: dead-server detection is a warning,
//! swallowed rollback failures are errors, nested-transaction degradation is
//! informational and connection/transaction/statement activity is debug
//! output. This module configures a subscriber from
//! [`ConnectionSettings`](crate::settings::ConnectionSettings).

use crate::settings::ConnectionSettings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level` (e.g. "debug",
/// "`dbkit_db=trace`"). In debug mode a pretty, human-readable format is
/// used; otherwise a structured JSON format is used. Installing a second
/// subscriber is a no-op.
pub fn setup_logging(settings: &ConnectionSettings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one logical connection.
///
/// # Examples
///
/// ```
/// use dbkit_core::logging::connection_span;
///
/// let span = connection_span("mysql:host=db1");
/// let _guard = span.enter();
/// tracing::debug!("opening");
/// ```
pub fn connection_span(dsn: &str) -> tracing::Span {
    tracing::debug_span!("db_connection", dsn = dsn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_twice_is_harmless() {
        let settings = ConnectionSettings {
            log_level: "not a valid directive[".to_string(),
            ..ConnectionSettings::default()
        };
        setup_logging(&settings);
        setup_logging(&settings);
    }
}
