//! # dbkit-core
//!
//! Core types shared by every dbkit crate. This crate has no database
//! dependencies and provides the foundation for the others.
//!
//! ## Modules
//!
//! - [`error`] - The [`DbError`] taxonomy and the [`DbResult`] alias
//! - [`settings`] - Connection settings with their defaults
//! - [`settings_loader`] - Loading settings from TOML, JSON and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{DbError, DbResult};
pub use settings::{ConnectionSettings, EndpointSettings, PoolDefaults, QuoteStyle};
