//! # dbkit-cache
//!
//! The cache service used by dbkit for schema metadata, dead-server markers
//! and query results. It provides the [`CacheBackend`] trait and several
//! built-in implementations.
//!
//! ## Backends
//!
//! - [`InMemoryCache`] - Thread-safe in-memory cache with TTL support
//! - [`FileCache`] - Filesystem-based cache that several processes can share
//! - [`DummyCache`] - Disabled cache; every lookup misses
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dbkit_cache::{CacheBackend, CacheValue, InMemoryCache};
//! use std::time::Duration;
//!
//! async fn example() {
//!     let cache = InMemoryCache::new();
//!     cache
//!         .set("key", CacheValue::String("hello".to_string()), Some(Duration::from_secs(60)), Some("users"))
//!         .await
//!         .unwrap();
//!     cache.invalidate_tag("users").await.unwrap();
//!     assert!(cache.get("key").await.unwrap().is_none());
//! }
//! ```

pub mod backend;
pub mod dummy;
pub mod file;
pub mod memory;

pub use backend::{CacheBackend, CacheValue};
pub use dummy::DummyCache;
pub use file::FileCache;
pub use memory::InMemoryCache;
