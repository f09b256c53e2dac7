//! Master and slave pool probing.
//!
//! Candidates are tried one at a time. A candidate that recently failed
//! carries a dead-server marker in the server status cache and is skipped
//! until the marker expires. The first candidate that opens wins.
//!
//! A failed open marks the candidate dead and ends the probe with no
//! endpoint: later candidates are not tried until the next probe.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use dbkit_cache::{CacheBackend, CacheValue};
use dbkit_core::{DbError, DbResult, EndpointSettings, PoolDefaults};

use crate::client::{ClientFactory, DbClient};

/// Cache key of the dead-server marker of an endpoint.
pub fn dead_server_key(dsn: &str) -> String {
    format!("dbkit.connection.open_pool::{dsn}")
}

/// Opens the first available endpoint of a pool.
pub(crate) struct PoolProber<'a> {
    pub(crate) factory: &'a dyn ClientFactory,
    pub(crate) status_cache: Option<&'a dyn CacheBackend>,
    /// 0 keeps a dead marker until the cache drops it.
    pub(crate) retry_interval: u64,
}

impl PoolProber<'_> {
    /// Merges the pool defaults into every endpoint, shuffles the pool and
    /// probes it.
    pub(crate) async fn open_shuffled(
        &self,
        pool: &[EndpointSettings],
        defaults: &PoolDefaults,
    ) -> DbResult<Option<Arc<dyn DbClient>>> {
        let mut candidates: Vec<EndpointSettings> =
            pool.iter().map(|e| e.merged_with(defaults)).collect();
        candidates.shuffle(&mut rand::thread_rng());
        self.open_sequentially(&candidates).await
    }

    /// Merges the pool defaults into every endpoint and probes the pool in
    /// declared order.
    pub(crate) async fn open_in_order(
        &self,
        pool: &[EndpointSettings],
        defaults: &PoolDefaults,
    ) -> DbResult<Option<Arc<dyn DbClient>>> {
        let candidates: Vec<EndpointSettings> =
            pool.iter().map(|e| e.merged_with(defaults)).collect();
        self.open_sequentially(&candidates).await
    }

    async fn open_sequentially(
        &self,
        candidates: &[EndpointSettings],
    ) -> DbResult<Option<Arc<dyn DbClient>>> {
        for endpoint in candidates {
            if endpoint.dsn.is_empty() {
                return Err(DbError::configuration("The \"dsn\" option must be specified."));
            }

            let key = dead_server_key(&endpoint.dsn);
            if let Some(cache) = self.status_cache {
                if cache.has_key(&key).await? {
                    tracing::debug!(dsn = %endpoint.dsn, "Skipping endpoint marked dead");
                    continue;
                }
            }

            let client = self.factory.create(endpoint)?;
            match client.open().await {
                Ok(()) => {
                    tracing::debug!(dsn = %endpoint.dsn, "Opened endpoint");
                    return Ok(Some(client));
                }
                Err(e) => {
                    tracing::warn!(dsn = %endpoint.dsn, error = %e, "Connection ({}) failed", endpoint.dsn);
                    if let Some(cache) = self.status_cache {
                        let ttl = (self.retry_interval > 0)
                            .then(|| Duration::from_secs(self.retry_interval));
                        cache.set(&key, CacheValue::Integer(1), ttl, None).await?;
                    }
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}
