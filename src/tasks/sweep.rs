//! Expiry Sweep Task
//!
//! Background task that periodically removes expired cache entries.
//!
//! The cache never schedules sweeps itself; an embedding application that
//! wants them spawns this task and owns its handle.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ResourceCache;

/// Spawns a background task that periodically calls `clear_expired`.
///
/// Sweeps run every `sweep_interval` of the cache's configuration.
///
/// # Arguments
/// * `cache` - Shared reference to the cache
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(ResourceCache::new(CacheConfig::from_env()));
/// let sweep_handle = spawn_sweep_task(cache.clone());
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(cache: Arc<ResourceCache>) -> JoinHandle<()> {
    let interval = cache.config().sweep_interval;
    tokio::spawn(async move {
        info!(
            "Starting cache expiry sweep with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            // Sleep for the configured interval
            tokio::time::sleep(interval).await;

            match cache.clear_expired().await {
                Ok(0) => debug!("Expiry sweep: no expired entries found"),
                Ok(removed) => debug!("Expiry sweep: removed {} expired entries", removed),
                Err(e) => warn!("Expiry sweep skipped: {}", e),
            }
        }
    })
}
