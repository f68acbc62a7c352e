//! Resource Cache - maintenance entry point
//!
//! Opens the cache configured by the environment, sweeps expired entries
//! and prints the resulting statistics as JSON.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resource_cache::{CacheConfig, ResourceCache};

/// Runs one maintenance pass over the resource cache.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache store (reconciling anything left on disk)
/// 4. Remove expired entries
/// 5. Print statistics to stdout
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resource_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: dir={}, capacity={} bytes, max_entry={} bytes, max_age={}s",
        config.cache_dir.display(),
        config.capacity_bytes,
        config.max_entry_bytes,
        config.max_age.as_secs()
    );

    let cache = ResourceCache::new(config);
    cache.init().await.context("failed to open resource cache")?;

    let removed = cache
        .clear_expired()
        .await
        .context("expiry sweep failed")?;
    info!("Removed {} expired entries", removed);

    let stats = cache.stats().await.context("failed to read cache stats")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
