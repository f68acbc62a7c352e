//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{DEFAULT_CAPACITY_BYTES, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_ENTRY_BYTES};

/// Default interval between background expiry sweeps, in seconds.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the persistent store
    pub cache_dir: PathBuf,
    /// Maximum age of an entry before it is treated as expired
    pub max_age: Duration,
    /// Total payload bytes the store may hold
    pub capacity_bytes: u64,
    /// Largest single payload admitted, in bytes
    pub max_entry_bytes: u64,
    /// Interval used by the background sweep task
    pub sweep_interval: Duration,
}

impl CacheConfig {
    /// Creates a config rooted at `cache_dir` with default limits.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `RESOURCE_CACHE_DIR` - Store directory (default: `<tmp>/resource-cache`)
    /// - `RESOURCE_CACHE_MAX_AGE_SECS` - Entry max age in seconds (default: 86400)
    /// - `RESOURCE_CACHE_MAX_BYTES` - Total capacity in bytes (default: 1 GiB)
    /// - `RESOURCE_CACHE_MAX_ENTRY_BYTES` - Single entry ceiling (default: 100 MiB)
    /// - `RESOURCE_CACHE_SWEEP_INTERVAL_SECS` - Sweep frequency (default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache_dir: env::var("RESOURCE_CACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            max_age: Duration::from_secs(parse_var(
                "RESOURCE_CACHE_MAX_AGE_SECS",
                DEFAULT_MAX_AGE_SECS,
            )),
            capacity_bytes: parse_var("RESOURCE_CACHE_MAX_BYTES", DEFAULT_CAPACITY_BYTES),
            max_entry_bytes: parse_var("RESOURCE_CACHE_MAX_ENTRY_BYTES", DEFAULT_MAX_ENTRY_BYTES),
            sweep_interval: Duration::from_secs(parse_var(
                "RESOURCE_CACHE_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
        }
    }

    /// Sets the maximum entry age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the interval between background expiry sweeps.
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Sets the total capacity in bytes.
    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Sets the single entry ceiling in bytes.
    pub fn with_max_entry_bytes(mut self, max_entry_bytes: u64) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    /// Ceiling actually enforced on `put`.
    ///
    /// Never larger than the capacity, so one admitted entry always fits.
    pub fn effective_entry_ceiling(&self) -> u64 {
        self.max_entry_bytes.min(self.capacity_bytes)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: env::temp_dir().join("resource-cache"),
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

fn parse_var(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
