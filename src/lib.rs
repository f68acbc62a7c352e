//! Resource Cache - A persistent local cache for fetched resource payloads
//!
//! Stores binary payloads keyed by resource id with max-age expiry,
//! version-tag invalidation and capacity-bounded LRU eviction.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheEntry, CacheStats, PutOutcome, ResourceCache};
pub use config::CacheConfig;
pub use error::{CacheError, PolicyRejection};
pub use tasks::spawn_sweep_task;
