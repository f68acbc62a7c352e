//! Cache Module
//!
//! Provides a persistent resource cache with max-age expiry, version-tag
//! invalidation and insertion-order LRU eviction.

mod clock;
mod entry;
mod lru;
mod stats;
mod storage;
mod store;


// Re-export public types
pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, EntryMeta};
pub use lru::InsertionOrder;
pub use stats::CacheStats;
pub use storage::SCHEMA_VERSION;
pub use store::{PutOutcome, ResourceCache};

// == Public Constants ==
/// Default maximum entry age in seconds (24 hours)
pub const DEFAULT_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Default total capacity in bytes
pub const DEFAULT_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024; // 1 GB

/// Default single entry ceiling in bytes
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 100 * 1024 * 1024; // 100 MB

/// Share of capacity eviction shrinks the store to
pub const EVICTION_TARGET_PERCENT: u64 = 80;
