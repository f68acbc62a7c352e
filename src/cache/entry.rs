//! Cache Entry Module
//!
//! Defines cached resources and the metadata kept for them in memory.

use std::time::Duration;

use chrono::{DateTime, Utc};

// == Entry Metadata ==
/// Everything known about a cached resource except its payload.
///
/// The store keeps one of these in memory per entry so sizes and ages can be
/// aggregated without reading payload files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Caller-supplied resource identity
    pub resource_id: String,
    /// Opaque MIME-like tag
    pub content_type: String,
    /// Optional display name
    pub file_name: Option<String>,
    /// Payload length in bytes
    pub byte_size: u64,
    /// Insertion time (Unix milliseconds)
    pub created_at: u64,
    /// Server-side version marker the payload was fetched at
    pub version_tag: String,
    /// Monotonic insertion number, orders eviction
    pub sequence: u64,
}

impl EntryMeta {
    // == Age ==
    /// Milliseconds elapsed since insertion, saturating at zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    // == Is Expired ==
    /// Checks if the entry is older than `max_age`.
    ///
    /// An entry exactly `max_age` old is still fresh.
    pub fn is_expired(&self, now_ms: u64, max_age: Duration) -> bool {
        u128::from(self.age_ms(now_ms)) > max_age.as_millis()
    }

    /// Insertion time as a UTC datetime.
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        timestamp_to_utc(self.created_at)
    }
}

// == Cache Entry ==
/// A cached resource returned from `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub resource_id: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub file_name: Option<String>,
    pub byte_size: u64,
    /// Insertion time (Unix milliseconds)
    pub created_at: u64,
    pub version_tag: String,
}

impl CacheEntry {
    pub(crate) fn from_parts(meta: EntryMeta, payload: Vec<u8>) -> Self {
        Self {
            resource_id: meta.resource_id,
            payload,
            content_type: meta.content_type,
            file_name: meta.file_name,
            byte_size: meta.byte_size,
            created_at: meta.created_at,
            version_tag: meta.version_tag,
        }
    }

    /// Milliseconds elapsed since insertion.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }
}

/// Converts Unix milliseconds to a UTC datetime, clamping out-of-range values to the epoch.
pub(crate) fn timestamp_to_utc(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
