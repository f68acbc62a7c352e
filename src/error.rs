//! Error types for the resource cache
//!
//! Provides unified error handling using thiserror.

use std::io;

use thiserror::Error;

// == Policy Rejection ==
/// Reasons a `put` is deliberately skipped.
///
/// These are not failures: the payload is simply not eligible for caching.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRejection {
    /// The caller supplied an empty resource id
    #[error("empty resource id")]
    EmptyResourceId,
    /// The caller supplied no version tag
    #[error("missing version tag")]
    MissingVersion,
    /// The payload exceeds the single-entry ceiling
    #[error("payload of {size} bytes exceeds ceiling of {ceiling} bytes")]
    Oversized {
        /// Size of the rejected payload in bytes
        size: u64,
        /// Ceiling in effect when the payload was rejected
        ceiling: u64,
    },
}

// == Cache Error Enum ==
/// Unified error type for the resource cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backing store could not be opened
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Reading an entry from the backing store failed
    #[error("Read failed for {resource_id}: {source}")]
    Read {
        resource_id: String,
        #[source]
        source: io::Error,
    },

    /// Writing an entry to the backing store failed
    #[error("Write failed for {resource_id}: {source}")]
    Write {
        resource_id: String,
        #[source]
        source: io::Error,
    },

    /// Entry metadata could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unattributed filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Wraps an I/O error raised while reading `resource_id`.
    pub fn read(resource_id: &str, source: io::Error) -> Self {
        CacheError::Read {
            resource_id: resource_id.to_string(),
            source,
        }
    }

    /// Wraps an I/O error raised while writing `resource_id`.
    pub fn write(resource_id: &str, source: io::Error) -> Self {
        CacheError::Write {
            resource_id: resource_id.to_string(),
            source,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the resource cache.
pub type Result<T> = std::result::Result<T, CacheError>;
