//! Cache Store Module
//!
//! Main cache engine combining disk persistence with an in-memory metadata
//! index, max-age expiry, version invalidation and insertion-order eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::storage::DiskStorage;
use crate::cache::{
    CacheEntry, CacheStats, Clock, EntryMeta, InsertionOrder, SystemClock, EVICTION_TARGET_PERCENT,
};
use crate::cache::stats::Counters;
use crate::config::CacheConfig;
use crate::error::{CacheError, PolicyRejection, Result};

// == Put Outcome ==
/// Result of a `put`. Never an error: caching is best effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Entry persisted, after evicting `evicted` older entries
    Stored { evicted: usize },
    /// Payload deliberately not cached
    Rejected(PolicyRejection),
    /// Storage failed; the entry was not cached
    Failed,
}

impl PutOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PutOutcome::Stored { .. })
    }
}

// == Index ==
/// In-memory view of what is on disk. Never holds payload bytes.
#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, EntryMeta>,
    order: InsertionOrder,
    total_bytes: u64,
    next_sequence: u64,
}

impl Index {
    /// Builds the index from entries sorted oldest first.
    ///
    /// Colliding sequence numbers from a damaged store are bumped so the
    /// ordering stays total.
    fn from_entries(entries: Vec<EntryMeta>) -> Self {
        let mut index = Index::default();
        for mut meta in entries {
            meta.sequence = meta.sequence.max(index.next_sequence);
            index.next_sequence = meta.sequence + 1;
            index.insert(meta);
        }
        index
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn insert(&mut self, meta: EntryMeta) {
        self.remove(&meta.resource_id);
        self.total_bytes += meta.byte_size;
        self.order.insert(meta.sequence, &meta.resource_id);
        self.entries.insert(meta.resource_id.clone(), meta);
    }

    fn remove(&mut self, resource_id: &str) -> Option<EntryMeta> {
        let meta = self.entries.remove(resource_id)?;
        self.order.remove(meta.sequence);
        self.total_bytes = self.total_bytes.saturating_sub(meta.byte_size);
        Some(meta)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.total_bytes = 0;
    }
}

/// Opened backing store plus its index.
#[derive(Debug)]
struct Store {
    disk: DiskStorage,
    index: RwLock<Index>,
}

enum Lookup {
    Hit(CacheEntry),
    Missing,
    Stale { sequence: u64, reason: &'static str },
}

// == Resource Cache ==
/// Persistent cache of resource payloads keyed by resource id.
///
/// The backing store is opened lazily on first use. Share one instance per
/// process behind an `Arc`; all mutation is serialized by an internal
/// write lock, reads run concurrently.
#[derive(Debug)]
pub struct ResourceCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    store: OnceCell<Store>,
    /// Serializes open attempts; holds the message of the last failed one
    init_gate: Mutex<Option<String>>,
    /// Number of finished failed open attempts
    init_generation: AtomicU64,
    counters: Counters,
    #[cfg(test)]
    open_attempts: AtomicU64,
}

impl ResourceCache {
    // == Constructor ==
    /// Creates a cache over `config.cache_dir` using the system clock.
    ///
    /// Nothing touches the disk until the first operation or `init`.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache with an explicit time source.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            store: OnceCell::new(),
            init_gate: Mutex::new(None),
            init_generation: AtomicU64::new(0),
            counters: Counters::default(),
            #[cfg(test)]
            open_attempts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == Init ==
    /// Opens the backing store if it is not open yet.
    ///
    /// Concurrent callers share the single in-flight open and all see its
    /// result. A failure is returned as `CacheError::Initialization`; only a
    /// call made after the failed attempt finished tries again.
    pub async fn init(&self) -> Result<()> {
        self.store().await.map(|_| ())
    }

    async fn store(&self) -> Result<&Store> {
        if let Some(store) = self.store.get() {
            return Ok(store);
        }

        let observed = self.init_generation.load(Ordering::Acquire);
        let mut last_failure = self.init_gate.lock().await;

        if let Some(store) = self.store.get() {
            return Ok(store);
        }
        // An attempt failed while we waited for it
        if self.init_generation.load(Ordering::Acquire) != observed {
            if let Some(message) = last_failure.as_ref() {
                return Err(CacheError::Initialization(message.clone()));
            }
        }

        match self.open_store().await {
            Ok(store) => {
                *last_failure = None;
                Ok(self.store.get_or_init(|| async { store }).await)
            }
            Err(e) => {
                let message = match e {
                    CacheError::Initialization(message) => message,
                    other => other.to_string(),
                };
                error!("Failed to open resource cache: {}", message);
                *last_failure = Some(message.clone());
                self.init_generation.fetch_add(1, Ordering::Release);
                Err(CacheError::Initialization(message))
            }
        }
    }

    async fn open_store(&self) -> Result<Store> {
        #[cfg(test)]
        {
            self.open_attempts.fetch_add(1, Ordering::Relaxed);
        }

        let (disk, report) = DiskStorage::open(&self.config.cache_dir).await?;

        let mut index = Index::from_entries(report.entries);

        // Capacity may have been lowered since the store was last used
        if index.total_bytes > self.config.capacity_bytes {
            self.evict(&disk, &mut index, 0).await.map_err(open_failure)?;
        }

        info!(
            "Resource cache opened at {}: {} entries, {} bytes",
            self.config.cache_dir.display(),
            index.entries.len(),
            index.total_bytes
        );

        Ok(Store {
            disk,
            index: RwLock::new(index),
        })
    }

    // == Get ==
    /// Returns the cached entry for `resource_id`, or None on a miss.
    ///
    /// An entry older than the max age, or whose version differs from
    /// `expected_version`, is deleted and reported as a miss. Storage
    /// failures also read as misses.
    pub async fn get(&self, resource_id: &str, expected_version: Option<&str>) -> Option<CacheEntry> {
        if resource_id.is_empty() {
            debug!("Cache lookup with empty resource id");
            self.counters.record_miss();
            return None;
        }

        let store = match self.store().await {
            Ok(store) => store,
            Err(e) => {
                warn!("Cache unavailable, treating {} as a miss: {}", resource_id, e);
                self.counters.record_miss();
                return None;
            }
        };

        let expected_version = expected_version.filter(|v| !v.is_empty());
        let now = self.clock.now_ms();

        let lookup = {
            let index = store.index.read().await;
            match index.entries.get(resource_id) {
                None => Lookup::Missing,
                Some(meta) if meta.is_expired(now, self.config.max_age) => Lookup::Stale {
                    sequence: meta.sequence,
                    reason: "expired",
                },
                Some(meta) if expected_version.is_some_and(|v| v != meta.version_tag) => {
                    debug!(
                        "Cache version mismatch for {}: cached={}, latest={}",
                        resource_id,
                        meta.version_tag,
                        expected_version.unwrap_or_default()
                    );
                    Lookup::Stale {
                        sequence: meta.sequence,
                        reason: "version mismatch",
                    }
                }
                Some(meta) => match store.disk.read_payload(meta).await {
                    Ok(payload) => Lookup::Hit(CacheEntry::from_parts(meta.clone(), payload)),
                    Err(e) => {
                        warn!("Cache read failed, treating as a miss: {}", e);
                        Lookup::Stale {
                            sequence: meta.sequence,
                            reason: "unreadable",
                        }
                    }
                },
            }
        };

        match lookup {
            Lookup::Hit(entry) => {
                debug!(
                    "Cache hit for {}, age={}s",
                    resource_id,
                    entry.age_ms(now) / 1000
                );
                self.counters.record_hit();
                Some(entry)
            }
            Lookup::Missing => {
                self.counters.record_miss();
                None
            }
            Lookup::Stale { sequence, reason } => {
                debug!("Dropping {} cache entry for {}", reason, resource_id);
                self.remove_if_current(store, resource_id, sequence).await;
                self.counters.record_miss();
                None
            }
        }
    }

    /// Deletes `resource_id` only if it is still the entry written at `sequence`.
    ///
    /// Between releasing the read lock and taking the write lock a `put` may
    /// have replaced the entry; a fresh replacement must survive.
    async fn remove_if_current(&self, store: &Store, resource_id: &str, sequence: u64) {
        let mut index = store.index.write().await;
        if index.entries.get(resource_id).map(|m| m.sequence) != Some(sequence) {
            return;
        }
        match store.disk.remove_entry(resource_id).await {
            Ok(()) => {
                index.remove(resource_id);
            }
            Err(e) => warn!("Failed to delete stale cache entry: {}", e),
        }
    }

    // == Put ==
    /// Caches `payload` under `resource_id`, fully replacing any prior entry.
    ///
    /// Older entries are evicted first if the payload would not otherwise fit.
    pub async fn put(
        &self,
        resource_id: &str,
        payload: &[u8],
        content_type: &str,
        version_tag: &str,
        file_name: Option<&str>,
    ) -> PutOutcome {
        if let Err(rejection) = self.check_policy(resource_id, payload.len() as u64, version_tag) {
            self.counters.record_rejection();
            match rejection {
                PolicyRejection::Oversized { .. } => {
                    debug!("Skipping cache for {}: {}", resource_id, rejection)
                }
                _ => warn!("Skipping cache for {:?}: {}", resource_id, rejection),
            }
            return PutOutcome::Rejected(rejection);
        }

        let store = match self.store().await {
            Ok(store) => store,
            Err(e) => {
                warn!("Cache unavailable, not caching {}: {}", resource_id, e);
                self.counters.record_write_failure();
                return PutOutcome::Failed;
            }
        };

        let mut index = store.index.write().await;
        let written = self
            .write_locked(store, &mut index, resource_id, payload, content_type, version_tag, file_name)
            .await;

        match written {
            Ok(evicted) => {
                debug!(
                    "Cached {}: size={}, version={}",
                    resource_id,
                    payload.len(),
                    version_tag
                );
                PutOutcome::Stored { evicted }
            }
            Err(e) => {
                warn!("Failed to cache {}: {}", resource_id, e);
                self.counters.record_write_failure();
                PutOutcome::Failed
            }
        }
    }

    fn check_policy(
        &self,
        resource_id: &str,
        size: u64,
        version_tag: &str,
    ) -> std::result::Result<(), PolicyRejection> {
        if resource_id.is_empty() {
            return Err(PolicyRejection::EmptyResourceId);
        }
        if version_tag.is_empty() {
            return Err(PolicyRejection::MissingVersion);
        }
        let ceiling = self.config.effective_entry_ceiling();
        if size > ceiling {
            return Err(PolicyRejection::Oversized { size, ceiling });
        }
        Ok(())
    }

    /// Admission check, eviction and write as one step under the write lock.
    #[allow(clippy::too_many_arguments)]
    async fn write_locked(
        &self,
        store: &Store,
        index: &mut Index,
        resource_id: &str,
        payload: &[u8],
        content_type: &str,
        version_tag: &str,
        file_name: Option<&str>,
    ) -> Result<usize> {
        // The previous entry is replaced, so it no longer counts toward capacity
        if index.entries.contains_key(resource_id) {
            store.disk.remove_entry(resource_id).await?;
            index.remove(resource_id);
        }

        let required = payload.len() as u64;
        let evicted = if index.total_bytes + required > self.config.capacity_bytes {
            self.evict(&store.disk, index, required).await?
        } else {
            0
        };

        let meta = EntryMeta {
            resource_id: resource_id.to_string(),
            content_type: content_type.to_string(),
            file_name: file_name.map(str::to_string),
            byte_size: required,
            created_at: self.clock.now_ms(),
            version_tag: version_tag.to_string(),
            sequence: index.take_sequence(),
        };

        if let Err(e) = store.disk.write_entry(&meta, payload).await {
            // Leave nothing behind that could pair old metadata with new bytes
            if let Err(cleanup) = store.disk.remove_entry(resource_id).await {
                warn!("Failed to clean up partial write of {}: {}", resource_id, cleanup);
            }
            return Err(e);
        }

        index.insert(meta);
        Ok(evicted)
    }

    // == Evict ==
    /// Deletes oldest entries until `required` more bytes fit under the
    /// eviction target, or the store is empty.
    ///
    /// Stops at the first deletion that fails; the index only forgets
    /// entries whose sidecar is gone from disk.
    async fn evict(&self, disk: &DiskStorage, index: &mut Index, required: u64) -> Result<usize> {
        let target = eviction_target(self.config.capacity_bytes);
        let before = index.total_bytes;
        let mut evicted = 0;

        while index.total_bytes + required > target {
            let Some((_, oldest)) = index.order.oldest() else {
                break;
            };
            let oldest = oldest.to_string();

            disk.remove_entry(&oldest).await?;
            index.remove(&oldest);
            self.counters.record_eviction();
            evicted += 1;
        }

        debug!(
            "LRU eviction removed {} entries: {} -> {} bytes (target {})",
            evicted, before, index.total_bytes, target
        );
        Ok(evicted)
    }

    // == Delete ==
    /// Removes `resource_id`. Deleting an absent entry is not an error.
    pub async fn delete(&self, resource_id: &str) {
        if resource_id.is_empty() {
            return;
        }

        let store = match self.store().await {
            Ok(store) => store,
            Err(e) => {
                warn!("Cache unavailable, cannot delete {}: {}", resource_id, e);
                return;
            }
        };

        let mut index = store.index.write().await;
        if !index.entries.contains_key(resource_id) {
            return;
        }
        match store.disk.remove_entry(resource_id).await {
            Ok(()) => {
                index.remove(resource_id);
                debug!("Deleted cache entry {}", resource_id);
            }
            Err(e) => warn!("Failed to delete cache entry: {}", e),
        }
    }

    // == Clear Expired ==
    /// Deletes every entry older than the max age, oldest first.
    ///
    /// Returns the number of entries removed. Entries that cannot be deleted
    /// are logged and left for the next sweep.
    pub async fn clear_expired(&self) -> Result<usize> {
        let store = self.store().await?;
        let now = self.clock.now_ms();
        let mut index = store.index.write().await;

        let expired: Vec<String> = index
            .order
            .oldest_first()
            .filter(|(_, id)| {
                index
                    .entries
                    .get(*id)
                    .is_some_and(|m| m.is_expired(now, self.config.max_age))
            })
            .map(|(_, id)| id.to_string())
            .collect();

        let mut removed = 0;
        for resource_id in expired {
            match store.disk.remove_entry(&resource_id).await {
                Ok(()) => {
                    index.remove(&resource_id);
                    removed += 1;
                }
                Err(e) => warn!("Failed to delete expired cache entry: {}", e),
            }
        }

        if removed > 0 {
            info!("Expiry sweep removed {} cache entries", removed);
        } else {
            debug!("Expiry sweep found no expired entries");
        }
        Ok(removed)
    }

    // == Clear All ==
    /// Empties the store.
    pub async fn clear_all(&self) -> Result<()> {
        let store = self.store().await?;
        let mut index = store.index.write().await;

        let ids: Vec<String> = index.entries.keys().cloned().collect();
        for resource_id in ids {
            store.disk.remove_entry(&resource_id).await?;
            index.remove(&resource_id);
        }
        // Sweep stray files the index never knew about
        store.disk.clear().await?;
        index.clear();

        info!("Cleared all cache entries");
        Ok(())
    }

    // == Stats ==
    /// Returns aggregate size and counters without reading any payload.
    pub async fn stats(&self) -> Result<CacheStats> {
        let store = self.store().await?;
        let index = store.index.read().await;

        let mut stats = CacheStats {
            entry_count: index.entries.len(),
            total_bytes: index.total_bytes,
            oldest_entry_timestamp: index
                .entries
                .values()
                .min_by_key(|m| m.created_at)
                .map(EntryMeta::created_at_utc),
            ..CacheStats::default()
        };
        self.counters.fill(&mut stats);
        Ok(stats)
    }
}

/// Folds any error raised while opening the store into `Initialization`.
fn open_failure(e: CacheError) -> CacheError {
    match e {
        CacheError::Initialization(_) => e,
        other => CacheError::Initialization(other.to_string()),
    }
}

/// Total size eviction shrinks the store to, leaving headroom for later inserts.
fn eviction_target(capacity_bytes: u64) -> u64 {
    (u128::from(capacity_bytes) * u128::from(EVICTION_TARGET_PERCENT) / 100) as u64
}
