//! Integration Tests for the Resource Cache
//!
//! Exercises the public API against a real directory: eviction scenarios,
//! version invalidation, persistence across reopen, recovery from damaged
//! files and concurrent access.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use resource_cache::cache::{Clock, ManualClock, SCHEMA_VERSION};
use resource_cache::{CacheConfig, PolicyRejection, PutOutcome, ResourceCache};
use tempfile::tempdir;

// == Helper Functions ==

const MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Capacity 10 bytes, ceiling 8 bytes per entry.
fn small_config(dir: &Path) -> CacheConfig {
    CacheConfig::new(dir)
        .with_capacity_bytes(10)
        .with_max_entry_bytes(8)
        .with_max_age(MAX_AGE)
}

fn small_cache(dir: &Path, clock: &ManualClock) -> ResourceCache {
    ResourceCache::with_clock(small_config(dir), Arc::new(clock.clone()))
}

fn entry_files(dir: &Path) -> Vec<String> {
    let Ok(listing) = std::fs::read_dir(dir.join("entries")) else {
        return Vec::new();
    };
    let mut names: Vec<String> = listing
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// == Eviction Scenarios ==

#[tokio::test]
async fn test_third_put_evicts_oldest() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    assert!(cache.put("A", b"aaaa", "text/plain", "v1", None).await.is_stored());
    assert!(cache.put("B", b"bbbb", "text/plain", "v1", None).await.is_stored());
    let outcome = cache.put("C", b"cccc", "text/plain", "v1", None).await;

    assert_eq!(outcome, PutOutcome::Stored { evicted: 1 });
    assert!(cache.get("A", None).await.is_none());
    assert!(cache.get("B", None).await.is_some());
    assert!(cache.get("C", None).await.is_some());
    assert_eq!(cache.stats().await.unwrap().total_bytes, 8);
}

#[tokio::test]
async fn test_oversized_payload_never_cached() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    let outcome = cache.put("R", &[0u8; 9], "application/pdf", "v1", None).await;

    assert_eq!(
        outcome,
        PutOutcome::Rejected(PolicyRejection::Oversized { size: 9, ceiling: 8 })
    );
    assert!(cache.get("R", None).await.is_none());
    assert!(entry_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_payload_at_ceiling_is_cached() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    assert!(cache.put("R", &[7u8; 8], "application/pdf", "v1", None).await.is_stored());
    assert_eq!(cache.get("R", None).await.unwrap().payload, vec![7u8; 8]);
}

// == Version Scenarios ==

#[tokio::test]
async fn test_version_mismatch_deletes_entry() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    cache.put("R", b"data", "text/plain", "v1", None).await;

    assert!(cache.get("R", Some("v2")).await.is_none());
    // The mismatched read removed it, so the old version is gone too
    assert!(cache.get("R", Some("v1")).await.is_none());
    assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    assert!(entry_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_matching_version_hits() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    cache
        .put("R", b"data", "application/pdf", "2024-05-01T10:00:00Z", Some("notes.pdf"))
        .await;

    let entry = cache.get("R", Some("2024-05-01T10:00:00Z")).await.unwrap();
    assert_eq!(entry.version_tag, "2024-05-01T10:00:00Z");
    assert_eq!(entry.file_name.as_deref(), Some("notes.pdf"));
}

// == Expiry Scenarios ==

#[tokio::test]
async fn test_expired_entry_is_deleted_on_read() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new(1_000_000);
    let cache = small_cache(dir.path(), &clock);

    cache.put("R", b"data", "text/plain", "v1", None).await;
    assert_eq!(cache.stats().await.unwrap().entry_count, 1);

    clock.advance(MAX_AGE + Duration::from_millis(1));

    assert!(cache.get("R", Some("v1")).await.is_none());
    assert_eq!(cache.stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_expiry_checked_before_version() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new(0);
    let cache = small_cache(dir.path(), &clock);

    cache.put("R", b"data", "text/plain", "v1", None).await;
    clock.advance(MAX_AGE * 2);

    // Right version, but too old
    assert!(cache.get("R", Some("v1")).await.is_none());
}

#[tokio::test]
async fn test_replacement_resets_freshness() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new(0);
    let cache = small_cache(dir.path(), &clock);

    cache.put("R", b"old", "text/plain", "v1", None).await;
    clock.advance(MAX_AGE - Duration::from_secs(1));
    cache.put("R", b"new", "text/plain", "v2", None).await;
    clock.advance(Duration::from_secs(10));

    // The first write would have expired by now; the replacement has not
    let entry = cache.get("R", None).await.unwrap();
    assert_eq!(entry.payload, b"new");
    assert_eq!(entry.age_ms(clock.now_ms()), 10_000);
}

// == Delete ==

#[tokio::test]
async fn test_delete_is_idempotent() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    cache.put("R", b"data", "text/plain", "v1", None).await;
    cache.delete("R").await;
    cache.delete("R").await;
    cache.delete("never-existed").await;

    assert!(cache.get("R", None).await.is_none());
    assert_eq!(cache.stats().await.unwrap().entry_count, 0);
}

// == Persistence ==

#[tokio::test]
async fn test_entries_survive_reopen() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new(5_000);

    {
        let cache = small_cache(dir.path(), &clock);
        cache.put("A", b"aaaa", "text/plain", "v1", Some("a.txt")).await;
        cache.put("B", b"bbbb", "text/plain", "v1", None).await;
    }

    let cache = small_cache(dir.path(), &clock);
    let entry = cache.get("A", Some("v1")).await.unwrap();
    assert_eq!(entry.payload, b"aaaa");
    assert_eq!(entry.created_at, 5_000);
    assert_eq!(entry.file_name.as_deref(), Some("a.txt"));

    // Insertion order is preserved across the reopen
    cache.put("C", b"cccc", "text/plain", "v1", None).await;
    assert!(cache.get("A", None).await.is_none());
    assert!(cache.get("B", None).await.is_some());
}

#[tokio::test]
async fn test_reopen_with_lower_capacity_evicts() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new(0);

    {
        let cache = ResourceCache::with_clock(
            CacheConfig::new(dir.path()).with_capacity_bytes(100),
            Arc::new(clock.clone()),
        );
        for id in ["a", "b", "c", "d", "e"] {
            cache.put(id, b"xxxx", "text/plain", "v1", None).await;
        }
    }

    let cache = small_cache(dir.path(), &clock);
    let stats = cache.stats().await.unwrap();
    assert!(stats.total_bytes <= 8);
    assert!(cache.get("e", None).await.is_some());
    assert!(cache.get("a", None).await.is_none());
}

#[tokio::test]
async fn test_unversioned_legacy_entries_are_dropped() {
    let dir = tempdir().unwrap();

    {
        let cache = small_cache(dir.path(), &ManualClock::new(0));
        cache.put("fresh", b"ok", "text/plain", "v1", None).await;
    }

    // Strip the version tag from the sidecar and mark the store as schema 1
    let entries = dir.path().join("entries");
    for name in entry_files(dir.path()) {
        if name.ends_with(".meta.json") {
            let path = entries.join(&name);
            let mut record: serde_json::Value =
                serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
            record.as_object_mut().unwrap().remove("version_tag");
            std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        }
    }
    std::fs::write(dir.path().join("MANIFEST.json"), br#"{"schema_version":1}"#).unwrap();

    let cache = small_cache(dir.path(), &ManualClock::new(0));
    assert!(cache.get("fresh", None).await.is_none());
    assert!(entry_files(dir.path()).is_empty());

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("MANIFEST.json")).unwrap()).unwrap();
    assert_eq!(manifest["schema_version"], SCHEMA_VERSION);
}

// == Failure Handling ==

#[tokio::test]
async fn test_missing_payload_reads_as_miss() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    cache.put("R", b"data", "text/plain", "v1", None).await;
    for name in entry_files(dir.path()) {
        if name.ends_with(".bin") {
            std::fs::remove_file(dir.path().join("entries").join(name)).unwrap();
        }
    }

    assert!(cache.get("R", None).await.is_none());
    assert_eq!(cache.stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_write_failure_degrades_to_not_cached() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));
    cache.init().await.unwrap();

    // Pull the directory out from under the open store
    std::fs::remove_dir_all(dir.path().join("entries")).unwrap();

    let outcome = cache.put("R", b"data", "text/plain", "v1", None).await;
    assert_eq!(outcome, PutOutcome::Failed);
    assert!(cache.get("R", None).await.is_none());

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.entry_count, 0);
    assert_eq!(stats.write_failures, 1);
}

#[tokio::test]
async fn test_failed_replacement_does_not_serve_old_entry() {
    let dir = tempdir().unwrap();
    let cache = small_cache(dir.path(), &ManualClock::new(0));

    cache.put("R", b"old", "text/plain", "v1", None).await;
    std::fs::remove_dir_all(dir.path().join("entries")).unwrap();

    assert_eq!(
        cache.put("R", b"new", "text/plain", "v2", None).await,
        PutOutcome::Failed
    );
    assert!(cache.get("R", None).await.is_none());
}

// == Concurrency ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_shares_one_store() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(small_cache(dir.path(), &ManualClock::new(0)));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache.init().await.unwrap();
                cache.get(&format!("doc-{}", i), None).await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_none());
    }
    assert_eq!(cache.stats().await.unwrap().misses, 16);

    // Every caller wrote through the same open store
    let puts: Vec<_> = (0..4)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache.put(&format!("doc-{}", i), b"xy", "text/plain", "v1", None).await
            })
        })
        .collect();
    for handle in puts {
        assert!(handle.await.unwrap().is_stored());
    }
    assert_eq!(cache.stats().await.unwrap().entry_count, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_puts_respect_capacity() {
    let dir = tempdir().unwrap();
    let config = CacheConfig::new(dir.path())
        .with_capacity_bytes(64)
        .with_max_entry_bytes(16);
    let cache = Arc::new(ResourceCache::new(config));

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let payload = vec![i as u8; 4 + (i % 12)];
                let outcome = cache
                    .put(&format!("doc-{}", i), &payload, "application/pdf", "v1", None)
                    .await;
                let stats = cache.stats().await.unwrap();
                (outcome, stats.total_bytes)
            })
        })
        .collect();

    for handle in handles {
        let (outcome, total) = handle.await.unwrap();
        assert!(outcome.is_stored());
        assert!(total <= 64, "total {} exceeds capacity", total);
    }

    // What the index reports is what is on disk
    let stats = cache.stats().await.unwrap();
    let on_disk: u64 = entry_files(dir.path())
        .iter()
        .filter(|n| n.ends_with(".bin"))
        .map(|n| std::fs::metadata(dir.path().join("entries").join(n)).unwrap().len())
        .sum();
    assert_eq!(stats.total_bytes, on_disk);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_writes_see_whole_entries() {
    let dir = tempdir().unwrap();
    let config = CacheConfig::new(dir.path())
        .with_capacity_bytes(1024)
        .with_max_entry_bytes(256);
    let cache = Arc::new(ResourceCache::new(config));

    let writer = {
        let cache = cache.clone();
        tokio::spawn(async move {
            for round in 0..50u8 {
                let payload = vec![round; 200];
                cache
                    .put("shared", &payload, "application/pdf", &format!("v{}", round), None)
                    .await;
            }
        })
    };

    let reader = {
        let cache = cache.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                if let Some(entry) = cache.get("shared", None).await {
                    let first = entry.payload[0];
                    assert_eq!(entry.payload.len(), 200);
                    assert!(entry.payload.iter().all(|b| *b == first));
                    assert_eq!(entry.version_tag, format!("v{}", first));
                }
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}
