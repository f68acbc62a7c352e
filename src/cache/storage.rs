//! Disk Storage Module
//!
//! Persists entries as a payload file plus a JSON metadata sidecar, named by
//! the SHA-256 of the resource id:
//!
//! ```text
//! <cache_dir>/MANIFEST.json
//! <cache_dir>/entries/<hash>.bin
//! <cache_dir>/entries/<hash>.meta.json
//! ```
//!
//! Every file is written to a `.tmp` path and renamed into place, so a
//! reader never observes a partially written entry.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::cache::EntryMeta;
use crate::error::{CacheError, Result};

/// Current on-disk layout. Version 1 entries carried no version tag.
pub const SCHEMA_VERSION: u32 = 2;

const MANIFEST_FILE: &str = "MANIFEST.json";
const ENTRIES_DIR: &str = "entries";
const PAYLOAD_EXT: &str = ".bin";
const META_EXT: &str = ".meta.json";
const TMP_EXT: &str = ".tmp";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    schema_version: u32,
}

// == Entry Record ==
/// Metadata as written to disk.
///
/// Fields added after schema 1 default when absent so legacy sidecars still
/// parse and can be recognised as un-versioned.
#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    resource_id: String,
    content_type: String,
    #[serde(default)]
    file_name: Option<String>,
    byte_size: u64,
    created_at: u64,
    #[serde(default)]
    version_tag: Option<String>,
    #[serde(default)]
    sequence: u64,
}

impl From<&EntryMeta> for EntryRecord {
    fn from(meta: &EntryMeta) -> Self {
        Self {
            resource_id: meta.resource_id.clone(),
            content_type: meta.content_type.clone(),
            file_name: meta.file_name.clone(),
            byte_size: meta.byte_size,
            created_at: meta.created_at,
            version_tag: Some(meta.version_tag.clone()),
            sequence: meta.sequence,
        }
    }
}

impl EntryRecord {
    /// Converts to in-memory metadata, or None for an un-versioned record.
    fn into_meta(self) -> Option<EntryMeta> {
        let version_tag = self.version_tag.filter(|v| !v.is_empty())?;
        Some(EntryMeta {
            resource_id: self.resource_id,
            content_type: self.content_type,
            file_name: self.file_name,
            byte_size: self.byte_size,
            created_at: self.created_at,
            version_tag,
            sequence: self.sequence,
        })
    }
}

// == Open Report ==
/// What was found on disk when the store was opened.
#[derive(Debug, Default)]
pub struct OpenReport {
    /// Entries that passed validation, oldest first
    pub entries: Vec<EntryMeta>,
    /// Entries dropped because they carried no version tag
    pub unversioned: usize,
    /// Corrupted, mismatched or orphaned files removed
    pub discarded: usize,
}

// == Disk Storage ==
/// Filesystem backing for the cache.
#[derive(Debug)]
pub struct DiskStorage {
    entries_dir: PathBuf,
}

impl DiskStorage {
    // == Open ==
    /// Opens or creates the store under `root`, reconciling what is on disk.
    pub async fn open(root: &Path) -> Result<(Self, OpenReport)> {
        let entries_dir = root.join(ENTRIES_DIR);
        fs::create_dir_all(&entries_dir).await.map_err(|e| {
            CacheError::Initialization(format!(
                "cannot create {}: {}",
                entries_dir.display(),
                e
            ))
        })?;

        let previous = read_manifest(root).await?;
        match previous {
            Some(version) if version > SCHEMA_VERSION => {
                return Err(CacheError::Initialization(format!(
                    "store schema {} is newer than supported schema {}",
                    version, SCHEMA_VERSION
                )));
            }
            Some(version) if version == SCHEMA_VERSION => {}
            Some(version) => info!(
                "Migrating resource cache from schema {} to {}",
                version, SCHEMA_VERSION
            ),
            None => debug!("No manifest found, initializing schema {}", SCHEMA_VERSION),
        }

        let storage = Self { entries_dir };
        let report = storage
            .reconcile()
            .await
            .map_err(|e| CacheError::Initialization(format!("cannot scan store: {}", e)))?;

        if previous != Some(SCHEMA_VERSION) {
            write_manifest(root)
                .await
                .map_err(|e| CacheError::Initialization(format!("cannot write manifest: {}", e)))?;
        }

        if report.unversioned > 0 {
            info!(
                "Dropped {} un-versioned entries from a previous schema",
                report.unversioned
            );
        }
        if report.discarded > 0 {
            warn!("Discarded {} corrupted or orphaned cache files", report.discarded);
        }

        Ok((storage, report))
    }

    // == Read Payload ==
    /// Reads the payload for `meta`, checking it against the recorded size.
    pub async fn read_payload(&self, meta: &EntryMeta) -> Result<Vec<u8>> {
        let path = self.payload_path(&meta.resource_id);
        let payload = fs::read(&path)
            .await
            .map_err(|e| CacheError::read(&meta.resource_id, e))?;

        if payload.len() as u64 != meta.byte_size {
            return Err(CacheError::read(
                &meta.resource_id,
                io::Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "payload is {} bytes, expected {}",
                        payload.len(),
                        meta.byte_size
                    ),
                ),
            ));
        }

        Ok(payload)
    }

    // == Write Entry ==
    /// Persists `meta` and `payload`, replacing any previous entry for the id.
    ///
    /// The old sidecar is removed before the new payload lands, so a crash in
    /// between leaves an orphan payload rather than a sidecar describing the
    /// wrong bytes.
    pub async fn write_entry(&self, meta: &EntryMeta, payload: &[u8]) -> Result<()> {
        let id = &meta.resource_id;
        let payload_path = self.payload_path(id);
        let meta_path = self.meta_path(id);
        let payload_tmp = tmp_path(&payload_path);
        let meta_tmp = tmp_path(&meta_path);

        let record = serde_json::to_vec(&EntryRecord::from(meta))?;

        let staged = async {
            write_synced(&payload_tmp, payload).await?;
            write_synced(&meta_tmp, &record).await?;
            remove_if_exists(&meta_path).await?;
            fs::rename(&payload_tmp, &payload_path).await?;
            fs::rename(&meta_tmp, &meta_path).await
        }
        .await;

        if let Err(e) = staged {
            let _ = remove_if_exists(&payload_tmp).await;
            let _ = remove_if_exists(&meta_tmp).await;
            return Err(CacheError::write(id, e));
        }

        Ok(())
    }

    // == Remove Entry ==
    /// Deletes both files for `resource_id`. Missing files are not an error.
    ///
    /// The sidecar goes first: once it is gone the entry no longer exists on
    /// disk, and a leftover payload is cleaned up at the next open.
    pub async fn remove_entry(&self, resource_id: &str) -> Result<()> {
        remove_if_exists(&self.meta_path(resource_id))
            .await
            .map_err(|e| CacheError::write(resource_id, e))?;
        if let Err(e) = remove_if_exists(&self.payload_path(resource_id)).await {
            warn!("Orphaned payload for {} left behind: {}", resource_id, e);
        }
        Ok(())
    }

    // == Clear ==
    /// Deletes every file in the entries directory.
    pub async fn clear(&self) -> Result<()> {
        let mut dir = fs::read_dir(&self.entries_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            remove_if_exists(&item.path()).await?;
        }
        Ok(())
    }

    fn payload_path(&self, resource_id: &str) -> PathBuf {
        self.entries_dir
            .join(format!("{}{}", file_stem(resource_id), PAYLOAD_EXT))
    }

    fn meta_path(&self, resource_id: &str) -> PathBuf {
        self.entries_dir
            .join(format!("{}{}", file_stem(resource_id), META_EXT))
    }

    // == Reconcile ==
    /// Loads every valid sidecar and removes files that cannot be served.
    async fn reconcile(&self) -> io::Result<OpenReport> {
        let mut report = OpenReport::default();
        let mut payload_sizes: HashMap<String, u64> = HashMap::new();
        let mut sidecars: Vec<(String, PathBuf)> = Vec::new();

        let mut dir = fs::read_dir(&self.entries_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };

            if name.ends_with(TMP_EXT) {
                remove_if_exists(&path).await?;
                report.discarded += 1;
            } else if let Some(stem) = name.strip_suffix(META_EXT) {
                sidecars.push((stem.to_string(), path));
            } else if let Some(stem) = name.strip_suffix(PAYLOAD_EXT) {
                payload_sizes.insert(stem.to_string(), item.metadata().await?.len());
            }
        }

        for (stem, meta_path) in sidecars {
            let record = match fs::read(&meta_path).await {
                Ok(bytes) => serde_json::from_slice::<EntryRecord>(&bytes).ok(),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            let keep = match record {
                None => {
                    debug!("Unreadable sidecar {}", meta_path.display());
                    report.discarded += 1;
                    None
                }
                Some(record) if file_stem(&record.resource_id) != stem => {
                    report.discarded += 1;
                    None
                }
                Some(record) => match record.into_meta() {
                    None => {
                        report.unversioned += 1;
                        None
                    }
                    Some(meta) if payload_sizes.get(&stem) != Some(&meta.byte_size) => {
                        debug!("Payload missing or truncated for {}", meta.resource_id);
                        report.discarded += 1;
                        None
                    }
                    Some(meta) => Some(meta),
                },
            };

            match keep {
                Some(meta) => {
                    payload_sizes.remove(&stem);
                    report.entries.push(meta);
                }
                None => {
                    remove_if_exists(&meta_path).await?;
                    let payload = self.entries_dir.join(format!("{}{}", stem, PAYLOAD_EXT));
                    if payload_sizes.remove(&stem).is_some() {
                        remove_if_exists(&payload).await?;
                    }
                }
            }
        }

        // Whatever payloads remain have no valid sidecar
        for stem in payload_sizes.into_keys() {
            remove_if_exists(&self.entries_dir.join(format!("{}{}", stem, PAYLOAD_EXT))).await?;
            report.discarded += 1;
        }

        report
            .entries
            .sort_by(|a, b| (a.sequence, a.created_at).cmp(&(b.sequence, b.created_at)));
        Ok(report)
    }
}

// == Utility Functions ==
/// Hex SHA-256 of the resource id, used as the on-disk file stem.
fn file_stem(resource_id: &str) -> String {
    hex::encode(Sha256::digest(resource_id.as_bytes()))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TMP_EXT);
    PathBuf::from(name)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn read_manifest(root: &Path) -> Result<Option<u32>> {
    match fs::read(root.join(MANIFEST_FILE)).await {
        Ok(bytes) => {
            // An unreadable manifest is treated like a legacy store
            Ok(serde_json::from_slice::<Manifest>(&bytes)
                .map(|m| m.schema_version)
                .ok()
                .or(Some(1)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::Initialization(format!(
            "cannot read manifest: {}",
            e
        ))),
    }
}

async fn write_manifest(root: &Path) -> io::Result<()> {
    let path = root.join(MANIFEST_FILE);
    let tmp = tmp_path(&path);
    let bytes = serde_json::to_vec(&Manifest {
        schema_version: SCHEMA_VERSION,
    })
    .map_err(io::Error::from)?;
    write_synced(&tmp, &bytes).await?;
    fs::rename(&tmp, &path).await
}
