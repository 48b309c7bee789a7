//! Queue entry storage
//!
//! The engine only needs get/set/delete on `fingerprint -> queued_at`.
//! Two implementations:
//! - [`MemoryStore`]: concurrent map, lost on restart
//! - [`DirectoryStore`]: one JSON file per fingerprint, survives restarts
//!
//! Keys are independent in both stores, so pending actions never contend
//! with each other at the storage layer.
//!
//! The directory store may be shared by several processes. Each key then has
//! a `<hex>.lock` file, and the engine holds an exclusive advisory lock on it
//! across every read-then-write of that key.

use dashmap::DashMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::Fingerprint;

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";
const LOCK_EXTENSION: &str = "lock";

/// Storage failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt queue entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Exclusive hold on one key, released on drop
#[derive(Debug)]
pub struct EntryLock {
    _file: Option<File>,
}

impl EntryLock {
    /// Nothing to hold beyond the engine's in-process lock
    pub fn in_process() -> Self {
        Self { _file: None }
    }
}

/// Keyed store of pending fingerprints
///
/// Every operation is atomic for its key; no partially written entry is
/// ever observable.
pub trait GuardStore: Send + Sync {
    /// Hold `fingerprint` exclusively until the returned guard is dropped
    ///
    /// The engine already serializes callers inside one process. A store
    /// that other processes can reach must also exclude them here.
    fn lock(&self, _fingerprint: &Fingerprint) -> Result<EntryLock, StoreError> {
        Ok(EntryLock::in_process())
    }

    /// Queue timestamp for a fingerprint, if pending
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<u64>, StoreError>;

    fn set(&self, fingerprint: &Fingerprint, queued_at: u64) -> Result<(), StoreError>;

    /// Remove an entry; removing an absent entry is not an error
    fn delete(&self, fingerprint: &Fingerprint) -> Result<(), StoreError>;

    /// All pending entries, in no particular order
    fn entries(&self) -> Result<Vec<(Fingerprint, u64)>, StoreError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<Fingerprint, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GuardStore for MemoryStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<u64>, StoreError> {
        Ok(self.entries.get(fingerprint).map(|e| *e.value()))
    }

    fn set(&self, fingerprint: &Fingerprint, queued_at: u64) -> Result<(), StoreError> {
        self.entries.insert(*fingerprint, queued_at);
        Ok(())
    }

    fn delete(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.entries.remove(fingerprint);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(Fingerprint, u64)>, StoreError> {
        Ok(self
            .entries
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect())
    }
}

/// On-disk record for one queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueRecord {
    fingerprint: Fingerprint,
    queued_at: u64,
}

/// Durable store with one file per fingerprint
///
/// Layout: `<root>/<fingerprint hex>.json` containing
/// `{"fingerprint": "<hex>", "queued_at": <secs>}`. Writes go to a temp file
/// that is synced and then renamed over the entry. Lock files
/// (`<hex>.lock`) are left in place; they carry no data.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (and create if missing) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;

        info!("Opened guard store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(format!("{}.{}", fingerprint.to_hex(), ENTRY_EXTENSION))
    }

    fn lock_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(format!("{}.{}", fingerprint.to_hex(), LOCK_EXTENSION))
    }

    fn read_record(path: &Path) -> Result<Option<QueueRecord>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

impl GuardStore for DirectoryStore {
    fn lock(&self, fingerprint: &Fingerprint) -> Result<EntryLock, StoreError> {
        let path = self.lock_path(fingerprint);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;
        // Blocks while another process works on the same key
        file.lock_exclusive().map_err(io_err)?;

        Ok(EntryLock { _file: Some(file) })
    }

    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<u64>, StoreError> {
        let path = self.entry_path(fingerprint);
        match Self::read_record(&path)? {
            Some(record) if record.fingerprint == *fingerprint => Ok(Some(record.queued_at)),
            Some(record) => Err(StoreError::Corrupt {
                path,
                reason: format!("entry holds fingerprint {}", record.fingerprint),
            }),
            None => Ok(None),
        }
    }

    fn set(&self, fingerprint: &Fingerprint, queued_at: u64) -> Result<(), StoreError> {
        let path = self.entry_path(fingerprint);
        let tmp = path.with_extension(TEMP_EXTENSION);
        let io_err = |source| StoreError::Io {
            path: tmp.clone(),
            source,
        };

        let record = QueueRecord {
            fingerprint: *fingerprint,
            queued_at,
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(fingerprint = %fingerprint.short(), queued_at, "Wrote queue entry");
        Ok(())
    }

    fn delete(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        let path = self.entry_path(fingerprint);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(fingerprint = %fingerprint.short(), "Removed queue entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn entries(&self) -> Result<Vec<(Fingerprint, u64)>, StoreError> {
        let dir = std::fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for item in dir {
            let item = item.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }

            let named: Option<Fingerprint> = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse().ok());
            let Some(named) = named else {
                return Err(StoreError::Corrupt {
                    path,
                    reason: "file name is not a fingerprint".to_string(),
                });
            };

            match Self::read_record(&path)? {
                Some(record) if record.fingerprint == named => {
                    entries.push((record.fingerprint, record.queued_at))
                }
                Some(record) => {
                    return Err(StoreError::Corrupt {
                        path,
                        reason: format!("entry holds fingerprint {}", record.fingerprint),
                    })
                }
                // Deleted between read_dir and read
                None => warn!("Queue entry vanished during listing: {}", path.display()),
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 32])
    }

    #[test]
    fn test_memory_store_independent_keys() {
        let store = MemoryStore::new();
        store.set(&fp(1), 10).unwrap();
        store.set(&fp(2), 20).unwrap();

        store.delete(&fp(1)).unwrap();
        assert_eq!(store.get(&fp(1)).unwrap(), None);
        assert_eq!(store.get(&fp(2)).unwrap(), Some(20));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_directory_store_persists_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = DirectoryStore::open(dir.path()).unwrap();
            store.set(&fp(3), 1_700_000_000).unwrap();
        }

        let reopened = DirectoryStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&fp(3)).unwrap(), Some(1_700_000_000));
        assert_eq!(reopened.entries().unwrap(), vec![(fp(3), 1_700_000_000)]);
    }

    #[test]
    fn test_directory_store_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();

        store.set(&fp(4), 5).unwrap();
        store.delete(&fp(4)).unwrap();
        store.delete(&fp(4)).unwrap();
        assert_eq!(store.get(&fp(4)).unwrap(), None);
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_directory_store_layout() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        store.set(&fp(5), 99).unwrap();

        let path = dir.path().join(format!("{}.json", fp(5).to_hex()));
        let content = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["queued_at"], 99);
        assert_eq!(value["fingerprint"], fp(5).to_hex());

        // No temp files left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .map(|x| x == TEMP_EXTENSION)
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_directory_store_detects_corruption() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();

        let path = dir.path().join(format!("{}.json", fp(6).to_hex()));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            store.get(&fp(6)),
            Err(StoreError::Corrupt { .. })
        ));

        // Entry file whose content names another fingerprint
        let record = format!(r#"{{"fingerprint":"{}","queued_at":1}}"#, fp(7).to_hex());
        std::fs::write(&path, record).unwrap();
        assert!(matches!(
            store.get(&fp(6)),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_listing_rejects_misnamed_entry() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        store.set(&fp(8), 1).unwrap();
        assert_eq!(store.entries().unwrap(), vec![(fp(8), 1)]);

        // Entry copied under another fingerprint's name
        std::fs::copy(
            dir.path().join(format!("{}.json", fp(8).to_hex())),
            dir.path().join(format!("{}.json", fp(9).to_hex())),
        )
        .unwrap();
        assert!(matches!(store.entries(), Err(StoreError::Corrupt { .. })));
        assert!(matches!(store.get(&fp(9)), Err(StoreError::Corrupt { .. })));

        std::fs::remove_file(dir.path().join(format!("{}.json", fp(9).to_hex()))).unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        assert!(matches!(store.entries(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_entry_lock_excludes_other_handles() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();

        let held = store.lock(&fp(10)).unwrap();
        let other = File::open(dir.path().join(format!("{}.lock", fp(10).to_hex()))).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        // Other keys are not blocked
        let _unrelated = store.lock(&fp(11)).unwrap();

        drop(held);
        assert!(other.try_lock_exclusive().is_ok());
        other.unlock().unwrap();

        // Lock files are not listed as entries
        assert!(store.entries().unwrap().is_empty());
    }
}
