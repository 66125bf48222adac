//! Durable offline store
//!
//! Snapshots that could not be delivered are written to a directory, one JSON
//! file per snapshot, named `metrics_<YYYYmmdd>_<HHMMSS>_<nanos>.json` after
//! the snapshot's own timestamp. Files are written to a temporary name and
//! renamed into place so a reader never sees a partial record. Temporary
//! files left by a crash are removed when the store is opened.

use crate::error::{StorageError, StorageResult};
use devpulse_core::Snapshot;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions, ReadDir};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const RECORD_PREFIX: &str = "metrics_";
const RECORD_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".tmp";

/// Directory-backed queue of undelivered snapshots
#[derive(Clone)]
pub struct OfflineStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl OfflineStore {
    /// Open a store, creating its directory if needed
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;

        let store = Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        };
        let removed = store.remove_temp_files()?;
        if removed > 0 {
            warn!("Removed {} incomplete offline records", removed);
        }

        info!("Offline store initialized at {}", store.root.display());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a snapshot as a new record and return its path
    pub fn persist(&self, snapshot: &Snapshot) -> StorageResult<PathBuf> {
        let json = serde_json::to_vec(snapshot).map_err(StorageError::Serialize)?;

        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.root).map_err(|e| StorageError::io(&self.root, e))?;

        let stem = format!(
            "{}{}",
            RECORD_PREFIX,
            snapshot.timestamp().format("%Y%m%d_%H%M%S_%f")
        );
        let (path, tmp, mut file) = self.claim_name(&stem)?;

        let written = file.write_all(&json).and_then(|_| file.sync_all());
        drop(file);
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::io(&path, e));
        }

        debug!("Persisted snapshot to {}", path.display());
        Ok(path)
    }

    /// Pick a free record name and create its temporary file
    fn claim_name(&self, stem: &str) -> StorageResult<(PathBuf, PathBuf, fs::File)> {
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("{}{}", stem, RECORD_SUFFIX)
            } else {
                format!("{}-{}{}", stem, suffix, RECORD_SUFFIX)
            };
            let path = self.root.join(name);
            let tmp = path.with_extension("tmp");

            if !path.exists() {
                match OpenOptions::new().write(true).create_new(true).open(&tmp) {
                    Ok(file) => return Ok((path, tmp, file)),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(StorageError::io(&tmp, e)),
                }
            }
            suffix += 1;
        }
    }

    /// Delete temporary files from writes that never completed
    fn remove_temp_files(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock();
        let dir = fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))?;

        let mut removed = 0;
        for entry in dir.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(RECORD_PREFIX) && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(entry.path(), e)),
            }
        }
        Ok(removed)
    }

    /// Iterate over stored records in directory order
    ///
    /// Each call starts a fresh pass over the directory.
    pub fn list_pending(&self) -> StorageResult<PendingEntries> {
        match fs::read_dir(&self.root) {
            Ok(dir) => Ok(PendingEntries { dir: Some(dir) }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PendingEntries { dir: None }),
            Err(e) => Err(StorageError::io(&self.root, e)),
        }
    }

    /// Delete a record; a record that is already gone is not an error
    pub fn remove(&self, entry: &PendingEntry) -> StorageResult<()> {
        match fs::remove_file(&entry.path) {
            Ok(()) => {
                debug!("Removed offline record {}", entry.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&entry.path, e)),
        }
    }

    /// Number of stored records
    pub fn pending_count(&self) -> StorageResult<usize> {
        Ok(self.list_pending()?.count())
    }

    /// Record count and total size
    pub fn stats(&self) -> StorageResult<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in self.list_pending()? {
            stats.pending += 1;
            match fs::metadata(entry.path()) {
                Ok(meta) => stats.bytes += meta.len(),
                Err(e) => warn!("Failed to stat {}: {}", entry.path().display(), e),
            }
        }
        Ok(stats)
    }

    /// Delete unparseable records last modified more than `max_age` ago
    ///
    /// Returns the number of records removed.
    pub fn purge_corrupt(&self, max_age: Duration) -> StorageResult<usize> {
        let now = SystemTime::now();
        let mut purged = 0;

        for entry in self.list_pending()? {
            if !matches!(entry.load(), Err(ref e) if e.is_corrupt()) {
                continue;
            }
            let age = entry
                .modified()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if age >= max_age {
                warn!("Purging corrupt offline record {}", entry.path().display());
                self.remove(&entry)?;
                purged += 1;
            }
        }

        if purged > 0 {
            info!("Purged {} corrupt offline records", purged);
        }
        Ok(purged)
    }
}

/// Offline store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records waiting for replay
    pub pending: usize,

    /// Total size of those records in bytes
    pub bytes: u64,
}

/// One stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    path: PathBuf,
}

impl PendingEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the stored snapshot
    pub fn load(&self) -> StorageResult<Snapshot> {
        let content =
            fs::read_to_string(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        Snapshot::from_json(&content).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}

/// Lazy iterator over stored records
pub struct PendingEntries {
    dir: Option<ReadDir>,
}

impl Iterator for PendingEntries {
    type Item = PendingEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let dir = self.dir.as_mut()?;
        for item in dir.by_ref() {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read offline store entry: {}", e);
                    continue;
                }
            };
            if is_record_name(&entry.file_name().to_string_lossy()) {
                return Some(PendingEntry { path: entry.path() });
            }
        }
        None
    }
}

fn is_record_name(name: &str) -> bool {
    name.starts_with(RECORD_PREFIX) && name.ends_with(RECORD_SUFFIX)
}
