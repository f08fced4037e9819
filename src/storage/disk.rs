use std::fs;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use log::info;

use crate::api::storage::Storage;
use crate::api::types::Entry;
use crate::api::types::HardState;
use crate::api::types::Lookup;
use crate::api::types::SnapshotMeta;
use crate::errors::StorageError;
use crate::file_lock::FileLock;
use crate::storage::core::Core;
use crate::Config;

struct Inner {
    core: Core,

    /// Held for the storage lifetime; released on close or destroy.
    _dir_lock: FileLock,
}

/// Disk-backed log storage for one replication group.
///
/// Mutating operations take the instance write lock; reads take the shared
/// lock and see a consistent segment index without observing in-flight
/// appends. `None` inside the lock means the instance has been closed or
/// destroyed.
pub struct DiskStorage {
    config: Arc<Config>,
    inner: RwLock<Option<Inner>>,
}

impl DiskStorage {
    /// Opens or creates the storage directory, acquires its exclusive lock,
    /// and replays the segments on disk.
    pub fn open(config: Config) -> Result<Self, StorageError> {
        let config = Arc::new(config);

        fs::create_dir_all(&config.dir)?;
        let dir_lock = FileLock::new(config.clone())?;
        let core = Core::open(config.clone())?;

        info!(
            "Opened storage '{}': index range [{}, {}]",
            config.dir,
            core.first_index(),
            core.last_index(),
        );

        Ok(Self {
            config,
            inner: RwLock::new(Some(Inner {
                core,
                _dir_lock: dir_lock,
            })),
        })
    }

    /// Number of live segment files.
    pub fn files_count(&self) -> Result<usize, StorageError> {
        let guard = self.inner.read().unwrap();
        let inner = guard.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(inner.core.files_count())
    }

    fn with_core<T>(
        &self,
        f: impl FnOnce(&Core) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.inner.read().unwrap();
        let inner = guard.as_ref().ok_or(StorageError::NotOpen)?;
        f(&inner.core)
    }

    fn with_core_mut<T>(
        &self,
        f: impl FnOnce(&mut Core) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.inner.write().unwrap();
        let inner = guard.as_mut().ok_or(StorageError::NotOpen)?;
        f(&mut inner.core)
    }
}

impl Storage for DiskStorage {
    fn first_index(&self) -> Result<u64, StorageError> {
        self.with_core(|c| Ok(c.first_index()))
    }

    fn last_index(&self) -> Result<u64, StorageError> {
        self.with_core(|c| Ok(c.last_index()))
    }

    fn term(&self, index: u64) -> Result<Lookup<u64>, StorageError> {
        self.with_core(|c| c.term(index))
    }

    fn entries(
        &self,
        lo: u64,
        hi: u64,
        max_bytes: u64,
    ) -> Result<Lookup<Vec<Entry>>, StorageError> {
        self.with_core(|c| c.entries(lo, hi, max_bytes))
    }

    fn store_entries(&self, entries: &[Entry]) -> Result<(), StorageError> {
        self.with_core_mut(|c| c.store_entries(entries))
    }

    fn store_hard_state(&self, hs: &HardState) -> Result<(), StorageError> {
        self.with_core_mut(|c| c.store_hard_state(hs))
    }

    fn hard_state(&self) -> Result<HardState, StorageError> {
        self.with_core(|c| Ok(c.hard_state()))
    }

    fn snapshot_meta(&self) -> Result<SnapshotMeta, StorageError> {
        self.with_core(|c| Ok(c.snapshot_meta()))
    }

    fn apply_snapshot(&self, meta: SnapshotMeta) -> Result<(), StorageError> {
        self.with_core_mut(|c| c.apply_snapshot(meta))
    }

    fn applied_to(&self, index: u64) -> Result<(), StorageError> {
        self.with_core_mut(|c| {
            c.applied_to(index);
            Ok(())
        })
    }

    fn truncate(&self, index: u64) -> Result<(), StorageError> {
        self.with_core_mut(|c| c.truncate(index))
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.inner.write().unwrap();
        let mut inner = guard.take().ok_or(StorageError::NotOpen)?;
        inner.core.close()?;

        info!("Closed storage '{}'", self.config.dir);
        Ok(())
    }

    fn destroy(&self, backup: bool) -> Result<(), StorageError> {
        let mut guard = self.inner.write().unwrap();
        // Releases every file handle and the directory lock before the
        // directory itself is unlinked or renamed.
        let inner = guard.take().ok_or(StorageError::NotOpen)?;
        drop(inner);

        if backup {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| {
                    StorageError::invalid_argument(format!(
                        "system clock error: {}",
                        e
                    ))
                })?
                .as_secs();
            let bak = format!("{}.bak.{}", self.config.dir, secs);
            fs::rename(&self.config.dir, &bak)?;
            info!("Destroyed storage '{}', backup at '{}'", self.config.dir, bak);
        } else {
            fs::remove_dir_all(&self.config.dir)?;
            info!("Destroyed storage '{}'", self.config.dir);
        }
        Ok(())
    }
}
