use std::sync::RwLock;

use crate::api::storage::Storage;
use crate::api::types::Entry;
use crate::api::types::HardState;
use crate::api::types::Lookup;
use crate::api::types::SnapshotMeta;
use crate::errors::StorageError;

#[derive(Debug, Default)]
struct MemCore {
    entries: Vec<Entry>,
    hard: HardState,
    snapshot: SnapshotMeta,
}

impl MemCore {
    fn first_index(&self) -> u64 {
        self.entries
            .first()
            .map(|e| e.index)
            .unwrap_or(self.snapshot.index + 1)
    }

    fn last_index(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.index)
            .unwrap_or(self.snapshot.index)
    }

    fn position(&self, index: u64) -> usize {
        (index - self.entries[0].index) as usize
    }
}

/// In-memory storage satisfying the same contract as
/// [`DiskStorage`](crate::DiskStorage), with nothing persisted.
///
/// Useful for tests of a consensus module that should not touch the file
/// system, and as the executable reference of the contract itself.
#[derive(Debug)]
pub struct MemStorage {
    inner: RwLock<Option<MemCore>>,
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStorage {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Some(MemCore::default())),
        }
    }

    /// Starts as a logically empty log whose next accepted index is
    /// `first_index`, mirroring the disk storage's seeded open.
    pub fn with_first_index(first_index: u64) -> Self {
        let snapshot = SnapshotMeta {
            index: first_index.saturating_sub(1),
            ..Default::default()
        };
        Self {
            inner: RwLock::new(Some(MemCore {
                snapshot,
                ..Default::default()
            })),
        }
    }
}

impl Storage for MemStorage {
    fn first_index(&self) -> Result<u64, StorageError> {
        let guard = self.inner.read().unwrap();
        let core = guard.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(core.first_index())
    }

    fn last_index(&self) -> Result<u64, StorageError> {
        let guard = self.inner.read().unwrap();
        let core = guard.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(core.last_index())
    }

    fn term(&self, index: u64) -> Result<Lookup<u64>, StorageError> {
        let guard = self.inner.read().unwrap();
        let core = guard.as_ref().ok_or(StorageError::NotOpen)?;

        if index == core.snapshot.index {
            return Ok(Lookup::Found(core.snapshot.term));
        }
        if index < core.first_index() {
            return Ok(Lookup::Compacted);
        }
        let last = core.last_index();
        if index > last {
            return Err(StorageError::OutOfBound { index, last });
        }
        Ok(Lookup::Found(core.entries[core.position(index)].term))
    }

    fn entries(
        &self,
        lo: u64,
        hi: u64,
        max_bytes: u64,
    ) -> Result<Lookup<Vec<Entry>>, StorageError> {
        let guard = self.inner.read().unwrap();
        let core = guard.as_ref().ok_or(StorageError::NotOpen)?;

        if lo > hi {
            return Err(StorageError::invalid_argument(format!(
                "invalid range [{}, {})",
                lo, hi
            )));
        }
        if lo < core.first_index() {
            return Ok(Lookup::Compacted);
        }
        let last = core.last_index();
        if hi > last.saturating_add(1) {
            return Err(StorageError::OutOfBound { index: hi, last });
        }

        let mut out = Vec::new();
        let mut total: u64 = 0;
        for index in lo..hi {
            let entry = core.entries[core.position(index)].clone();
            let size = entry.on_disk_size();
            if !out.is_empty() && total.saturating_add(size) > max_bytes {
                break;
            }
            total += size;
            out.push(entry);
        }
        Ok(Lookup::Found(out))
    }

    fn store_entries(&self, entries: &[Entry]) -> Result<(), StorageError> {
        let mut guard = self.inner.write().unwrap();
        let core = guard.as_mut().ok_or(StorageError::NotOpen)?;

        if entries.is_empty() {
            return Err(StorageError::invalid_argument(
                "entries must not be empty",
            ));
        }
        if entries[0].index == 0 {
            return Err(StorageError::invalid_argument(
                "log index 0 is reserved",
            ));
        }
        for w in entries.windows(2) {
            if w[1].index != w[0].index + 1 {
                return Err(StorageError::invalid_argument(format!(
                    "entry indices must ascend by 1: {} then {}",
                    w[0].index, w[1].index
                )));
            }
        }

        let last = core.last_index();
        let base = entries[0].index;
        if base > last + 1 {
            return Err(StorageError::OutOfOrder {
                start: base,
                expected: last + 1,
            });
        }

        let mut batch = entries;
        if base <= core.snapshot.index {
            let skip = (core.snapshot.index - base + 1) as usize;
            if skip >= batch.len() {
                return Ok(());
            }
            batch = &batch[skip..];
        }

        let base = batch[0].index;
        if !core.entries.is_empty() && base <= core.last_index() {
            let keep = (base - core.entries[0].index) as usize;
            core.entries.truncate(keep);
        }

        core.entries.extend_from_slice(batch);
        Ok(())
    }

    fn store_hard_state(&self, hs: &HardState) -> Result<(), StorageError> {
        let mut guard = self.inner.write().unwrap();
        let core = guard.as_mut().ok_or(StorageError::NotOpen)?;
        core.hard = *hs;
        Ok(())
    }

    fn hard_state(&self) -> Result<HardState, StorageError> {
        let guard = self.inner.read().unwrap();
        let core = guard.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(core.hard)
    }

    fn snapshot_meta(&self) -> Result<SnapshotMeta, StorageError> {
        let guard = self.inner.read().unwrap();
        let core = guard.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(core.snapshot.clone())
    }

    fn apply_snapshot(&self, meta: SnapshotMeta) -> Result<(), StorageError> {
        let mut guard = self.inner.write().unwrap();
        let core = guard.as_mut().ok_or(StorageError::NotOpen)?;

        if meta.index < core.snapshot.index {
            return Err(StorageError::invalid_argument(format!(
                "snapshot index must advance: {} < current {}",
                meta.index, core.snapshot.index
            )));
        }

        core.snapshot = meta;
        let idx = core.snapshot.index;
        core.entries.retain(|e| e.index > idx);
        Ok(())
    }

    fn applied_to(&self, _index: u64) -> Result<(), StorageError> {
        let guard = self.inner.read().unwrap();
        guard.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(())
    }

    fn truncate(&self, _index: u64) -> Result<(), StorageError> {
        let guard = self.inner.read().unwrap();
        guard.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.inner.write().unwrap();
        guard.take().ok_or(StorageError::NotOpen)?;
        Ok(())
    }

    fn destroy(&self, _backup: bool) -> Result<(), StorageError> {
        let mut guard = self.inner.write().unwrap();
        guard.take().ok_or(StorageError::NotOpen)?;
        Ok(())
    }
}
