use crate::api::types::Entry;
use crate::api::types::HardState;
use crate::api::types::Lookup;
use crate::api::types::SnapshotMeta;
use crate::errors::StorageError;

/// The storage contract a consensus module drives.
///
/// A single writer and any number of concurrent readers are supported per
/// instance; the owning consensus module serializes writes. All operations
/// are synchronous and may block on disk I/O.
pub trait Storage {
    /// The index of the first live entry.
    ///
    /// When the log is empty this is `snapshot.index + 1`, so
    /// `first_index() == last_index() + 1` represents an empty log.
    fn first_index(&self) -> Result<u64, StorageError>;

    /// The index of the last live entry, or `snapshot.index` when the log is
    /// empty.
    fn last_index(&self) -> Result<u64, StorageError>;

    /// The term of the entry at `index`.
    ///
    /// The compaction point itself answers with the snapshot term; indices
    /// below the retained prefix report [`Lookup::Compacted`].
    fn term(&self, index: u64) -> Result<Lookup<u64>, StorageError>;

    /// Returns entries in `[lo, hi)`, accumulating until the cumulative
    /// on-disk size would exceed `max_bytes`.
    ///
    /// At least one entry is returned even if it alone exceeds `max_bytes`,
    /// so a caller paging through the log always makes progress. A `lo`
    /// below the retained prefix reports [`Lookup::Compacted`] with no
    /// entries.
    fn entries(
        &self,
        lo: u64,
        hi: u64,
        max_bytes: u64,
    ) -> Result<Lookup<Vec<Entry>>, StorageError>;

    /// Appends a batch of entries with consecutive ascending indices.
    ///
    /// A batch starting at or below `last_index()` first truncates the
    /// conflicting suffix of the stored log; a batch starting beyond
    /// `last_index() + 1` is rejected with
    /// [`StorageError::OutOfOrder`]. Entries already covered by the
    /// snapshot are silently dropped. The batch is durable when this
    /// returns: the engine fsyncs once at the end.
    fn store_entries(&self, entries: &[Entry]) -> Result<(), StorageError>;

    /// Persists the hard state through an atomic META replace.
    fn store_hard_state(&self, hs: &HardState) -> Result<(), StorageError>;

    /// The last persisted hard state.
    fn hard_state(&self) -> Result<HardState, StorageError>;

    /// The last installed snapshot metadata.
    fn snapshot_meta(&self) -> Result<SnapshotMeta, StorageError>;

    /// Installs snapshot metadata and compacts the log prefix it covers.
    ///
    /// Snapshots must monotonically advance: `meta.index` below the current
    /// snapshot index is rejected.
    fn apply_snapshot(&self, meta: SnapshotMeta) -> Result<(), StorageError>;

    /// Records the applied-index hint that gates retention. Segments are
    /// only deleted below this point.
    fn applied_to(&self, index: u64) -> Result<(), StorageError>;

    /// Requests compaction of the prefix up to `index`. Whole segments with
    /// `last_index <= min(applied, index)` are deleted; a segment straddling
    /// the boundary is retained.
    fn truncate(&self, index: u64) -> Result<(), StorageError>;

    /// Flushes and closes the instance. A mutable tail stays mutable across
    /// close and reopen.
    fn close(&self) -> Result<(), StorageError>;

    /// Closes the instance, then removes the directory, or renames it to
    /// `<dir>.bak.<unix-seconds>` when `backup` is true.
    fn destroy(&self, backup: bool) -> Result<(), StorageError>;
}
