//! Public data types of the log storage engine.

/// Discriminates what a log entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    /// A client command to be applied to the state machine.
    #[default]
    Normal,
    /// A cluster membership change.
    ConfChange,
    /// An empty entry a new leader appends to commit its term.
    Noop,
}

impl EntryType {
    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            EntryType::Normal => 0,
            EntryType::ConfChange => 1,
            EntryType::Noop => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EntryType::Normal),
            1 => Some(EntryType::ConfChange),
            2 => Some(EntryType::Noop),
            _ => None,
        }
    }
}

/// One consensus log record.
///
/// The engine inspects only `index` and `term`; the payload is opaque bytes
/// serialized by the consensus layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryType,
    pub payload: Vec<u8>,
}

impl Entry {
    pub fn new(
        index: u64,
        term: u64,
        kind: EntryType,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            index,
            term,
            kind,
            payload,
        }
    }

    /// The number of bytes this entry occupies on disk, including the record
    /// frame. This is the size [`Storage::entries`] accumulates against
    /// `max_bytes`.
    ///
    /// [`Storage::entries`]: crate::Storage::entries
    pub fn on_disk_size(&self) -> u64 {
        crate::record::RECORD_OVERHEAD as u64 + self.payload.len() as u64
    }
}

/// The minimal consensus metadata whose loss would violate safety.
///
/// `term` and `vote` must be durable before an election RPC acknowledging
/// them returns; `commit` can always be re-derived and is persisted as a
/// restart optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

/// Metadata of an installed snapshot.
///
/// Its `index` is the compaction point: all entries at or below it are
/// logically erased, and `term(index)` answers with `term` afterwards.
/// `conf` and `user_data` are opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotMeta {
    pub index: u64,
    pub term: u64,
    pub conf: Vec<u8>,
    pub user_data: Vec<u8>,
}

/// Outcome of a read that may land below the compaction point.
///
/// A lagging reader asking for compacted indices is an expected condition,
/// not an error: the caller reacts by sending a snapshot instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Compacted,
}

impl<T> Lookup<T> {
    pub fn is_compacted(&self) -> bool {
        matches!(self, Lookup::Compacted)
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Compacted => None,
        }
    }
}
