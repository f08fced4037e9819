use std::io;

/// Error returned by every fallible storage operation.
///
/// `Compacted` is deliberately absent: an index falling below the retained
/// prefix is an expected condition for a lagging reader, and read operations
/// report it through [`Lookup::Compacted`](crate::Lookup) instead.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum StorageError {
    #[error("index {index} is out of bound, last index is {last}")]
    OutOfBound { index: u64, last: u64 },

    #[error(
        "entries start at index {start} but the next acceptable index is \
        {expected}; storing them would leave a hole"
    )]
    OutOfOrder { start: u64, expected: u64 },

    #[error("corrupt data in '{path}' at offset {offset}: {reason}")]
    Corrupt {
        path: String,
        offset: u64,
        reason: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage is not open")]
    NotOpen,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub(crate) fn corrupt(
        path: impl ToString,
        offset: u64,
        reason: impl ToString,
    ) -> Self {
        Self::Corrupt {
            path: path.to_string(),
            offset,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_argument(reason: impl ToString) -> Self {
        Self::InvalidArgument(reason.to_string())
    }
}

/// Error indicating that a file name does not follow the
/// `<seqno>-<first_index>.log` segment naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Invalid segment file name: {bad_file_name}: {reason}")]
pub struct InvalidSegmentFileName {
    pub bad_file_name: String,
    pub reason: String,
}

impl InvalidSegmentFileName {
    pub fn new(bad_file_name: impl ToString, reason: impl ToString) -> Self {
        Self {
            bad_file_name: bad_file_name.to_string(),
            reason: reason.to_string(),
        }
    }
}
