use std::path::PathBuf;

use crate::errors::InvalidSegmentFileName;
use crate::num;

/// Configuration for a disk storage instance.
///
/// Optional parameters are `Option<T>` in this struct; the default value is
/// evaluated when a getter method is called.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Base directory holding the META file and segment files.
    pub dir: String,

    /// Target size in bytes at which the active segment is sealed and a new
    /// tail is rolled.
    pub log_file_size: Option<u64>,

    /// Maximum number of sealed segments to keep past the applied index.
    /// `0` disables the cap.
    pub max_log_files: Option<usize>,

    /// Whether to tolerate a corrupt record inside a sealed segment at open
    /// time by truncating the log from that record to the end.
    ///
    /// A corrupt or torn record at the end of the last segment is always
    /// tolerated; it models a crash in the middle of an append.
    pub allow_corrupt_startup: Option<bool>,

    /// Seeds a logically empty log whose next accepted index is the given
    /// value. Only effective when the directory holds no segments and no
    /// snapshot has been installed.
    pub initial_first_index: Option<u64>,

    /// Size of the buffer used when scanning a segment at open time.
    pub read_buffer_size: Option<usize>,
}

impl Config {
    pub fn new(dir: impl ToString) -> Self {
        Self {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    /// Returns the roll threshold in bytes (defaults to 16 MiB).
    pub fn log_file_size(&self) -> u64 {
        self.log_file_size.unwrap_or(16 * 1024 * 1024)
    }

    /// Returns the sealed-segment retention cap (defaults to 0, unlimited).
    pub fn max_log_files(&self) -> usize {
        self.max_log_files.unwrap_or(0)
    }

    /// Returns whether mid-log corruption is tolerated at open (defaults to
    /// false).
    pub fn allow_corrupt_startup(&self) -> bool {
        self.allow_corrupt_startup.unwrap_or(false)
    }

    /// Returns the seeded first index (defaults to 0, i.e. not seeded).
    pub fn initial_first_index(&self) -> u64 {
        self.initial_first_index.unwrap_or(0)
    }

    /// Returns the scan buffer size in bytes (defaults to 1 MiB).
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.unwrap_or(1024 * 1024)
    }

    /// Returns the path of the META file.
    pub(crate) fn meta_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(Self::META_FILE_NAME)
    }

    /// Returns the path META is staged at before the atomic rename.
    pub(crate) fn meta_tmp_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(Self::META_TMP_FILE_NAME)
    }

    /// Returns the full path for a segment file.
    pub(crate) fn segment_path(&self, seqno: u64, first_index: u64) -> PathBuf {
        PathBuf::from(&self.dir)
            .join(Self::segment_file_name(seqno, first_index))
    }

    pub(crate) const META_FILE_NAME: &'static str = "META";
    pub(crate) const META_TMP_FILE_NAME: &'static str = "META.tmp";

    /// Generates the file name for a segment.
    ///
    /// The format is `<seqno:016>-<first_index:020>.log`.
    pub(crate) fn segment_file_name(seqno: u64, first_index: u64) -> String {
        format!(
            "{}-{}.log",
            num::format_pad16_u64(seqno),
            num::format_pad20_u64(first_index)
        )
    }

    /// Parses a segment file name into `(seqno, first_index)`.
    pub(crate) fn parse_segment_file_name(
        file_name: &str,
    ) -> Result<(u64, u64), InvalidSegmentFileName> {
        let stem = file_name.strip_suffix(".log").ok_or_else(|| {
            InvalidSegmentFileName::new(file_name, "has no '.log' suffix")
        })?;

        let (seq_str, index_str) = stem.split_once('-').ok_or_else(|| {
            InvalidSegmentFileName::new(file_name, "has no '-' separator")
        })?;

        if seq_str.len() != 16 || !seq_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(InvalidSegmentFileName::new(
                file_name,
                "seqno is not 16 digits",
            ));
        }

        if index_str.len() != 20
            || !index_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(InvalidSegmentFileName::new(
                file_name,
                "first index is not 20 digits",
            ));
        }

        let seqno = seq_str.parse::<u64>().map_err(|e| {
            InvalidSegmentFileName::new(
                file_name,
                format!("cannot parse seqno as u64: {}", e),
            )
        })?;

        let first_index = index_str.parse::<u64>().map_err(|e| {
            InvalidSegmentFileName::new(
                file_name,
                format!("cannot parse first index as u64: {}", e),
            )
        })?;

        Ok((seqno, first_index))
    }
}
