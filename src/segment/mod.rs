pub(crate) mod active;
pub(crate) mod record_iterator;
pub(crate) mod sealed;

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Seek;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use byteorder::ByteOrder;
use byteorder::LittleEndian;
use codeq::Decode;

use crate::api::types::Entry;
use crate::errors::StorageError;
use crate::record::RECORD_OVERHEAD;
use crate::segment::record_iterator::RecordIterator;
use crate::Config;

/// One segment file holding a contiguous range of log entries, together
/// with the in-memory offset table that makes entry reads a single
/// positioned read.
///
/// Reads use `read_exact_at` so concurrent readers never race on a shared
/// file cursor.
#[derive(Debug)]
pub(crate) struct Segment {
    pub(crate) f: Arc<File>,
    pub(crate) path: PathBuf,
    pub(crate) seqno: u64,
    pub(crate) first_index: u64,

    /// Local byte offset of each record boundary. There are count + 1
    /// entries; the last one is the end of record data, which is not
    /// necessarily the file size once a seal trailer is written.
    pub(crate) offsets: Vec<u32>,
}

impl Segment {
    pub(crate) fn count(&self) -> usize {
        self.offsets.len() - 1
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub(crate) fn last_index(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.first_index + self.count() as u64 - 1)
        }
    }

    /// The index the next appended entry must carry.
    pub(crate) fn next_index(&self) -> u64 {
        self.first_index + self.count() as u64
    }

    pub(crate) fn contains(&self, index: u64) -> bool {
        index >= self.first_index && index < self.next_index()
    }

    /// End of record data in bytes.
    pub(crate) fn records_end(&self) -> u64 {
        *self.offsets.last().unwrap() as u64
    }

    fn record_range(&self, index: u64) -> (u64, usize) {
        let i = (index - self.first_index) as usize;
        let start = self.offsets[i];
        let end = self.offsets[i + 1];
        (start as u64, (end - start) as usize)
    }

    pub(crate) fn read_entry(
        &self,
        index: u64,
    ) -> Result<Entry, StorageError> {
        let (offset, len) = self.record_range(index);

        let mut buf = vec![0u8; len];
        self.f.read_exact_at(&mut buf, offset)?;

        let entry = Entry::decode(&mut buf.as_slice()).map_err(|e| {
            StorageError::corrupt(self.path.display(), offset, e)
        })?;

        if entry.index != index {
            return Err(StorageError::corrupt(
                self.path.display(),
                offset,
                format!(
                    "record holds index {}, expected {}",
                    entry.index, index
                ),
            ));
        }

        Ok(entry)
    }

    /// Reads only the record header to answer a term query without touching
    /// the payload.
    pub(crate) fn read_term(&self, index: u64) -> Result<u64, StorageError> {
        let (offset, _len) = self.record_range(index);

        let mut buf = [0u8; RECORD_OVERHEAD];
        self.f.read_exact_at(&mut buf, offset)?;

        let stored_index = LittleEndian::read_u64(&buf[8..16]);
        if stored_index != index {
            return Err(StorageError::corrupt(
                self.path.display(),
                offset,
                format!(
                    "record holds index {}, expected {}",
                    stored_index, index
                ),
            ));
        }

        Ok(LittleEndian::read_u64(&buf[16..24]))
    }

    pub(crate) fn open_segment_file(
        config: &Config,
        seqno: u64,
        first_index: u64,
    ) -> Result<File, io::Error> {
        let path = config.segment_path(seqno, first_index);
        OpenOptions::new().read(true).write(true).open(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("open segment '{}': {}", path.display(), e),
            )
        })
    }
}

/// Where record data ends and why, as discovered by a scan.
#[derive(Debug)]
pub(crate) enum ScanEnd {
    /// Clean end of file.
    Eof,
    /// A zero length prefix: the seal sentinel, or zeroes left by a crash.
    EndMarker { offset: u64 },
    /// The file ends in the middle of a record.
    Torn { offset: u64 },
    /// An internally inconsistent record.
    Corrupt { offset: u64, reason: String },
}

#[derive(Debug)]
pub(crate) struct ScanOutcome {
    /// Boundaries of the valid record prefix; count + 1 entries.
    pub(crate) offsets: Vec<u32>,
    pub(crate) end: ScanEnd,
}

/// Rebuilds the offset table by reading records sequentially from offset 0,
/// validating each checksum and the index continuity.
pub(crate) fn scan(
    f: &File,
    file_size: u64,
    buf_size: usize,
    first_index: u64,
    path: &Path,
) -> Result<ScanOutcome, StorageError> {
    let mut fr = f;
    fr.seek(io::SeekFrom::Start(0))?;
    let reader = io::BufReader::with_capacity(buf_size, fr);

    let mut offsets: Vec<u32> = vec![0];
    let mut end = ScanEnd::Eof;

    for res in RecordIterator::new(reader, file_size) {
        match res {
            Ok((start, record_end, entry)) => {
                let expected = first_index + (offsets.len() - 1) as u64;
                if entry.index != expected {
                    end = ScanEnd::Corrupt {
                        offset: start,
                        reason: format!(
                            "record holds index {}, expected {}",
                            entry.index, expected
                        ),
                    };
                    break;
                }
                offsets.push(record_end as u32);
            }
            Err(record_iterator::ScanStop::EndMarker { offset }) => {
                end = ScanEnd::EndMarker { offset };
                break;
            }
            Err(record_iterator::ScanStop::Torn { offset }) => {
                end = ScanEnd::Torn { offset };
                break;
            }
            Err(record_iterator::ScanStop::Corrupt { offset, reason }) => {
                end = ScanEnd::Corrupt { offset, reason };
                break;
            }
            Err(record_iterator::ScanStop::Io(e)) => {
                return Err(StorageError::Io(io::Error::new(
                    e.kind(),
                    format!("scan '{}': {}", path.display(), e),
                )));
            }
        }
    }

    Ok(ScanOutcome { offsets, end })
}
