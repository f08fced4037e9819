use std::io;

use crate::api::types::Entry;
use crate::offset_reader::OffsetReader;
use crate::record::read_frame;
use crate::record::FrameError;

/// Why a scan stopped before the end of the file.
#[derive(Debug)]
pub(crate) enum ScanStop {
    EndMarker { offset: u64 },
    Torn { offset: u64 },
    Corrupt { offset: u64, reason: String },
    Io(io::Error),
}

/// Iterates records from the start of a segment file, yielding each record's
/// byte range. Stops at the file end, or yields a single terminal error and
/// then fuses.
pub(crate) struct RecordIterator<R> {
    r: OffsetReader<R>,
    total_size: u64,
    done: bool,
}

impl<R> RecordIterator<R>
where R: io::Read
{
    pub(crate) fn new(r: R, total_size: u64) -> Self {
        Self {
            r: OffsetReader::new(r),
            total_size,
            done: false,
        }
    }
}

impl<R> Iterator for RecordIterator<R>
where R: io::Read
{
    type Item = Result<(u64, u64, Entry), ScanStop>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start = self.r.offset();
        if start == self.total_size {
            self.done = true;
            return None;
        }

        let res = match read_frame(&mut self.r) {
            Ok(entry) => Ok((start, self.r.offset(), entry)),
            Err(FrameError::EndMarker) => {
                Err(ScanStop::EndMarker { offset: start })
            }
            Err(FrameError::Torn) => Err(ScanStop::Torn { offset: start }),
            Err(FrameError::Corrupt(reason)) => Err(ScanStop::Corrupt {
                offset: start,
                reason,
            }),
            Err(FrameError::Io(e)) => Err(ScanStop::Io(e)),
        };

        if res.is_err() {
            self.done = true;
        }

        Some(res)
    }
}
