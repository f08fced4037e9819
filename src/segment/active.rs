use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use codeq::Encode;
use log::info;

use crate::api::types::Entry;
use crate::meta::sync_dir;
use crate::segment::sealed::SealedSegment;
use crate::segment::Segment;
use crate::Config;

/// The mutable tail segment accepting appends.
///
/// Appends are encoded into a pending buffer and pushed onto the offset
/// table immediately; the bytes reach the file on [`flush`](Self::flush) and
/// become durable on [`sync`](Self::sync). The façade flushes and syncs
/// once per store batch.
#[derive(Debug)]
pub(crate) struct ActiveSegment {
    pub(crate) seg: Segment,

    /// Encoded records not yet written to the file.
    pending: Vec<u8>,

    /// Byte offset up to which the file content matches the offset table.
    flushed_end: u64,
}

impl ActiveSegment {
    /// Creates a fresh, empty tail segment file.
    pub(crate) fn create(
        config: &Config,
        seqno: u64,
        first_index: u64,
    ) -> Result<Self, io::Error> {
        let path = config.segment_path(seqno, first_index);
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        sync_dir(&config.dir)?;

        info!("Created tail segment '{}'", path.display());

        let seg = Segment {
            f: Arc::new(f),
            path,
            seqno,
            first_index,
            offsets: vec![0],
        };

        Ok(Self {
            seg,
            pending: Vec::new(),
            flushed_end: 0,
        })
    }

    /// Wraps a scanned segment reopened for appending.
    pub(crate) fn from_segment(seg: Segment) -> Self {
        let flushed_end = seg.records_end();
        Self {
            seg,
            pending: Vec::new(),
            flushed_end,
        }
    }

    /// Size of the segment including buffered records, compared against
    /// `log_file_size` to decide when to roll.
    pub(crate) fn size(&self) -> u64 {
        self.seg.records_end()
    }

    pub(crate) fn append(&mut self, entry: &Entry) -> Result<(), io::Error> {
        debug_assert_eq!(entry.index, self.seg.next_index());

        let n = entry.encode(&mut self.pending)?;
        let end = self.seg.records_end() + n as u64;
        self.seg.offsets.push(end as u32);
        Ok(())
    }

    /// Writes buffered records to the file. Not yet durable; callers pair
    /// this with [`sync`](Self::sync).
    pub(crate) fn flush(&mut self) -> Result<(), io::Error> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.seg.f.write_all_at(&self.pending, self.flushed_end)?;
        self.pending.clear();
        self.flushed_end = self.seg.records_end();
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<(), io::Error> {
        self.seg.f.sync_data()
    }

    /// Removes all entries at and above `index` by truncating the file at
    /// the recorded record boundary.
    pub(crate) fn truncate_from(&mut self, index: u64) -> Result<(), io::Error> {
        debug_assert!(self.seg.contains(index));
        let count = (index - self.seg.first_index) as usize;
        self.truncate_to_count(count)
    }

    /// Rewinds the segment to its first `count` records, discarding
    /// buffered and written bytes beyond that boundary.
    pub(crate) fn truncate_to_count(
        &mut self,
        count: usize,
    ) -> Result<(), io::Error> {
        self.pending.clear();

        let end = self.seg.offsets[count] as u64;
        self.seg.f.set_len(end)?;
        self.seg.f.sync_data()?;

        self.seg.offsets.truncate(count + 1);
        self.flushed_end = end;
        Ok(())
    }

    /// Flushes, writes the end-of-records sentinel plus the offset-table
    /// trailer, and makes the segment immutable.
    pub(crate) fn seal(mut self) -> Result<SealedSegment, io::Error> {
        debug_assert!(!self.seg.is_empty());

        self.flush()?;

        let block = SealedSegment::tail_block(&self.seg.offsets);
        self.seg.f.write_all_at(&block, self.seg.records_end())?;
        self.seg.f.sync_all()?;

        info!(
            "Sealed segment '{}': [{}, {}]",
            self.seg.path.display(),
            self.seg.first_index,
            self.seg.last_index().unwrap_or(self.seg.first_index),
        );

        Ok(SealedSegment::new(self.seg))
    }
}
