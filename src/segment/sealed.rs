use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::segment::active::ActiveSegment;
use crate::segment::Segment;

/// Size of the fixed trailer block appended after the sentinel on seal.
pub(crate) const TRAILER_SIZE: usize = 4096;

pub(crate) const TRAILER_MAGIC: u32 = 0x5452_4C52; // "TRLR"

/// How many record offsets fit in the trailer block:
/// magic + count + offsets + crc must stay within `TRAILER_SIZE`.
pub(crate) const TRAILER_MAX_ENTRIES: usize = (TRAILER_SIZE - 12) / 4;

/// An immutable segment.
///
/// Sealed segments carry a trailer holding their offset table so a reopen
/// is a single positioned read; when the table does not fit (or the trailer
/// was damaged), readers fall back to a full scan that stops cleanly at the
/// zero-length sentinel.
#[derive(Debug)]
pub(crate) struct SealedSegment {
    pub(crate) seg: Segment,
}

impl SealedSegment {
    pub(crate) fn new(seg: Segment) -> Self {
        Self { seg }
    }

    pub(crate) fn first_index(&self) -> u64 {
        self.seg.first_index
    }

    /// Sealed segments always hold at least one record.
    pub(crate) fn last_index(&self) -> u64 {
        self.seg.last_index().unwrap()
    }

    pub(crate) fn contains(&self, index: u64) -> bool {
        self.seg.contains(index)
    }

    /// The bytes written after the records on seal: a zero-length sentinel,
    /// then the trailer block when the offset table fits.
    pub(crate) fn tail_block(offsets: &[u32]) -> Vec<u8> {
        let count = offsets.len() - 1;

        let mut block = Vec::with_capacity(4 + TRAILER_SIZE);
        block.extend_from_slice(&0u32.to_le_bytes());

        if count > TRAILER_MAX_ENTRIES {
            return block;
        }

        let trailer_start = block.len();
        block.extend_from_slice(&TRAILER_MAGIC.to_le_bytes());
        block.extend_from_slice(&(count as u32).to_le_bytes());
        for off in &offsets[..count] {
            block.extend_from_slice(&off.to_le_bytes());
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&block[trailer_start..]);
        block.extend_from_slice(&hasher.finalize().to_le_bytes());

        block.resize(trailer_start + TRAILER_SIZE, 0);
        block
    }

    /// Attempts to rebuild the offset table from the trailer block at the
    /// end of the file. Returns `None` when there is no valid trailer, in
    /// which case the caller rebuilds by scan.
    pub(crate) fn try_load_trailer(
        f: &File,
        file_size: u64,
    ) -> Result<Option<Vec<u32>>, io::Error> {
        if file_size < (4 + TRAILER_SIZE) as u64 {
            return Ok(None);
        }

        let records_end = file_size - (4 + TRAILER_SIZE) as u64;
        if records_end > u32::MAX as u64 {
            return Ok(None);
        }

        let mut block = vec![0u8; TRAILER_SIZE];
        f.read_exact_at(&mut block, file_size - TRAILER_SIZE as u64)?;

        if LittleEndian::read_u32(&block[0..4]) != TRAILER_MAGIC {
            return Ok(None);
        }

        let count = LittleEndian::read_u32(&block[4..8]) as usize;
        if count == 0 || count > TRAILER_MAX_ENTRIES {
            return Ok(None);
        }

        let table_end = 8 + 4 * count;
        let stored_crc =
            LittleEndian::read_u32(&block[table_end..table_end + 4]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&block[..table_end]);
        if hasher.finalize() != stored_crc {
            return Ok(None);
        }

        let mut offsets = Vec::with_capacity(count + 1);
        for i in 0..count {
            offsets.push(LittleEndian::read_u32(&block[8 + 4 * i..12 + 4 * i]));
        }
        offsets.push(records_end as u32);

        // The table must describe a plausible record layout.
        if offsets[0] != 0 {
            return Ok(None);
        }
        for w in offsets.windows(2) {
            if w[0] >= w[1] {
                return Ok(None);
            }
        }

        Ok(Some(offsets))
    }

    /// Reopens the segment for appending: strips the sentinel and trailer
    /// so the file ends at its last record again.
    pub(crate) fn unseal(self) -> Result<ActiveSegment, io::Error> {
        let end = self.seg.records_end();
        self.seg.f.set_len(end)?;
        self.seg.f.sync_data()?;

        Ok(ActiveSegment::from_segment(self.seg))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::SealedSegment;
    use super::TRAILER_MAGIC;
    use super::TRAILER_SIZE;

    #[test]
    fn test_tail_block_layout() {
        let offsets = vec![0u32, 30, 61, 86];
        let block = SealedSegment::tail_block(&offsets);

        // sentinel + fixed-size trailer
        assert_eq!(block.len(), 4 + TRAILER_SIZE);
        assert_eq!(block[0..4], 0u32.to_le_bytes());
        assert_eq!(block[4..8], TRAILER_MAGIC.to_le_bytes());
        assert_eq!(block[8..12], 3u32.to_le_bytes());
        assert_eq!(block[12..16], 0u32.to_le_bytes());
        assert_eq!(block[16..20], 30u32.to_le_bytes());
        assert_eq!(block[20..24], 61u32.to_le_bytes());
    }

    #[test]
    fn test_trailer_roundtrip() {
        let offsets = vec![0u32, 30, 61, 86];
        let block = SealedSegment::tail_block(&offsets);

        let mut f = tempfile::tempfile().unwrap();
        // Records are irrelevant here; only their length matters.
        f.write_all(&vec![7u8; 86]).unwrap();
        f.write_all(&block).unwrap();

        let file_size = 86 + block.len() as u64;
        let got =
            SealedSegment::try_load_trailer(&f, file_size).unwrap().unwrap();
        assert_eq!(got, offsets);
    }

    #[test]
    fn test_trailer_rejects_damage() {
        let offsets = vec![0u32, 30, 61];
        let mut block = SealedSegment::tail_block(&offsets);
        // Flip a bit inside the offset table.
        block[17] ^= 0x01;

        let mut f = tempfile::tempfile().unwrap();
        f.write_all(&vec![7u8; 61]).unwrap();
        f.write_all(&block).unwrap();

        let file_size = 61 + block.len() as u64;
        let got = SealedSegment::try_load_trailer(&f, file_size).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn test_oversized_table_skips_trailer() {
        let offsets: Vec<u32> = (0..=2000u32).map(|i| i * 25).collect();
        let block = SealedSegment::tail_block(&offsets);
        assert_eq!(block.len(), 4);
    }
}
