//! On-disk framing of a single log entry.
//!
//! A record is laid out as:
//!
//! ```text
//! [u32 length][u32 crc32][u64 index][u64 term][u8 kind][payload bytes]
//! ```
//!
//! All fields little-endian. `length` covers the 17-byte header
//! (index/term/kind) plus the payload; the checksum covers the header and
//! payload but not `length` or itself. A zero `length` marks the end of
//! valid data inside a file.

use std::io;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::api::types::Entry;
use crate::api::types::EntryType;

/// Bytes of the checksummed record header: index + term + kind.
pub(crate) const RECORD_HEADER_SIZE: usize = 17;

/// Bytes a record occupies beyond its payload: length + crc + header.
pub(crate) const RECORD_OVERHEAD: usize = 8 + RECORD_HEADER_SIZE;

/// Upper bound accepted for the `length` field. Anything larger is treated
/// as frame corruption rather than attempted as an allocation.
pub(crate) const MAX_RECORD_LEN: u32 = 1 << 30;

/// Why decoding a record frame stopped.
#[derive(Debug)]
pub(crate) enum FrameError {
    /// A zero length prefix: the end-of-records sentinel, or preallocated
    /// zeroes after a crash.
    EndMarker,
    /// The reader ran out of bytes in the middle of a record.
    Torn,
    /// The frame is internally inconsistent: impossible length, checksum
    /// mismatch, or unknown entry type.
    Corrupt(String),
    Io(io::Error),
}

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::EndMarker => io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zero-length record marks end of data",
            ),
            FrameError::Torn => io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "incomplete record",
            ),
            FrameError::Corrupt(reason) => {
                io::Error::new(io::ErrorKind::InvalidData, reason)
            }
            FrameError::Io(e) => e,
        }
    }
}

fn checksum_of(entry: &Entry) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&entry.index.to_le_bytes());
    hasher.update(&entry.term.to_le_bytes());
    hasher.update(&[entry.kind.as_u8()]);
    hasher.update(&entry.payload);
    hasher.finalize()
}

/// Reads one record frame, distinguishing the end marker and torn records
/// from true corruption so the scan policy can treat them differently.
pub(crate) fn read_frame<R: io::Read>(
    r: &mut R,
) -> Result<Entry, FrameError> {
    let map_eof = |e: io::Error| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Torn
        } else {
            FrameError::Io(e)
        }
    };

    let len = r.read_u32::<LittleEndian>().map_err(map_eof)?;
    if len == 0 {
        return Err(FrameError::EndMarker);
    }
    if len < RECORD_HEADER_SIZE as u32 || len > MAX_RECORD_LEN {
        return Err(FrameError::Corrupt(format!(
            "record length {} out of range",
            len
        )));
    }

    let crc = r.read_u32::<LittleEndian>().map_err(map_eof)?;
    let index = r.read_u64::<LittleEndian>().map_err(map_eof)?;
    let term = r.read_u64::<LittleEndian>().map_err(map_eof)?;
    let kind_byte = r.read_u8().map_err(map_eof)?;

    let payload_len = len as usize - RECORD_HEADER_SIZE;
    let mut payload = vec![0u8; payload_len];
    r.read_exact(&mut payload).map_err(map_eof)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&index.to_le_bytes());
    hasher.update(&term.to_le_bytes());
    hasher.update(&[kind_byte]);
    hasher.update(&payload);
    let got = hasher.finalize();

    if got != crc {
        return Err(FrameError::Corrupt(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            crc, got
        )));
    }

    let kind = EntryType::from_u8(kind_byte).ok_or_else(|| {
        FrameError::Corrupt(format!("unknown entry type {}", kind_byte))
    })?;

    Ok(Entry {
        index,
        term,
        kind,
        payload,
    })
}

impl codeq::Encode for Entry {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        let len = RECORD_HEADER_SIZE + self.payload.len();

        w.write_u32::<LittleEndian>(len as u32)?;
        w.write_u32::<LittleEndian>(checksum_of(self))?;
        w.write_u64::<LittleEndian>(self.index)?;
        w.write_u64::<LittleEndian>(self.term)?;
        w.write_u8(self.kind.as_u8())?;
        w.write_all(&self.payload)?;

        Ok(RECORD_OVERHEAD + self.payload.len())
    }
}

impl codeq::Decode for Entry {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        read_frame(&mut r).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use codeq::Decode;
    use codeq::Encode;

    use super::read_frame;
    use super::FrameError;
    use super::RECORD_OVERHEAD;
    use crate::api::types::Entry;
    use crate::api::types::EntryType;

    #[test]
    fn test_record_codec() -> Result<(), io::Error> {
        let entry = Entry::new(3, 2, EntryType::Normal, b"hello".to_vec());

        let mut b = Vec::new();
        let n = entry.encode(&mut b)?;
        assert_eq!(n, b.len());
        assert_eq!(n, RECORD_OVERHEAD + 5);

        // length covers header + payload
        assert_eq!(b[0..4], 22u32.to_le_bytes());
        // header fields are little-endian after the two u32 prefixes
        assert_eq!(b[8..16], 3u64.to_le_bytes());
        assert_eq!(b[16..24], 2u64.to_le_bytes());
        assert_eq!(b[24], 0);
        assert_eq!(b[25..], *b"hello");

        // the stored checksum covers header + payload
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&b[8..]);
        assert_eq!(b[4..8], hasher.finalize().to_le_bytes());

        let decoded = Entry::decode(&mut b.as_slice())?;
        assert_eq!(entry, decoded);

        Ok(())
    }

    #[test]
    fn test_decode_end_marker() {
        let b = 0u32.to_le_bytes();
        let res = read_frame(&mut b.as_slice());
        assert!(matches!(res, Err(FrameError::EndMarker)));
    }

    #[test]
    fn test_decode_torn_record() -> Result<(), io::Error> {
        let entry = Entry::new(1, 1, EntryType::Normal, b"world".to_vec());
        let mut b = Vec::new();
        entry.encode(&mut b)?;

        // Chop bytes off the end: every prefix must read as torn.
        b.truncate(b.len() - 3);
        let res = read_frame(&mut b.as_slice());
        assert!(matches!(res, Err(FrameError::Torn)));

        b.truncate(6);
        let res = read_frame(&mut b.as_slice());
        assert!(matches!(res, Err(FrameError::Torn)));

        Ok(())
    }

    #[test]
    fn test_decode_corrupt_record() -> Result<(), io::Error> {
        let entry = Entry::new(1, 1, EntryType::Noop, vec![]);
        let mut b = Vec::new();
        entry.encode(&mut b)?;

        // Flip a payload-covered byte: checksum must catch it.
        b[10] ^= 0xff;
        let res = read_frame(&mut b.as_slice());
        assert!(matches!(res, Err(FrameError::Corrupt(_))));

        Ok(())
    }
}
