use std::io;

/// A reader that tracks how many bytes have been consumed.
///
/// The scan path uses the running offset to record record boundaries and to
/// report the exact position of a torn or corrupt record.
pub(crate) struct OffsetReader<R> {
    inner: R,
    offset: u64,
}

impl<R: io::Read> OffsetReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: io::Read> io::Read for OffsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}
