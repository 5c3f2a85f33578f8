use crc32fast::Hasher as Crc32;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;

use crate::{Record, RecordError, Result};

/// Default read buffer for record streams (64 KiB).
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// A `BufRead` adapter that tracks the absolute stream position and can
/// checksum every byte that passes through it.
pub struct CountingReader<R> {
    inner: R,
    position: u64,
    hasher: Option<Crc32>,
}

impl<R: BufRead> CountingReader<R> {
    pub fn new(inner: R, position: u64) -> Self {
        Self {
            inner,
            position,
            hasher: None,
        }
    }

    /// Absolute byte offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn enable_checksum(&mut self) {
        self.hasher = Some(Crc32::new());
    }

    fn checksum(&self) -> Option<u32> {
        self.hasher.as_ref().map(|h| h.clone().finalize())
    }
}

impl<R: BufRead> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(h) = self.hasher.as_mut() {
            h.update(&buf[..n]);
        }
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if let Some(h) = self.hasher.as_mut() {
            // The bytes being consumed are already buffered, so this never
            // touches the underlying reader.
            if let Ok(buf) = self.inner.fill_buf() {
                h.update(&buf[..amt.min(buf.len())]);
            }
        }
        self.inner.consume(amt);
        self.position += amt as u64;
    }
}

/// Pull-based reader over a record stream.
///
/// Every record can be read three ways: [`read_new`](Self::read_new)
/// allocates a fresh value, [`read_into`](Self::read_into) overwrites a
/// caller-supplied instance, and [`read_raw`](Self::read_raw) copies the
/// encoded bytes without decoding.
///
/// A reader created with [`bounded`](Self::bounded) yields only the records
/// that start inside its `[offset, offset + length)` window.
pub struct RecordReader<T, R: Read> {
    src: CountingReader<BufReader<R>>,
    /// Absolute offset the reader started at (after boundary sync).
    start: u64,
    /// Records must start strictly before this absolute offset.
    limit: Option<u64>,
    /// Declared stream length, used only for progress.
    length: Option<u64>,
    expected_crc: Option<u32>,
    records: u64,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record, R: Read> RecordReader<T, R> {
    /// Wraps `inner`, which must be positioned at a record boundary.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_READ_BUFFER, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self::from_parts(BufReader::with_capacity(capacity.max(1), inner), 0)
    }

    fn from_parts(inner: BufReader<R>, position: u64) -> Self {
        Self {
            src: CountingReader::new(inner, position),
            start: position,
            limit: None,
            length: None,
            expected_crc: None,
            records: 0,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Declares the total stream length so [`progress`](Self::progress) can
    /// report a fraction.
    #[must_use]
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Verifies the CRC32 of the whole stream once the end is reached.
    ///
    /// Must be set before the first read.
    #[must_use]
    pub fn verify_crc32(mut self, expected: u32) -> Self {
        self.expected_crc = Some(expected);
        self.src.enable_checksum();
        self
    }

    /// Reads the next record into a freshly allocated value.
    pub fn read_new(&mut self) -> Result<Option<T>> {
        if !self.can_start()? {
            return Ok(None);
        }
        match T::decode(&mut self.src)? {
            Some(rec) => {
                self.records += 1;
                Ok(Some(rec))
            }
            None => {
                self.finish_stream()?;
                Ok(None)
            }
        }
    }

    /// Reads the next record into `scratch`. Returns `false` at end of
    /// stream, leaving `scratch` untouched.
    pub fn read_into(&mut self, scratch: &mut T) -> Result<bool> {
        if !self.can_start()? {
            return Ok(false);
        }
        if scratch.decode_into(&mut self.src)? {
            self.records += 1;
            Ok(true)
        } else {
            self.finish_stream()?;
            Ok(false)
        }
    }

    /// Replaces the contents of `out` with the encoded bytes of the next
    /// record.
    pub fn read_raw(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        out.clear();
        if !self.can_start()? {
            return Ok(false);
        }
        if T::read_raw(&mut self.src, out)? {
            self.records += 1;
            Ok(true)
        } else {
            self.finish_stream()?;
            Ok(false)
        }
    }

    /// Number of bytes consumed since the reader started.
    pub fn bytes_read(&self) -> u64 {
        self.src.position() - self.start
    }

    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// `true` once the end of the stream (or window) has been reached.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fraction of the declared length consumed, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.done {
            return 1.0;
        }
        match self.length {
            Some(0) => 1.0,
            Some(len) => (self.bytes_read() as f64 / len as f64).min(1.0) as f32,
            None => 0.0,
        }
    }

    fn can_start(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        if let Some(limit) = self.limit {
            if self.src.position() >= limit {
                self.done = true;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn finish_stream(&mut self) -> Result<()> {
        self.done = true;
        if let (Some(expected), Some(actual)) = (self.expected_crc, self.src.checksum()) {
            if expected != actual {
                return Err(RecordError::ChecksumMismatch { expected, actual });
            }
        }
        Ok(())
    }
}

impl<T: Record, R: Read + Seek> RecordReader<T, R> {
    /// Opens a window over `inner` that yields the records starting in
    /// `[offset, offset + length)`.
    ///
    /// Offset 0 is always supported. Any other offset requires the codec's
    /// boundary-sync rule; codecs without one fail with
    /// [`RecordError::NotSyncable`]. The last record of a window may extend
    /// past `offset + length`; the following window skips it.
    pub fn bounded(inner: R, offset: u64, length: u64) -> Result<Self> {
        Self::bounded_with_capacity(DEFAULT_READ_BUFFER, inner, offset, length)
    }

    pub fn bounded_with_capacity(
        capacity: usize,
        mut inner: R,
        offset: u64,
        length: u64,
    ) -> Result<Self> {
        let limit = offset.saturating_add(length);
        let mut reader = if offset == 0 {
            inner.seek(SeekFrom::Start(0))?;
            Self::from_parts(BufReader::with_capacity(capacity.max(1), inner), 0)
        } else {
            // Back up one byte so a record starting exactly at `offset` is
            // not skipped by the sync.
            inner.seek(SeekFrom::Start(offset - 1))?;
            let mut r = Self::from_parts(BufReader::with_capacity(capacity.max(1), inner), offset - 1);
            T::sync_to_boundary(&mut r.src)?;
            r.start = r.src.position();
            r
        };
        reader.limit = Some(limit);
        reader.length = Some(limit.saturating_sub(reader.start));
        Ok(reader)
    }
}
