use crc32fast::Hasher as Crc32;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;

use crate::{Record, Result};

/// Default write buffer for record streams (64 KiB).
pub const DEFAULT_WRITE_BUFFER: usize = 64 * 1024;

/// Totals for a finished record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteSummary {
    /// Number of records written.
    pub records: u64,
    /// Number of encoded (uncompressed) bytes written.
    pub bytes: u64,
    /// CRC32 over every encoded byte, in write order.
    pub crc32: u32,
}

/// Buffered writer producing a record stream.
///
/// Each record is encoded into a reusable scratch buffer and handed to the
/// underlying writer with a single `write_all`. The writer keeps a running
/// CRC32 so readers can verify the stream end to end.
pub struct RecordWriter<T, W: Write> {
    out: BufWriter<W>,
    hasher: Crc32,
    records: u64,
    bytes: u64,
    /// Reusable scratch buffer to avoid allocation on every record.
    buf: Vec<u8>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Record, W: Write> RecordWriter<T, W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(DEFAULT_WRITE_BUFFER, inner)
    }

    pub fn with_capacity(capacity: usize, inner: W) -> Self {
        Self {
            out: BufWriter::with_capacity(capacity.max(1), inner),
            hasher: Crc32::new(),
            records: 0,
            bytes: 0,
            buf: Vec::with_capacity(256),
            _marker: PhantomData,
        }
    }

    /// Encodes and appends one record.
    pub fn write(&mut self, record: &T) -> Result<()> {
        self.buf.clear();
        record.encode(&mut self.buf)?;
        self.hasher.update(&self.buf);
        self.out.write_all(&self.buf)?;
        self.records += 1;
        self.bytes += self.buf.len() as u64;
        Ok(())
    }

    /// Appends one record that is already encoded (raw pass-through).
    ///
    /// `encoded` must hold exactly one record as produced by
    /// [`Record::read_raw`].
    pub fn write_raw(&mut self, encoded: &[u8]) -> Result<()> {
        self.hasher.update(encoded);
        self.out.write_all(encoded)?;
        self.records += 1;
        self.bytes += encoded.len() as u64;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Flushes buffered bytes and returns the underlying writer together with
    /// the stream totals.
    pub fn finish(self) -> Result<(W, WriteSummary)> {
        let summary = WriteSummary {
            records: self.records,
            bytes: self.bytes,
            crc32: self.hasher.finalize(),
        };
        let inner = self.out.into_inner().map_err(|e| e.into_error())?;
        Ok((inner, summary))
    }
}
