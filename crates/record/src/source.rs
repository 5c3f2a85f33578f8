//! The [`RecordSource`] pull interface shared by every kind of input.

use std::io::Read;
use std::sync::Arc;

use crate::{Record, RecordError, RecordReader, RecordWriter, Result};

/// A named, pull-based stream of records.
///
/// Aggregators consume inputs exclusively through this trait, so a file on
/// disk, an in-memory buffer and a pipelined producer all look the same.
pub trait RecordSource<T>: Send {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Reads the next record into a freshly allocated value.
    fn next_new(&mut self) -> Result<Option<T>>;

    /// Reads the next record into `scratch`. Returns `false` once exhausted.
    fn next_into(&mut self, scratch: &mut T) -> Result<bool>;

    /// Whether [`next_raw`](Self::next_raw) is available.
    fn supports_raw(&self) -> bool {
        false
    }

    /// Replaces `out` with the encoded bytes of the next record.
    fn next_raw(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        let _ = out;
        Err(RecordError::RawUnsupported)
    }

    /// Non-blocking probe: `true` if a read would not block right now
    /// (including when it would report end of stream).
    fn has_data_now(&self) -> bool {
        true
    }

    /// Fraction of this source consumed, in `[0, 1]`.
    fn progress(&self) -> f32;

    /// Releases the underlying resources. Calling it more than once is a
    /// no-op.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A [`RecordSource`] over any byte stream.
pub struct StreamSource<T, R: Read> {
    name: String,
    reader: Option<RecordReader<T, R>>,
}

impl<T: Record, R: Read> StreamSource<T, R> {
    pub fn new(name: impl Into<String>, reader: RecordReader<T, R>) -> Self {
        Self {
            name: name.into(),
            reader: Some(reader),
        }
    }

    /// Drops the reader once it reports end of stream.
    fn release_if_done(&mut self) {
        if self.reader.as_ref().map(|r| r.is_done()).unwrap_or(false) {
            self.reader = None;
        }
    }
}

impl<T: Record, R: Read + Send> RecordSource<T> for StreamSource<T, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_new(&mut self) -> Result<Option<T>> {
        let rec = match self.reader.as_mut() {
            Some(r) => r.read_new()?,
            None => None,
        };
        self.release_if_done();
        Ok(rec)
    }

    fn next_into(&mut self, scratch: &mut T) -> Result<bool> {
        let more = match self.reader.as_mut() {
            Some(r) => r.read_into(scratch)?,
            None => false,
        };
        self.release_if_done();
        Ok(more)
    }

    fn supports_raw(&self) -> bool {
        T::supports_raw()
    }

    fn next_raw(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        let more = match self.reader.as_mut() {
            Some(r) => r.read_raw(out)?,
            None => {
                out.clear();
                false
            }
        };
        self.release_if_done();
        Ok(more)
    }

    fn progress(&self) -> f32 {
        self.reader.as_ref().map(|r| r.progress()).unwrap_or(1.0)
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// A [`RecordSource`] over an encoded record stream held in memory.
///
/// Cloning shares the buffer; each clone reads from its own position.
pub struct MemorySource<T> {
    name: String,
    data: Arc<[u8]>,
    pos: usize,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for MemorySource<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            data: Arc::clone(&self.data),
            pos: self.pos,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Record> MemorySource<T> {
    /// Wraps an already-encoded record stream.
    pub fn encoded(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            pos: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Encodes `records` into a new in-memory stream.
    pub fn from_records<'a, I>(name: impl Into<String>, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a T>,
    {
        let mut w = RecordWriter::<T, _>::new(Vec::new());
        for rec in records {
            w.write(rec)?;
        }
        let (bytes, _) = w.finish()?;
        Ok(Self::encoded(name, bytes))
    }

    /// Encoded size of the whole buffer.
    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }

    /// Runs `f` over the unread tail and advances past whatever it consumed.
    fn advance<V>(&mut self, f: impl FnOnce(&mut &[u8]) -> Result<V>) -> Result<V> {
        let mut rest = &self.data[self.pos..];
        let before = rest.len();
        let out = f(&mut rest)?;
        self.pos += before - rest.len();
        Ok(out)
    }
}

impl<T: Record> RecordSource<T> for MemorySource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_new(&mut self) -> Result<Option<T>> {
        self.advance(|r| T::decode(r))
    }

    fn next_into(&mut self, scratch: &mut T) -> Result<bool> {
        self.advance(|r| scratch.decode_into(r))
    }

    fn supports_raw(&self) -> bool {
        T::supports_raw()
    }

    fn next_raw(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        out.clear();
        self.advance(|r| T::read_raw(r, out))
    }

    fn progress(&self) -> f32 {
        if self.data.is_empty() {
            1.0
        } else {
            self.pos as f32 / self.data.len() as f32
        }
    }
}
