//! Inputs registered with an aggregator.

use record::{MemorySource, Record, RecordReader, RecordSource};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{Compression, CompressionKind, Result};

/// A record file on disk that is opened only when a pass needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDescriptor {
    pub path: PathBuf,
    pub source_name: String,
    pub compression: CompressionKind,
    /// Size of the decoded record stream, used for progress.
    pub uncompressed_len: u64,
    /// Delete the file once it is exhausted or discarded.
    pub delete_after_read: bool,
    /// CRC32 of the uncompressed stream, checked on exhaustion when set.
    pub crc32: Option<u32>,
    /// Number of original inputs this file stands for: 1 for an upstream
    /// file, the sum of merged weights for a pass output.
    pub weight: usize,
}

impl InputDescriptor {
    pub fn new(path: impl Into<PathBuf>, source_name: impl Into<String>, uncompressed_len: u64) -> Self {
        Self {
            path: path.into(),
            source_name: source_name.into(),
            compression: CompressionKind::None,
            uncompressed_len,
            delete_after_read: false,
            crc32: None,
            weight: 1,
        }
    }

    #[must_use]
    pub fn with_compression(mut self, kind: CompressionKind) -> Self {
        self.compression = kind;
        self
    }

    #[must_use]
    pub fn delete_after_read(mut self, delete: bool) -> Self {
        self.delete_after_read = delete;
        self
    }

    #[must_use]
    pub fn with_crc32(mut self, crc: u32) -> Self {
        self.crc32 = Some(crc);
        self
    }
}

/// One input to a merge or an aggregator.
pub enum Input<T> {
    /// An already-open stream: a relay, a network fetch, an open file.
    Reader(Box<dyn RecordSource<T>>),
    /// An encoded buffer held in memory. Cheap to re-merge.
    Memory(MemorySource<T>),
    /// A file opened lazily when its pass starts.
    Deferred(InputDescriptor),
}

impl<T: Record> Input<T> {
    pub fn reader(source: impl RecordSource<T> + 'static) -> Self {
        Input::Reader(Box::new(source))
    }

    pub fn name(&self) -> &str {
        match self {
            Input::Reader(src) => src.name(),
            Input::Memory(src) => src.name(),
            Input::Deferred(desc) => &desc.source_name,
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Input::Memory(_))
    }

    /// Whether the input can be consumed as raw encoded bytes.
    pub fn supports_raw(&self) -> bool {
        match self {
            Input::Reader(src) => src.supports_raw(),
            Input::Memory(_) | Input::Deferred(_) => T::supports_raw(),
        }
    }

    pub(crate) fn weight(&self) -> usize {
        match self {
            Input::Deferred(desc) => desc.weight,
            _ => 1,
        }
    }

    pub(crate) fn open(self, ctx: &OpenContext) -> Result<Box<dyn RecordSource<T>>> {
        match self {
            Input::Reader(src) => Ok(src),
            Input::Memory(src) => Ok(Box::new(src)),
            Input::Deferred(desc) => Ok(Box::new(FileSource::open(desc, ctx)?)),
        }
    }

    /// Releases an input that will never be read: closes open readers and
    /// removes files flagged for deletion.
    pub(crate) fn discard(self) {
        match self {
            Input::Reader(mut src) => {
                if let Err(e) = src.close() {
                    log::warn!("failed to close input {}: {}", src.name(), e);
                }
            }
            Input::Memory(_) => {}
            Input::Deferred(desc) => {
                if desc.delete_after_read {
                    remove_quietly(&desc.path);
                }
            }
        }
    }
}

/// Settings needed to open deferred inputs.
#[derive(Clone)]
pub(crate) struct OpenContext {
    pub compression: Arc<dyn Compression>,
    pub read_buffer: usize,
    pub verify_checksums: bool,
}

/// Removes a temporary file, logging instead of failing.
pub(crate) fn remove_quietly(path: &std::path::Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove {}: {}", path.display(), e),
    }
}

/// A deferred input after it was opened.
///
/// The underlying file is closed exactly once, on exhaustion or on
/// [`close`](RecordSource::close), whichever comes first. Files flagged
/// `delete_after_read` are removed at that point.
struct FileSource<T> {
    name: String,
    path: PathBuf,
    delete_after_read: bool,
    reader: Option<RecordReader<T, Box<dyn Read + Send>>>,
}

impl<T: Record> FileSource<T> {
    fn open(desc: InputDescriptor, ctx: &OpenContext) -> Result<Self> {
        let file = File::open(&desc.path)?;
        let stream = ctx
            .compression
            .decompressor(desc.compression, Box::new(file), desc.uncompressed_len)?;
        let mut reader = RecordReader::with_capacity(ctx.read_buffer, stream)
            .with_length(desc.uncompressed_len);
        if let (Some(crc), true) = (desc.crc32, ctx.verify_checksums) {
            reader = reader.verify_crc32(crc);
        }
        log::debug!("opened {} ({})", desc.source_name, desc.path.display());
        Ok(Self {
            name: desc.source_name,
            path: desc.path,
            delete_after_read: desc.delete_after_read,
            reader: Some(reader),
        })
    }

    fn release(&mut self) {
        if self.reader.take().is_some() && self.delete_after_read {
            remove_quietly(&self.path);
        }
    }

    fn release_if_done(&mut self) {
        if self.reader.as_ref().map(|r| r.is_done()).unwrap_or(false) {
            self.release();
        }
    }
}

impl<T: Record> RecordSource<T> for FileSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_new(&mut self) -> record::Result<Option<T>> {
        let rec = match self.reader.as_mut() {
            Some(r) => r.read_new()?,
            None => None,
        };
        self.release_if_done();
        Ok(rec)
    }

    fn next_into(&mut self, scratch: &mut T) -> record::Result<bool> {
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

    fn next_raw(&mut self, out: &mut Vec<u8>) -> record::Result<bool> {
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

    fn close(&mut self) -> record::Result<()> {
        self.release();
        Ok(())
    }
}

impl<T> Drop for FileSource<T> {
    fn drop(&mut self) {
        if self.reader.take().is_some() && self.delete_after_read {
            remove_quietly(&self.path);
        }
    }
}
