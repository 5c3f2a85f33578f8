//! # Record - typed record streams
//!
//! The serialization layer shared by every stage of the shuffle pipeline.
//! Upstream tasks write their sorted, partitioned output as a stream of
//! records; downstream tasks read those streams back, compare records and
//! feed them through the merge engine.
//!
//! ## Stream Format
//!
//! A record stream is a back-to-back sequence of encoded records with no
//! framing beyond what each codec provides:
//!
//! ```text
//! u64 / i64   [value: 8 bytes LE]
//! Vec<u8>     [len: u32 LE][bytes]
//! String      [len: u32 LE][utf-8 bytes]
//! KeyValue    [key_len: u32 LE][key][val_len: u32 LE][value]
//! Line        [utf-8 bytes]['\n']
//! ```
//!
//! A reader at offset 0 can always recover record boundaries. Only codecs
//! with a boundary-sync rule ([`Line`]) can start at an arbitrary offset;
//! the binary codecs return [`RecordError::NotSyncable`].
//!
//! ## Reuse
//!
//! Every decode path has two entry points: `*_new` returns a freshly
//! allocated record, `*_into` overwrites a caller-supplied instance in place.
//! A reused instance must not be retained across calls.
//!
//! ## Example
//!
//! ```rust,no_run
//! use record::{RecordReader, RecordWriter};
//!
//! let mut w = RecordWriter::<u64, _>::new(Vec::new());
//! for v in [1u64, 5, 9] {
//!     w.write(&v).unwrap();
//! }
//! let (bytes, summary) = w.finish().unwrap();
//! assert_eq!(summary.records, 3);
//!
//! let mut r = RecordReader::<u64, _>::new(&bytes[..]);
//! while let Some(v) = r.read_new().unwrap() {
//!     println!("{v}");
//! }
//! ```

mod codec;
mod compare;
mod reader;
mod source;
mod writer;

use std::io;
use thiserror::Error;

pub use codec::{at_eof, KeyValue, Line, Record, MAX_FIELD_BYTES};
pub use compare::{
    BytesRawComparer, DeserializingComparer, FnComparer, I64RawComparer, KeyValueRawComparer,
    LineRawComparer, NaturalOrder, RawComparer, RecordComparer, U64RawComparer,
};
pub use reader::{CountingReader, RecordReader, DEFAULT_READ_BUFFER};
pub use source::{MemorySource, RecordSource, StreamSource};
pub use writer::{RecordWriter, WriteSummary, DEFAULT_WRITE_BUFFER};

/// Errors produced while encoding, decoding or reading record streams.
#[derive(Debug, Error)]
pub enum RecordError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The bytes do not form a valid record.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The stream ended in the middle of a record.
    #[error("truncated record at end of stream")]
    Truncated,

    /// The record type has no raw pass-through framing.
    #[error("record type does not support raw reads")]
    RawUnsupported,

    /// The codec has no boundary-sync rule, so only offset 0 can be read.
    #[error("record format cannot resynchronise at an arbitrary offset")]
    NotSyncable,

    /// The CRC32 of the consumed stream differs from the declared one.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

pub type Result<T, E = RecordError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests;
