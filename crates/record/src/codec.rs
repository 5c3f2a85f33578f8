//! The [`Record`] codec trait and the built-in record types.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use crate::compare::{
    BytesRawComparer, I64RawComparer, KeyValueRawComparer, LineRawComparer, RawComparer,
    U64RawComparer,
};
use crate::{RecordError, Result};

/// Maximum size of a single length-prefixed field (64 MiB). Prevents OOM on
/// corrupt streams.
pub const MAX_FIELD_BYTES: usize = 64 * 1024 * 1024;

/// A type with a self-delimiting binary encoding.
///
/// Sequential [`decode`](Record::decode) calls recover record boundaries
/// without any external framing. `decode` returns `Ok(None)` only at a clean
/// record boundary at the end of the stream; a stream that ends inside a
/// record yields [`RecordError::Truncated`].
pub trait Record: Sized + Send + 'static {
    /// Appends the encoded form of `self` to `w`.
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()>;

    /// Decodes the next record into a freshly allocated value.
    fn decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Option<Self>>;

    /// Decodes the next record into `self`, reusing its allocations where the
    /// type allows it. Returns `false` at end of stream, leaving `self`
    /// untouched.
    fn decode_into<R: BufRead + ?Sized>(&mut self, r: &mut R) -> Result<bool> {
        match Self::decode(r)? {
            Some(v) => {
                *self = v;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Appends the exact encoded bytes of the next record to `out` without
    /// decoding it. Returns `false` at end of stream.
    fn read_raw<R: BufRead + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<bool> {
        let _ = (r, out);
        Err(RecordError::RawUnsupported)
    }

    /// Whether [`read_raw`](Record::read_raw) is implemented.
    fn supports_raw() -> bool {
        false
    }

    /// The comparer that orders encoded records of this type without
    /// decoding them, if the type has one.
    fn raw_comparer() -> Option<Arc<dyn RawComparer>> {
        None
    }

    /// Skips forward to the start of the next record when `r` is positioned
    /// at an arbitrary byte offset. Returns the number of bytes skipped.
    fn sync_to_boundary<R: BufRead + ?Sized>(r: &mut R) -> Result<u64> {
        let _ = r;
        Err(RecordError::NotSyncable)
    }
}

/// Returns `true` if `r` has no more bytes.
pub fn at_eof<R: BufRead + ?Sized>(r: &mut R) -> io::Result<bool> {
    Ok(r.fill_buf()?.is_empty())
}

/// Maps an EOF hit inside a record to [`RecordError::Truncated`].
fn mid_record(e: io::Error) -> RecordError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RecordError::Truncated
    } else {
        RecordError::Io(e)
    }
}

fn read_len<R: Read + ?Sized>(r: &mut R) -> Result<usize> {
    let len = r.read_u32::<LittleEndian>().map_err(mid_record)? as usize;
    if len > MAX_FIELD_BYTES {
        return Err(RecordError::Corrupt(format!(
            "field length {} exceeds maximum {}",
            len, MAX_FIELD_BYTES
        )));
    }
    Ok(len)
}

fn write_len<W: Write + ?Sized>(w: &mut W, len: usize) -> io::Result<()> {
    if len > MAX_FIELD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("field length {} exceeds maximum {}", len, MAX_FIELD_BYTES),
        ));
    }
    w.write_u32::<LittleEndian>(len as u32)
}

/// Reads a length-prefixed field into `buf`, reusing its allocation.
fn read_field_into<R: Read + ?Sized>(r: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    let len = read_len(r)?;
    buf.clear();
    buf.resize(len, 0);
    r.read_exact(buf).map_err(mid_record)
}

/// Copies one length-prefixed field, prefix included, onto `out`.
fn copy_field<R: Read + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<()> {
    let len = read_len(r)?;
    out.extend_from_slice(&(len as u32).to_le_bytes());
    let start = out.len();
    out.resize(start + len, 0);
    r.read_exact(&mut out[start..]).map_err(mid_record)
}

macro_rules! fixed_width_record {
    ($ty:ty, $read:ident, $write:ident, $comparer:expr) => {
        impl Record for $ty {
            fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
                w.$write::<LittleEndian>(*self)
            }

            fn decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Option<Self>> {
                if at_eof(r)? {
                    return Ok(None);
                }
                Ok(Some(r.$read::<LittleEndian>().map_err(mid_record)?))
            }

            fn decode_into<R: BufRead + ?Sized>(&mut self, r: &mut R) -> Result<bool> {
                if at_eof(r)? {
                    return Ok(false);
                }
                *self = r.$read::<LittleEndian>().map_err(mid_record)?;
                Ok(true)
            }

            fn read_raw<R: BufRead + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<bool> {
                if at_eof(r)? {
                    return Ok(false);
                }
                let mut buf = [0u8; 8];
                r.read_exact(&mut buf).map_err(mid_record)?;
                out.extend_from_slice(&buf);
                Ok(true)
            }

            fn supports_raw() -> bool {
                true
            }

            fn raw_comparer() -> Option<Arc<dyn RawComparer>> {
                Some(Arc::new($comparer))
            }
        }
    };
}

fixed_width_record!(u64, read_u64, write_u64, U64RawComparer);
fixed_width_record!(i64, read_i64, write_i64, I64RawComparer);

impl Record for Vec<u8> {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_len(w, self.len())?;
        w.write_all(self)
    }

    fn decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Option<Self>> {
        let mut buf = Vec::new();
        Ok(buf.decode_into(r)?.then_some(buf))
    }

    fn decode_into<R: BufRead + ?Sized>(&mut self, r: &mut R) -> Result<bool> {
        if at_eof(r)? {
            return Ok(false);
        }
        read_field_into(r, self)?;
        Ok(true)
    }

    fn read_raw<R: BufRead + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<bool> {
        if at_eof(r)? {
            return Ok(false);
        }
        copy_field(r, out)?;
        Ok(true)
    }

    fn supports_raw() -> bool {
        true
    }

    fn raw_comparer() -> Option<Arc<dyn RawComparer>> {
        Some(Arc::new(BytesRawComparer))
    }
}

impl Record for String {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_len(w, self.len())?;
        w.write_all(self.as_bytes())
    }

    fn decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Option<Self>> {
        let mut s = String::new();
        Ok(s.decode_into(r)?.then_some(s))
    }

    fn decode_into<R: BufRead + ?Sized>(&mut self, r: &mut R) -> Result<bool> {
        if at_eof(r)? {
            return Ok(false);
        }
        let mut buf = std::mem::take(self).into_bytes();
        read_field_into(r, &mut buf)?;
        *self = String::from_utf8(buf)
            .map_err(|e| RecordError::Corrupt(format!("invalid utf-8 in string: {}", e)))?;
        Ok(true)
    }

    fn read_raw<R: BufRead + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<bool> {
        <Vec<u8> as Record>::read_raw(r, out)
    }

    fn supports_raw() -> bool {
        true
    }

    // UTF-8 byte order matches `str` ordering.
    fn raw_comparer() -> Option<Arc<dyn RawComparer>> {
        Some(Arc::new(BytesRawComparer))
    }
}

/// A key/value pair, ordered by key and then by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Record for KeyValue {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_len(w, self.key.len())?;
        w.write_all(&self.key)?;
        write_len(w, self.value.len())?;
        w.write_all(&self.value)
    }

    fn decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Option<Self>> {
        let mut kv = KeyValue::default();
        Ok(kv.decode_into(r)?.then_some(kv))
    }

    fn decode_into<R: BufRead + ?Sized>(&mut self, r: &mut R) -> Result<bool> {
        if at_eof(r)? {
            return Ok(false);
        }
        read_field_into(r, &mut self.key)?;
        read_field_into(r, &mut self.value)?;
        Ok(true)
    }

    fn read_raw<R: BufRead + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<bool> {
        if at_eof(r)? {
            return Ok(false);
        }
        copy_field(r, out)?;
        copy_field(r, out)?;
        Ok(true)
    }

    fn supports_raw() -> bool {
        true
    }

    fn raw_comparer() -> Option<Arc<dyn RawComparer>> {
        Some(Arc::new(KeyValueRawComparer))
    }
}

/// One line of text, stored without its `\n` terminator.
///
/// This is the only built-in codec with a boundary-sync rule: a reader
/// dropped at an arbitrary offset skips past the next `\n` and resumes at the
/// following line.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Line(pub String);

impl Line {
    pub fn new(s: impl Into<String>) -> Self {
        Line(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Record for Line {
    fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        if self.0.as_bytes().contains(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "line record must not contain '\\n'",
            ));
        }
        w.write_all(self.0.as_bytes())?;
        w.write_all(b"\n")
    }

    fn decode<R: BufRead + ?Sized>(r: &mut R) -> Result<Option<Self>> {
        let mut line = Line::default();
        Ok(line.decode_into(r)?.then_some(line))
    }

    fn decode_into<R: BufRead + ?Sized>(&mut self, r: &mut R) -> Result<bool> {
        let mut buf = std::mem::take(&mut self.0).into_bytes();
        buf.clear();
        if r.read_until(b'\n', &mut buf)? == 0 {
            return Ok(false);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        self.0 = String::from_utf8(buf)
            .map_err(|e| RecordError::Corrupt(format!("invalid utf-8 in line: {}", e)))?;
        Ok(true)
    }

    fn read_raw<R: BufRead + ?Sized>(r: &mut R, out: &mut Vec<u8>) -> Result<bool> {
        if r.read_until(b'\n', out)? == 0 {
            return Ok(false);
        }
        // A final line without a terminator is normalised to its encoded form.
        if out.last() != Some(&b'\n') {
            out.push(b'\n');
        }
        Ok(true)
    }

    fn supports_raw() -> bool {
        true
    }

    fn raw_comparer() -> Option<Arc<dyn RawComparer>> {
        Some(Arc::new(LineRawComparer))
    }

    fn sync_to_boundary<R: BufRead + ?Sized>(r: &mut R) -> Result<u64> {
        let mut skipped = Vec::new();
        Ok(r.read_until(b'\n', &mut skipped)? as u64)
    }
}
