//! Comparison strategies.
//!
//! A [`RawComparer`] orders two encoded records by inspecting their bytes;
//! a [`RecordComparer`] orders two decoded values. The merge engine picks one
//! of the two when it is constructed.

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::Record;

/// Three-way comparison over encoded records.
///
/// Both slices always hold exactly one record as produced by
/// [`Record::read_raw`].
pub trait RawComparer: Send + Sync {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Three-way comparison over decoded records.
pub trait RecordComparer<T>: Send + Sync {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

/// The type's own [`Ord`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<T: Ord> RecordComparer<T> for NaturalOrder {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

/// Adapts a closure into a [`RecordComparer`].
pub struct FnComparer<F>(pub F);

impl<T, F> RecordComparer<T> for FnComparer<F>
where
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.0)(a, b)
    }
}

/// Orders `u64` records by reading the fixed-width little-endian field.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64RawComparer;

impl RawComparer for U64RawComparer {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (a.get(..8), b.get(..8)) {
            (Some(x), Some(y)) => LittleEndian::read_u64(x).cmp(&LittleEndian::read_u64(y)),
            _ => a.cmp(b),
        }
    }
}

/// Orders `i64` records by reading the fixed-width little-endian field.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64RawComparer;

impl RawComparer for I64RawComparer {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (a.get(..8), b.get(..8)) {
            (Some(x), Some(y)) => LittleEndian::read_i64(x).cmp(&LittleEndian::read_i64(y)),
            _ => a.cmp(b),
        }
    }
}

/// Orders length-prefixed byte strings: skips the `u32` prefix and compares
/// the payload lexicographically.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesRawComparer;

impl RawComparer for BytesRawComparer {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering {
        payload(a).cmp(payload(b))
    }
}

/// Orders encoded [`KeyValue`](crate::KeyValue) records by key, then value.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueRawComparer;

impl RawComparer for KeyValueRawComparer {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (ak, av) = split_key_value(a);
        let (bk, bv) = split_key_value(b);
        ak.cmp(bk).then_with(|| av.cmp(bv))
    }
}

/// Orders encoded [`Line`](crate::Line) records, ignoring the terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineRawComparer;

impl RawComparer for LineRawComparer {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering {
        strip_newline(a).cmp(strip_newline(b))
    }
}

fn payload(buf: &[u8]) -> &[u8] {
    buf.get(4..).unwrap_or(&[])
}

fn split_key_value(buf: &[u8]) -> (&[u8], &[u8]) {
    let key_len = match buf.get(..4) {
        Some(p) => LittleEndian::read_u32(p) as usize,
        None => return (&[], &[]),
    };
    let key_end = (4 + key_len).min(buf.len());
    let key = &buf[4.min(buf.len())..key_end];
    let value = buf.get(key_end + 4..).unwrap_or(&[]);
    (key, value)
}

fn strip_newline(buf: &[u8]) -> &[u8] {
    buf.strip_suffix(b"\n").unwrap_or(buf)
}

/// Compares encoded records by decoding both sides and delegating to a
/// typed comparer.
///
/// The two scratch instances are reused across calls, so a comparison
/// allocates only when a record outgrows the previous one.
pub struct DeserializingComparer<T, C> {
    comparer: C,
    scratch: Mutex<Option<(T, T)>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> DeserializingComparer<T, C> {
    pub fn new(comparer: C) -> Self {
        Self {
            comparer,
            scratch: Mutex::new(None),
            _marker: PhantomData,
        }
    }
}

impl<T: Record + Ord> Default for DeserializingComparer<T, crate::NaturalOrder> {
    fn default() -> Self {
        Self::new(crate::NaturalOrder)
    }
}

impl<T, C> RawComparer for DeserializingComparer<T, C>
where
    T: Record,
    C: RecordComparer<T>,
{
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering {
        let mut scratch = self.scratch.lock();
        let decoded = match scratch.as_mut() {
            Some((x, y)) => {
                let mut ra = a;
                let mut rb = b;
                matches!(
                    (x.decode_into(&mut ra), y.decode_into(&mut rb)),
                    (Ok(true), Ok(true))
                )
            }
            None => match (T::decode(&mut &a[..]), T::decode(&mut &b[..])) {
                (Ok(Some(x)), Ok(Some(y))) => {
                    *scratch = Some((x, y));
                    true
                }
                _ => false,
            },
        };
        match scratch.as_ref() {
            Some((x, y)) if decoded => self.comparer.compare(x, y),
            _ => {
                log::warn!(
                    "failed to decode records for comparison ({} and {} bytes), falling back to byte order",
                    a.len(),
                    b.len()
                );
                a.cmp(b)
            }
        }
    }
}
