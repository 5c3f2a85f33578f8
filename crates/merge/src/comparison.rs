//! The comparison strategy a merge runs under.

use parking_lot::Mutex;
use record::{NaturalOrder, RawComparer, Record, RecordComparer};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

/// How records are ordered inside merge heaps.
///
/// `Raw` is a preference, not a requirement: a merge whose sources do not
/// all offer raw reads decodes every record and orders the values with the
/// `fallback` comparer, which must agree with the raw one.
pub enum Comparison<T> {
    /// Compare encoded bytes; records are never decoded during passes.
    Raw {
        raw: Arc<dyn RawComparer>,
        fallback: Arc<dyn RecordComparer<T>>,
    },
    /// Decode every record and compare values.
    Typed(Arc<dyn RecordComparer<T>>),
}

impl<T> Clone for Comparison<T> {
    fn clone(&self) -> Self {
        match self {
            Comparison::Raw { raw, fallback } => Comparison::Raw {
                raw: Arc::clone(raw),
                fallback: Arc::clone(fallback),
            },
            Comparison::Typed(c) => Comparison::Typed(Arc::clone(c)),
        }
    }
}

impl<T: Record> Comparison<T> {
    /// Raw comparison. Sources without raw reads are ordered by re-encoding
    /// their decoded values for `comparer`.
    pub fn raw(comparer: impl RawComparer + 'static) -> Self {
        let raw: Arc<dyn RawComparer> = Arc::new(comparer);
        Comparison::Raw {
            fallback: Arc::new(EncodedOrder::new(Arc::clone(&raw))),
            raw,
        }
    }

    pub fn typed(comparer: impl RecordComparer<T> + 'static) -> Self {
        Comparison::Typed(Arc::new(comparer))
    }

    /// Picks raw comparison only when no explicit comparator is configured
    /// and the inputs are expected to offer raw reads; otherwise the
    /// explicit comparator, or the type's own ordering. Raw mode falls back
    /// to the type's ordering for any merge over a non-raw source.
    pub fn select(explicit: Option<Arc<dyn RecordComparer<T>>>, all_inputs_raw: bool) -> Self
    where
        T: Ord,
    {
        if let Some(cmp) = explicit {
            return Comparison::Typed(cmp);
        }
        if all_inputs_raw {
            if let Some(raw) = T::raw_comparer() {
                return Comparison::Raw {
                    raw,
                    fallback: Arc::new(NaturalOrder),
                };
            }
        }
        Comparison::Typed(Arc::new(NaturalOrder))
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Comparison::Raw { .. })
    }

    /// The comparison for one merge over a concrete set of sources.
    pub(crate) fn for_sources(&self, all_sources_raw: bool) -> Comparison<T> {
        match self {
            Comparison::Raw { fallback, .. } if !all_sources_raw => {
                Comparison::Typed(Arc::clone(fallback))
            }
            other => other.clone(),
        }
    }

    pub(crate) fn compare(&self, a: &Item<T>, b: &Item<T>) -> Ordering {
        match (self, a, b) {
            (Comparison::Raw { raw, .. }, Item::Raw(x), Item::Raw(y)) => raw.compare_raw(x, y),
            (Comparison::Typed(c), Item::Typed(x), Item::Typed(y)) => c.compare(x, y),
            _ => unreachable!("merge item does not match the comparison mode"),
        }
    }
}

/// Orders decoded values by encoding both and handing the bytes to a raw
/// comparer.
struct EncodedOrder<T> {
    raw: Arc<dyn RawComparer>,
    scratch: Mutex<(Vec<u8>, Vec<u8>)>,
    _marker: PhantomData<fn(&T)>,
}

impl<T> EncodedOrder<T> {
    fn new(raw: Arc<dyn RawComparer>) -> Self {
        Self {
            raw,
            scratch: Mutex::new((Vec::new(), Vec::new())),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> RecordComparer<T> for EncodedOrder<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        let mut scratch = self.scratch.lock();
        let (x, y) = &mut *scratch;
        x.clear();
        y.clear();
        // A decoded record always re-encodes.
        if let Err(e) = a.encode(x).and_then(|()| b.encode(y)) {
            log::warn!("cannot re-encode record for comparison: {}", e);
        }
        self.raw.compare_raw(x, y)
    }
}

/// A record travelling through a merge heap.
pub(crate) enum Item<T> {
    Raw(Vec<u8>),
    Typed(T),
}
