//! K-way merge over open record sources.

use record::{Record, RecordError, RecordSource, RecordWriter};
use std::cmp::Ordering;
use std::io::Write;

use crate::comparison::{Comparison, Item};
use crate::{MergeHeap, Result};

/// The head record of one source, waiting in the heap.
struct Entry<T> {
    item: Item<T>,
    /// Index into `cursors`. Breaks ties so a pass is deterministic.
    source: usize,
}

struct Cursor<T> {
    source: Box<dyn RecordSource<T>>,
    weight: usize,
    exhausted: bool,
}

impl<T: Record> Cursor<T> {
    /// Reads the next record, recycling `spare` as its storage when it has
    /// the right shape. Closes the source on exhaustion.
    fn advance(&mut self, raw: bool, spare: Option<Item<T>>) -> Result<Option<Item<T>>> {
        if self.exhausted {
            return Ok(None);
        }
        let next = if raw {
            let mut buf = match spare {
                Some(Item::Raw(buf)) => buf,
                _ => Vec::new(),
            };
            if self.source.next_raw(&mut buf)? {
                Some(Item::Raw(buf))
            } else {
                None
            }
        } else {
            match spare {
                Some(Item::Typed(mut v)) => {
                    if self.source.next_into(&mut v)? {
                        Some(Item::Typed(v))
                    } else {
                        None
                    }
                }
                _ => self.source.next_new()?.map(Item::Typed),
            }
        };
        if next.is_none() {
            self.exhausted = true;
            self.source.close()?;
        }
        Ok(next)
    }

    fn progress(&self) -> f32 {
        if self.exhausted {
            1.0
        } else {
            self.source.progress()
        }
    }
}

type EntryCmp<T> = Box<dyn Fn(&Entry<T>, &Entry<T>) -> Ordering + Send>;

/// A heap over the head record of every source. Owned by exactly one
/// thread: the background thread for passes, the task thread for the final
/// pass.
pub(crate) struct MergeQueue<T> {
    heap: MergeHeap<Entry<T>, EntryCmp<T>>,
    cursors: Vec<Cursor<T>>,
    raw: bool,
    /// Storage returned by the last consumer read, reused for the next one.
    spare: Option<Item<T>>,
}

impl<T: Record> MergeQueue<T> {
    /// Primes the heap with the first record of every source. `weight` is
    /// how many original inputs a source stands for.
    pub fn new(
        comparison: Comparison<T>,
        sources: Vec<(Box<dyn RecordSource<T>>, usize)>,
    ) -> Result<Self> {
        let all_raw = sources.iter().all(|(s, _)| s.supports_raw());
        let comparison = comparison.for_sources(all_raw);
        if !all_raw {
            log::debug!("merging {} sources without raw reads", sources.len());
        }
        let raw = comparison.is_raw();
        let cmp: EntryCmp<T> = Box::new(move |a: &Entry<T>, b: &Entry<T>| {
            comparison
                .compare(&a.item, &b.item)
                .then_with(|| a.source.cmp(&b.source))
        });
        let mut heap = MergeHeap::with_capacity(sources.len(), cmp);
        let mut cursors = Vec::with_capacity(sources.len());
        for (source, weight) in sources {
            let mut cursor = Cursor {
                source,
                weight,
                exhausted: false,
            };
            if let Some(item) = cursor.advance(raw, None)? {
                heap.push(Entry {
                    item,
                    source: cursors.len(),
                });
            }
            cursors.push(cursor);
        }
        Ok(Self {
            heap,
            cursors,
            raw,
            spare: None,
        })
    }

    /// Removes the smallest record. Its source is advanced first, into the
    /// storage of `spare`, so the heap top can be replaced with one sift.
    fn pop(&mut self, spare: Option<Item<T>>) -> Result<Option<Item<T>>> {
        let source = match self.heap.peek() {
            Some(top) => top.source,
            None => return Ok(None),
        };
        let top = match self.cursors[source].advance(self.raw, spare)? {
            Some(item) => self.heap.replace_top(Entry { item, source }),
            None => match self.heap.pop() {
                Some(top) => top,
                None => return Ok(None),
            },
        };
        Ok(Some(top.item))
    }

    /// Writes every remaining record to `writer` in merge order.
    pub fn drain_into<W: Write>(&mut self, writer: &mut RecordWriter<T, W>) -> Result<()> {
        let mut spare = None;
        while let Some(item) = self.pop(spare.take())? {
            match &item {
                Item::Raw(bytes) => writer.write_raw(bytes)?,
                Item::Typed(v) => writer.write(v)?,
            }
            spare = Some(item);
        }
        Ok(())
    }

    pub fn next_new(&mut self) -> Result<Option<T>> {
        let spare = self.spare.take();
        match self.pop(spare)? {
            None => Ok(None),
            Some(Item::Typed(v)) => Ok(Some(v)),
            Some(Item::Raw(bytes)) => {
                let rec = T::decode(&mut &bytes[..])?.ok_or_else(empty_raw_record)?;
                self.spare = Some(Item::Raw(bytes));
                Ok(Some(rec))
            }
        }
    }

    /// Overwrites `scratch` with the next record. The previous contents of
    /// `scratch` become storage for a later read.
    pub fn next_into(&mut self, scratch: &mut T) -> Result<bool> {
        let spare = self.spare.take();
        match self.pop(spare)? {
            None => Ok(false),
            Some(Item::Typed(v)) => {
                let old = std::mem::replace(scratch, v);
                self.spare = Some(Item::Typed(old));
                Ok(true)
            }
            Some(Item::Raw(bytes)) => {
                if !scratch.decode_into(&mut &bytes[..])? {
                    return Err(empty_raw_record().into());
                }
                self.spare = Some(Item::Raw(bytes));
                Ok(true)
            }
        }
    }

    /// Sum of each source's progress scaled by its weight.
    pub fn weighted_progress(&self) -> f32 {
        self.cursors
            .iter()
            .map(|c| c.weight as f32 * c.progress())
            .sum()
    }
}

fn empty_raw_record() -> RecordError {
    RecordError::Corrupt("raw record decoded to nothing".to_string())
}
