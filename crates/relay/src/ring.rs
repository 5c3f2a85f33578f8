use parking_lot::{Condvar, Mutex};
use record::{RecordError, RecordSource};
use std::io;
use std::sync::Arc;

use crate::RelayError;

/// Fixed-capacity circular buffer. `head` is the oldest slot, `len` the number
/// of occupied slots following it.
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
    finished: bool,
    cancelled: bool,
    written: u64,
    read: u64,
}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn push(&mut self, record: T) {
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(record);
        self.len += 1;
        self.written += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let rec = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        self.read += 1;
        rec
    }
}

struct Shared<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> Shared<T> {
    fn cancel(&self) {
        let mut ring = self.ring.lock();
        if !ring.cancelled {
            ring.cancelled = true;
            // Lossy by contract: drop whatever was never read.
            let dropped = ring.len;
            while ring.pop().is_some() {}
            if dropped > 0 {
                log::debug!("relay cancelled with {} unread records", dropped);
            }
        }
        drop(ring);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

/// Creates a relay whose buffer holds at most `capacity` records.
///
/// # Panics
///
/// Panics if `capacity` is 0.
pub fn channel<T>(capacity: usize) -> (RelayWriter<T>, RelayReader<T>) {
    assert!(capacity > 0, "relay capacity must be > 0");
    let shared = Arc::new(Shared {
        ring: Mutex::new(Ring {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            finished: false,
            cancelled: false,
            written: 0,
            read: 0,
        }),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
    });
    (
        RelayWriter {
            shared: Arc::clone(&shared),
        },
        RelayReader {
            shared,
            name: "relay".to_string(),
        },
    )
}

/// Producing end of a relay. Dropping it declares end of stream.
pub struct RelayWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> RelayWriter<T> {
    /// Appends a record, blocking while the buffer is full.
    pub fn write(&mut self, record: T) -> Result<(), RelayError> {
        let mut ring = self.shared.ring.lock();
        while ring.is_full() && !ring.cancelled && !ring.finished {
            self.shared.not_full.wait(&mut ring);
        }
        if ring.cancelled {
            return Err(RelayError::Cancelled);
        }
        if ring.finished {
            return Err(RelayError::Finished);
        }
        ring.push(record);
        drop(ring);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Declares that no more records will be written. Idempotent.
    pub fn finish(&mut self) {
        let mut ring = self.shared.ring.lock();
        ring.finished = true;
        drop(ring);
        self.shared.not_empty.notify_all();
    }

    /// Aborts the relay, waking both sides.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Number of records accepted so far.
    pub fn records_written(&self) -> u64 {
        self.shared.ring.lock().written
    }
}

impl<T> Drop for RelayWriter<T> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Consuming end of a relay. Dropping it cancels the relay so a blocked
/// producer cannot hang.
pub struct RelayReader<T> {
    shared: Arc<Shared<T>>,
    name: String,
}

impl<T> RelayReader<T> {
    /// Sets the name reported through [`RecordSource::name`].
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Takes the next record, blocking while the buffer is empty. Returns
    /// `Ok(None)` once the producer finished and the buffer is drained.
    pub fn read(&mut self) -> Result<Option<T>, RelayError> {
        let mut ring = self.shared.ring.lock();
        loop {
            if ring.cancelled {
                return Err(RelayError::Cancelled);
            }
            if let Some(rec) = ring.pop() {
                drop(ring);
                self.shared.not_full.notify_one();
                return Ok(Some(rec));
            }
            if ring.finished {
                return Ok(None);
            }
            self.shared.not_empty.wait(&mut ring);
        }
    }

    /// Takes the next record if one is buffered, without blocking. `Ok(None)`
    /// means nothing is buffered right now; use
    /// [`is_drained`](Self::is_drained) to tell end of stream apart.
    pub fn try_read(&mut self) -> Result<Option<T>, RelayError> {
        let mut ring = self.shared.ring.lock();
        if ring.cancelled {
            return Err(RelayError::Cancelled);
        }
        let rec = ring.pop();
        drop(ring);
        if rec.is_some() {
            self.shared.not_full.notify_one();
        }
        Ok(rec)
    }

    /// `true` if [`read`](Self::read) would return without blocking.
    pub fn has_data_now(&self) -> bool {
        let ring = self.shared.ring.lock();
        ring.len > 0 || ring.finished || ring.cancelled
    }

    /// `true` once the producer finished and every record was read.
    pub fn is_drained(&self) -> bool {
        let ring = self.shared.ring.lock();
        ring.finished && ring.len == 0
    }

    /// Aborts the relay, waking both sides.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Number of records taken so far.
    pub fn records_read(&self) -> u64 {
        self.shared.ring.lock().read
    }
}

impl<T> Drop for RelayReader<T> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

fn cancelled_io() -> RecordError {
    RecordError::Io(io::Error::new(io::ErrorKind::Interrupted, "relay cancelled"))
}

impl<T: Send> RecordSource<T> for RelayReader<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_new(&mut self) -> record::Result<Option<T>> {
        self.read().map_err(|_| cancelled_io())
    }

    fn next_into(&mut self, scratch: &mut T) -> record::Result<bool> {
        match self.read().map_err(|_| cancelled_io())? {
            Some(rec) => {
                *scratch = rec;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn has_data_now(&self) -> bool {
        RelayReader::has_data_now(self)
    }

    // The total is unknown until the producer finishes.
    fn progress(&self) -> f32 {
        if self.is_drained() {
            1.0
        } else {
            0.0
        }
    }

    fn close(&mut self) -> record::Result<()> {
        self.shared.cancel();
        Ok(())
    }
}
