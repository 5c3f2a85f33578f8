//! The traits every aggregator exposes, and the unordered round-robin
//! aggregator.

use config::MergeConfig;
use parking_lot::{Condvar, Mutex};
use record::{Record, RecordSource};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::input::OpenContext;
use crate::{Compression, Input, MergeError, Result, StreamCompression};

/// The registration side of an aggregator. Shared between threads.
pub trait InputSink<T>: Send + Sync {
    /// Appends an input and wakes any thread waiting for inputs.
    fn register_input(&self, input: Input<T>) -> Result<()>;

    /// Blocks until at least `count` inputs were registered. Returns `false`
    /// on timeout; a timeout is not an error.
    fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool;

    fn registered_inputs(&self) -> usize;

    fn total_inputs(&self) -> usize;
}

/// The consuming side of an aggregator. Owned by the task thread.
pub trait RecordStream<T> {
    fn read_next(&mut self) -> Result<Option<T>>;

    /// Overwrites `scratch` with the next record. `scratch` must not be
    /// retained across calls.
    fn read_next_into(&mut self, scratch: &mut T) -> Result<bool>;

    /// Fraction of all declared inputs consumed, in `[0, 1]`. Inputs not
    /// registered yet count as 0% done.
    fn progress(&self) -> f32;
}

struct Registry<T> {
    pending: Vec<Input<T>>,
    registered: usize,
    closed: bool,
}

struct RrShared<T> {
    registry: Mutex<Registry<T>>,
    arrived: Condvar,
    total_inputs: usize,
}

/// Cloneable registration handle for a [`RoundRobinAggregator`].
pub struct RoundRobinRegistrar<T> {
    shared: Arc<RrShared<T>>,
}

impl<T> Clone for RoundRobinRegistrar<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Record> InputSink<T> for RoundRobinRegistrar<T> {
    fn register_input(&self, input: Input<T>) -> Result<()> {
        let mut reg = self.shared.registry.lock();
        if reg.closed {
            return Err(MergeError::Closed);
        }
        if reg.registered >= self.shared.total_inputs {
            return Err(MergeError::TooManyInputs {
                partition: 0,
                total: self.shared.total_inputs,
            });
        }
        log::debug!("round-robin: registered {}", input.name());
        reg.pending.push(input);
        reg.registered += 1;
        drop(reg);
        self.shared.arrived.notify_all();
        Ok(())
    }

    fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut reg = self.shared.registry.lock();
        while reg.registered < count {
            if self.shared.arrived.wait_until(&mut reg, deadline).timed_out() {
                return reg.registered >= count;
            }
        }
        true
    }

    fn registered_inputs(&self) -> usize {
        self.shared.registry.lock().registered
    }

    fn total_inputs(&self) -> usize {
        self.shared.total_inputs
    }
}

/// Presents many inputs as one stream with no ordering guarantee.
///
/// Inputs are visited in rotation. An input whose
/// [`has_data_now`](RecordSource::has_data_now) probe is false is skipped;
/// the aggregator blocks on a read only once no input can make immediate
/// progress. Exhausted inputs leave the rotation.
pub struct RoundRobinAggregator<T> {
    registrar: RoundRobinRegistrar<T>,
    open: OpenContext,
    active: Vec<Box<dyn RecordSource<T>>>,
    /// Rotation position inside `active`.
    next: usize,
    exhausted: usize,
}

impl<T: Record> RoundRobinAggregator<T> {
    pub fn new(config: &MergeConfig, total_inputs: usize) -> Self {
        Self::with_compression(config, total_inputs, Arc::new(StreamCompression))
    }

    pub fn with_compression(
        config: &MergeConfig,
        total_inputs: usize,
        compression: Arc<dyn Compression>,
    ) -> Self {
        Self {
            registrar: RoundRobinRegistrar {
                shared: Arc::new(RrShared {
                    registry: Mutex::new(Registry {
                        pending: Vec::new(),
                        registered: 0,
                        closed: false,
                    }),
                    arrived: Condvar::new(),
                    total_inputs,
                }),
            },
            open: OpenContext {
                compression,
                read_buffer: config.read_buffer_bytes,
                verify_checksums: config.verify_checksums,
            },
            active: Vec::new(),
            next: 0,
            exhausted: 0,
        }
    }

    pub fn registrar(&self) -> RoundRobinRegistrar<T> {
        self.registrar.clone()
    }

    pub fn register_input(&self, input: Input<T>) -> Result<()> {
        self.registrar.register_input(input)
    }

    pub fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool {
        self.registrar.wait_for_inputs(count, timeout)
    }

    /// Opens newly registered inputs. When nothing is active, blocks until
    /// an input arrives. Returns `false` once every declared input has been
    /// consumed.
    fn admit(&mut self) -> Result<bool> {
        let shared = Arc::clone(&self.registrar.shared);
        let pending = {
            let mut reg = shared.registry.lock();
            loop {
                if !reg.pending.is_empty() || !self.active.is_empty() {
                    break;
                }
                if reg.closed || self.exhausted >= shared.total_inputs {
                    return Ok(false);
                }
                shared.arrived.wait(&mut reg);
            }
            std::mem::take(&mut reg.pending)
        };
        for input in pending {
            self.active.push(input.open(&self.open)?);
        }
        Ok(true)
    }

    /// Index of the input to read from: the first in rotation that can make
    /// progress now, or the current rotation slot if none can.
    fn pick(&self) -> usize {
        let n = self.active.len();
        (0..n)
            .map(|k| (self.next + k) % n)
            .find(|&i| self.active[i].has_data_now())
            .unwrap_or(self.next % n)
    }

    fn retire(&mut self, idx: usize) -> Result<()> {
        let mut src = self.active.remove(idx);
        log::debug!("round-robin: {} exhausted", src.name());
        self.exhausted += 1;
        src.close()?;
        if self.next > idx {
            self.next -= 1;
        }
        Ok(())
    }

    /// Stops accepting inputs and closes the active ones.
    pub fn close(&mut self) -> Result<()> {
        let pending = {
            let mut reg = self.registrar.shared.registry.lock();
            reg.closed = true;
            std::mem::take(&mut reg.pending)
        };
        self.registrar.shared.arrived.notify_all();
        pending.into_iter().for_each(Input::discard);
        for mut src in self.active.drain(..) {
            if let Err(e) = src.close() {
                log::warn!("failed to close input {}: {}", src.name(), e);
            }
        }
        Ok(())
    }
}

impl<T: Record> RecordStream<T> for RoundRobinAggregator<T> {
    fn read_next(&mut self) -> Result<Option<T>> {
        while self.admit()? {
            let idx = self.pick();
            match self.active[idx].next_new()? {
                Some(rec) => {
                    self.next = idx + 1;
                    return Ok(Some(rec));
                }
                None => self.retire(idx)?,
            }
        }
        Ok(None)
    }

    fn read_next_into(&mut self, scratch: &mut T) -> Result<bool> {
        while self.admit()? {
            let idx = self.pick();
            if self.active[idx].next_into(scratch)? {
                self.next = idx + 1;
                return Ok(true);
            }
            self.retire(idx)?;
        }
        Ok(false)
    }

    fn progress(&self) -> f32 {
        let total = self.registrar.shared.total_inputs;
        if total == 0 {
            return 1.0;
        }
        let active: f32 = self.active.iter().map(|s| s.progress()).sum();
        ((self.exhausted as f32 + active) / total as f32).min(1.0)
    }
}
