//! The partitioned external merge engine.

use config::MergeConfig;
use parking_lot::{Condvar, Mutex};
use record::Record;
use std::collections::VecDeque;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::comparison::Comparison;
use crate::input::OpenContext;
use crate::queue::MergeQueue;
use crate::spill::{self, PassContext};
use crate::{
    spill_path, Compression, Input, InputSink, MergeAction, MergeError, MergePhase, MergePlanner,
    RecordStream, Result, StreamCompression,
};

/// Counters for the work an engine has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inputs_registered: usize,
    /// Intermediate passes completed across all partitions.
    pub passes: usize,
    pub spill_records: u64,
    /// Bytes written to spill files, after compression.
    pub spill_bytes: u64,
    pub stale_files_removed: usize,
}

/// `(local_dir, task_attempt_id)` pairs owned by a live engine in this
/// process. Spill names are only unique per attempt, so a second engine on
/// the same pair would clean up or overwrite the first one's spills.
static LIVE_ATTEMPTS: Mutex<Vec<(PathBuf, String)>> = parking_lot::const_mutex(Vec::new());

/// Claim on one spill namespace, released on drop.
struct AttemptGuard {
    key: (PathBuf, String),
}

impl AttemptGuard {
    fn acquire(local_dir: &Path, task_attempt_id: &str) -> Result<Self> {
        let dir = fs::canonicalize(local_dir).unwrap_or_else(|_| local_dir.to_path_buf());
        let key = (dir, task_attempt_id.to_string());
        let mut live = LIVE_ATTEMPTS.lock();
        if live.contains(&key) {
            return Err(MergeError::AttemptInUse {
                task_attempt_id: key.1,
                dir: key.0.display().to_string(),
            });
        }
        live.push(key.clone());
        Ok(Self { key })
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        LIVE_ATTEMPTS.lock().retain(|k| *k != self.key);
    }
}

/// Admitted inputs of one partition. The only state shared between the
/// registering threads and the background thread.
struct PartitionState<T> {
    planner: MergePlanner,
    disk: VecDeque<Input<T>>,
    memory: Vec<Input<T>>,
    error: Option<Arc<MergeError>>,
}

struct Partition<T> {
    state: Mutex<PartitionState<T>>,
    /// Signalled on final-pass readiness and on failure.
    ready: Condvar,
    /// Signalled on every registration.
    registered: Condvar,
}

/// Background-thread wakeups. `epoch` bumps on every event worth a rescan.
struct Wake {
    epoch: u64,
    registered: usize,
    shutdown: bool,
}

struct Shared<T> {
    config: MergeConfig,
    comparison: Comparison<T>,
    open: OpenContext,
    total_inputs: usize,
    partitions: Vec<Partition<T>>,
    wake: Mutex<Wake>,
    wake_cv: Condvar,
    stats: Mutex<MergeStats>,
}

enum Outcome {
    /// A pass ran; scan again.
    Worked,
    /// Waiting for registrations.
    Idle,
    /// Nothing left for the background thread in this partition.
    Settled,
}

impl<T: Record> Shared<T> {
    fn partition(&self, partition: usize) -> Result<&Partition<T>> {
        self.partitions
            .get(partition)
            .ok_or(MergeError::PartitionOutOfRange {
                partition,
                count: self.partitions.len(),
            })
    }

    fn register(&self, partition: usize, input: Input<T>) -> Result<()> {
        let part = self.partition(partition)?;
        {
            let mut st = part.state.lock();
            if let Some(e) = &st.error {
                return Err(MergeError::Background(Arc::clone(e)));
            }
            if !st.planner.admit(input.is_memory()) {
                return Err(MergeError::TooManyInputs {
                    partition,
                    total: self.total_inputs,
                });
            }
            log::debug!(
                "partition {}: registered {} ({}/{})",
                partition,
                input.name(),
                st.planner.registered(),
                self.total_inputs
            );
            if input.is_memory() {
                st.memory.push(input);
            } else {
                st.disk.push_back(input);
            }
        }
        part.registered.notify_all();

        // The input is visible in the partition before the count moves.
        let mut wake = self.wake.lock();
        wake.epoch += 1;
        wake.registered += 1;
        drop(wake);
        self.wake_cv.notify_all();
        self.stats.lock().inputs_registered += 1;
        Ok(())
    }

    fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut wake = self.wake.lock();
        while wake.registered < count {
            if self.wake_cv.wait_until(&mut wake, deadline).timed_out() {
                return wake.registered >= count;
            }
        }
        true
    }

    fn wait_for_partition_inputs(&self, partition: usize, count: usize, timeout: Duration) -> Result<bool> {
        let part = self.partition(partition)?;
        let deadline = Instant::now() + timeout;
        let mut st = part.state.lock();
        while st.planner.registered() < count {
            if part.registered.wait_until(&mut st, deadline).timed_out() {
                return Ok(st.planner.registered() >= count);
            }
        }
        Ok(true)
    }

    fn fail(&self, partition: usize, err: MergeError) {
        log::error!("partition {}: merge failed: {}", partition, err);
        let part = &self.partitions[partition];
        let mut st = part.state.lock();
        if st.error.is_none() {
            st.error = Some(Arc::new(err));
        }
        drop(st);
        part.ready.notify_all();
    }

    fn stored_error(&self, partition: usize) -> MergeError {
        match &self.partitions[partition].state.lock().error {
            Some(e) => MergeError::Background(Arc::clone(e)),
            None => MergeError::Closed,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.wake.lock().shutdown
    }

    /// One scheduling decision for one partition.
    fn step(&self, partition: usize) -> Result<Outcome> {
        let part = &self.partitions[partition];
        let mut st = part.state.lock();
        if st.error.is_some() {
            return Ok(Outcome::Settled);
        }
        match st.planner.next_action() {
            MergeAction::Wait => match st.planner.phase() {
                MergePhase::Accumulating | MergePhase::Passing => Ok(Outcome::Idle),
                _ => Ok(Outcome::Settled),
            },
            MergeAction::Final => {
                st.planner.mark_ready();
                log::info!(
                    "partition {}: ready for final pass ({} disk, {} memory inputs, {} passes)",
                    partition,
                    st.planner.disk_inputs(),
                    st.planner.memory_inputs(),
                    st.planner.passes()
                );
                drop(st);
                part.ready.notify_all();
                Ok(Outcome::Settled)
            }
            MergeAction::Pass { disk, memory } => {
                st.planner.begin_pass(disk, memory);
                let pass = st.planner.passes();
                let mut inputs: Vec<Input<T>> = st.disk.drain(..disk).collect();
                let memory_inputs: Vec<Input<T>> = st.memory.drain(..memory).collect();
                inputs.extend(memory_inputs);
                drop(st);

                let path = spill_path(
                    &self.config.local_dir,
                    &self.config.task_attempt_id,
                    partition,
                    pass,
                );
                log::debug!(
                    "partition {}: pass {} merging {} disk + {} memory inputs into {}",
                    partition,
                    pass,
                    disk,
                    memory,
                    path.display()
                );
                let ctx = PassContext {
                    comparison: &self.comparison,
                    open: &self.open,
                    compression_kind: self.config.compression,
                    write_buffer: self.config.write_buffer_bytes,
                };
                let output = spill::run_pass(&ctx, path, inputs)?;
                log::debug!(
                    "partition {}: pass {} wrote {} records ({} bytes stored)",
                    partition,
                    pass,
                    output.records,
                    output.stored_len
                );
                {
                    let mut stats = self.stats.lock();
                    stats.passes += 1;
                    stats.spill_records += output.records;
                    stats.spill_bytes += output.stored_len;
                }
                let desc = output.into_descriptor(self.config.delete_intermediate_files);
                let mut st = part.state.lock();
                st.disk.push_back(Input::Deferred(desc));
                st.planner.complete_pass();
                Ok(Outcome::Worked)
            }
        }
    }

    /// Background thread body: run passes until every partition settles or
    /// the engine shuts down.
    fn run(&self) {
        loop {
            let epoch = {
                let wake = self.wake.lock();
                if wake.shutdown {
                    return;
                }
                wake.epoch
            };

            let mut worked = false;
            let mut settled = 0;
            for p in 0..self.partitions.len() {
                if self.is_shutdown() {
                    return;
                }
                match self.step(p) {
                    Ok(Outcome::Worked) => worked = true,
                    Ok(Outcome::Idle) => {}
                    Ok(Outcome::Settled) => settled += 1,
                    Err(e) => {
                        self.fail(p, e);
                        settled += 1;
                    }
                }
            }
            if worked {
                continue;
            }
            if settled == self.partitions.len() {
                log::debug!("merge background thread finished");
                return;
            }

            let mut wake = self.wake.lock();
            while wake.epoch == epoch && !wake.shutdown {
                self.wake_cv.wait(&mut wake);
            }
        }
    }

    fn fail_all(&self, err: impl Fn() -> MergeError) {
        for p in 0..self.partitions.len() {
            self.fail(p, err());
        }
    }
}

/// Consumer-side state of one partition's final pass.
enum FinalState<T> {
    Pending,
    Streaming(MergeQueue<T>),
    Done,
}

/// An external merge over several partitions.
///
/// One background thread runs intermediate passes for every partition; the
/// owning task's thread reads each partition's final pass with
/// [`read_partition_next`](Self::read_partition_next), or all partitions in
/// ascending order with [`read_next`](RecordStream::read_next).
///
/// Dropping the engine stops the background thread and removes every spill
/// file it created (when `delete_intermediate_files` is set).
pub struct PartitionedMerge<T: Record> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
    finals: Vec<FinalState<T>>,
    /// Partition served by the sequential `read_next`.
    current: usize,
    closed: bool,
    /// Dropped after `close`, so a successor only starts once spills are gone.
    _attempt: AttemptGuard,
}

impl<T: Record> PartitionedMerge<T> {
    /// Creates an engine with the default lz4/passthrough compression.
    pub fn new(
        config: MergeConfig,
        partitions: usize,
        total_inputs: usize,
        comparison: Comparison<T>,
    ) -> Result<Self> {
        Self::with_compression(
            config,
            partitions,
            total_inputs,
            comparison,
            Arc::new(StreamCompression),
        )
    }

    /// `total_inputs` is the number of inputs each partition will receive.
    pub fn with_compression(
        config: MergeConfig,
        partitions: usize,
        total_inputs: usize,
        comparison: Comparison<T>,
        compression: Arc<dyn Compression>,
    ) -> Result<Self> {
        config.validate()?;
        let attempt = AttemptGuard::acquire(&config.local_dir, &config.task_attempt_id)?;
        let stale = spill::cleanup_stale_spills(&config.local_dir, &config.task_attempt_id);
        let open = OpenContext {
            compression,
            read_buffer: config.read_buffer_bytes,
            verify_checksums: config.verify_checksums,
        };
        let parts = (0..partitions)
            .map(|_| Partition {
                state: Mutex::new(PartitionState {
                    planner: MergePlanner::new(
                        config.max_file_inputs,
                        total_inputs,
                        config.memory_inputs_in_final_pass,
                    ),
                    disk: VecDeque::new(),
                    memory: Vec::new(),
                    error: None,
                }),
                ready: Condvar::new(),
                registered: Condvar::new(),
            })
            .collect();
        log::debug!(
            "merge {}: {} partitions x {} inputs, max_file_inputs={}, raw={}",
            config.task_attempt_id,
            partitions,
            total_inputs,
            config.max_file_inputs,
            comparison.is_raw()
        );
        let shared = Arc::new(Shared {
            config,
            comparison,
            open,
            total_inputs,
            partitions: parts,
            wake: Mutex::new(Wake {
                epoch: 0,
                registered: 0,
                shutdown: false,
            }),
            wake_cv: Condvar::new(),
            stats: Mutex::new(MergeStats {
                stale_files_removed: stale,
                ..MergeStats::default()
            }),
        });

        let bg = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("merge-{}", shared.config.task_attempt_id))
            .spawn(move || {
                if panic::catch_unwind(AssertUnwindSafe(|| bg.run())).is_err() {
                    bg.fail_all(|| MergeError::Panicked);
                }
            })?;

        Ok(Self {
            shared,
            worker: Some(worker),
            finals: (0..partitions).map(|_| FinalState::Pending).collect(),
            current: 0,
            closed: false,
            _attempt: attempt,
        })
    }

    pub fn partitions(&self) -> usize {
        self.finals.len()
    }

    pub fn total_inputs(&self) -> usize {
        self.shared.total_inputs
    }

    pub fn register_input(&self, partition: usize, input: Input<T>) -> Result<()> {
        if self.closed {
            return Err(MergeError::Closed);
        }
        self.shared.register(partition, input)
    }

    /// A handle other threads can register inputs through.
    pub fn registrar(&self, partition: usize) -> Result<MergeRegistrar<T>> {
        self.shared.partition(partition)?;
        Ok(MergeRegistrar {
            shared: Arc::clone(&self.shared),
            partition,
        })
    }

    /// Blocks until at least `count` inputs were registered across all
    /// partitions. Returns `false` on timeout.
    pub fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool {
        self.shared.wait_for_inputs(count, timeout)
    }

    pub fn wait_for_partition_inputs(
        &self,
        partition: usize,
        count: usize,
        timeout: Duration,
    ) -> Result<bool> {
        self.shared.wait_for_partition_inputs(partition, count, timeout)
    }

    pub fn phase(&self, partition: usize) -> Result<MergePhase> {
        Ok(self.shared.partition(partition)?.state.lock().planner.phase())
    }

    pub fn stats(&self) -> MergeStats {
        *self.shared.stats.lock()
    }

    /// Blocks until the partition is ready, then builds its final heap.
    fn start_final(&mut self, partition: usize) -> Result<()> {
        let part = self.shared.partition(partition)?;
        let inputs = {
            let mut st = part.state.lock();
            loop {
                if let Some(e) = &st.error {
                    return Err(MergeError::Background(Arc::clone(e)));
                }
                if st.planner.phase() == MergePhase::ReadyForFinalPass {
                    break;
                }
                part.ready.wait(&mut st);
            }
            let (disk, memory) = st.planner.begin_final();
            let mut inputs: Vec<Input<T>> = st.disk.drain(..disk).collect();
            let memory_inputs: Vec<Input<T>> = st.memory.drain(..memory).collect();
            inputs.extend(memory_inputs);
            inputs
        };
        log::debug!(
            "partition {}: final pass over {} inputs",
            partition,
            inputs.len()
        );
        let opened = spill::open_all(inputs, &self.shared.open)
            .and_then(|sources| MergeQueue::new(self.shared.comparison.clone(), sources));
        match opened {
            Ok(queue) => {
                self.finals[partition] = FinalState::Streaming(queue);
                Ok(())
            }
            // Later reads must see the failure instead of waiting for a
            // readiness that will never come back.
            Err(e) => Err(self.abort_final(partition, e)),
        }
    }

    fn final_queue(&mut self, partition: usize) -> Result<Option<&mut MergeQueue<T>>> {
        if self.closed {
            return Err(MergeError::Closed);
        }
        self.shared.partition(partition)?;
        if let FinalState::Pending = self.finals[partition] {
            self.start_final(partition)?;
        }
        match &mut self.finals[partition] {
            FinalState::Streaming(queue) => Ok(Some(queue)),
            _ => match &self.shared.partitions[partition].state.lock().error {
                Some(e) => Err(MergeError::Background(Arc::clone(e))),
                None => Ok(None),
            },
        }
    }

    /// A failed final pass cannot resume: its queue is dropped and every
    /// later read reports the same error.
    fn abort_final(&mut self, partition: usize, err: MergeError) -> MergeError {
        self.finals[partition] = FinalState::Done;
        self.shared.fail(partition, err);
        self.shared.stored_error(partition)
    }

    fn finish_partition(&mut self, partition: usize) {
        self.finals[partition] = FinalState::Done;
        let mut st = self.shared.partitions[partition].state.lock();
        st.planner.finish();
        log::debug!("partition {}: done", partition);
    }

    /// Next record of one partition's final pass. Blocks until the
    /// partition is ready.
    pub fn read_partition_next(&mut self, partition: usize) -> Result<Option<T>> {
        let res = match self.final_queue(partition)? {
            Some(queue) => queue.next_new(),
            None => return Ok(None),
        };
        match res {
            Ok(Some(rec)) => Ok(Some(rec)),
            Ok(None) => {
                self.finish_partition(partition);
                Ok(None)
            }
            Err(e) => Err(self.abort_final(partition, e)),
        }
    }

    /// Like [`read_partition_next`](Self::read_partition_next), but
    /// overwrites `scratch` in place.
    pub fn read_partition_next_into(&mut self, partition: usize, scratch: &mut T) -> Result<bool> {
        let res = match self.final_queue(partition)? {
            Some(queue) => queue.next_into(scratch),
            None => return Ok(false),
        };
        match res {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.finish_partition(partition);
                Ok(false)
            }
            Err(e) => Err(self.abort_final(partition, e)),
        }
    }

    /// Progress of one partition: the weighted progress of its final pass
    /// over the declared input count.
    pub fn partition_progress(&self, partition: usize) -> Result<f32> {
        self.shared.partition(partition)?;
        let total = self.shared.total_inputs;
        Ok(match &self.finals[partition] {
            FinalState::Done => 1.0,
            _ if total == 0 => 1.0,
            FinalState::Pending => 0.0,
            FinalState::Streaming(queue) => (queue.weighted_progress() / total as f32).min(1.0),
        })
    }

    /// Stops the background thread, closes open inputs and removes spill
    /// files. Cleanup failures are logged, never returned. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.wake.lock().shutdown = true;
        self.shared.wake_cv.notify_all();
        // A pass in flight runs to completion before the thread sees the flag.
        let joined = match self.worker.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        };
        for fin in self.finals.iter_mut() {
            *fin = FinalState::Done;
        }
        for part in &self.shared.partitions {
            let leftover: Vec<Input<T>> = {
                let mut st = part.state.lock();
                let mut inputs: Vec<Input<T>> = st.disk.drain(..).collect();
                inputs.extend(st.memory.drain(..));
                inputs
            };
            leftover.into_iter().for_each(Input::discard);
            part.ready.notify_all();
        }
        log::debug!("merge {} closed", self.shared.config.task_attempt_id);
        joined.map_err(|_| MergeError::Panicked)
    }
}

impl<T: Record> RecordStream<T> for PartitionedMerge<T> {
    /// Reads every partition in ascending order.
    fn read_next(&mut self) -> Result<Option<T>> {
        while self.current < self.finals.len() {
            if let Some(rec) = self.read_partition_next(self.current)? {
                return Ok(Some(rec));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn read_next_into(&mut self, scratch: &mut T) -> Result<bool> {
        while self.current < self.finals.len() {
            if self.read_partition_next_into(self.current, scratch)? {
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }

    fn progress(&self) -> f32 {
        let n = self.finals.len();
        if n == 0 {
            return 1.0;
        }
        let sum: f32 = (0..n)
            .map(|p| self.partition_progress(p).unwrap_or(0.0))
            .sum();
        sum / n as f32
    }
}

impl<T: Record> Drop for PartitionedMerge<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("merge engine closed with error: {}", e);
        }
    }
}

/// A cloneable handle for registering inputs into one partition from any
/// thread.
pub struct MergeRegistrar<T> {
    shared: Arc<Shared<T>>,
    partition: usize,
}

impl<T> Clone for MergeRegistrar<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            partition: self.partition,
        }
    }
}

impl<T: Record> InputSink<T> for MergeRegistrar<T> {
    fn register_input(&self, input: Input<T>) -> Result<()> {
        if self.shared.is_shutdown() {
            return Err(MergeError::Closed);
        }
        self.shared.register(self.partition, input)
    }

    fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool {
        self.shared
            .wait_for_partition_inputs(self.partition, count, timeout)
            .unwrap_or(false)
    }

    fn registered_inputs(&self) -> usize {
        self.shared.partitions[self.partition]
            .state
            .lock()
            .planner
            .registered()
    }

    fn total_inputs(&self) -> usize {
        self.shared.total_inputs
    }
}

/// A single-partition external merge.
pub struct ExternalMerge<T: Record> {
    inner: PartitionedMerge<T>,
}

impl<T: Record> ExternalMerge<T> {
    pub fn new(config: MergeConfig, total_inputs: usize, comparison: Comparison<T>) -> Result<Self> {
        Ok(Self {
            inner: PartitionedMerge::new(config, 1, total_inputs, comparison)?,
        })
    }

    pub fn with_compression(
        config: MergeConfig,
        total_inputs: usize,
        comparison: Comparison<T>,
        compression: Arc<dyn Compression>,
    ) -> Result<Self> {
        Ok(Self {
            inner: PartitionedMerge::with_compression(config, 1, total_inputs, comparison, compression)?,
        })
    }

    pub fn register_input(&self, input: Input<T>) -> Result<()> {
        self.inner.register_input(0, input)
    }

    pub fn registrar(&self) -> MergeRegistrar<T> {
        MergeRegistrar {
            shared: Arc::clone(&self.inner.shared),
            partition: 0,
        }
    }

    pub fn wait_for_inputs(&self, count: usize, timeout: Duration) -> bool {
        self.inner.wait_for_inputs(count, timeout)
    }

    pub fn phase(&self) -> MergePhase {
        self.inner.shared.partitions[0].state.lock().planner.phase()
    }

    pub fn stats(&self) -> MergeStats {
        self.inner.stats()
    }

    pub fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

impl<T: Record> RecordStream<T> for ExternalMerge<T> {
    fn read_next(&mut self) -> Result<Option<T>> {
        self.inner.read_partition_next(0)
    }

    fn read_next_into(&mut self, scratch: &mut T) -> Result<bool> {
        self.inner.read_partition_next_into(0, scratch)
    }

    fn progress(&self) -> f32 {
        self.inner.partition_progress(0).unwrap_or(0.0)
    }
}
