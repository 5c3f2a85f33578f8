//! # Merge - external, partitioned, multi-pass merge engine
//!
//! Presents N independently arriving, already sorted inputs as one sorted
//! record stream per partition, while never holding more than
//! `max_file_inputs` disk inputs open at once.
//!
//! ## Architecture
//!
//! ```text
//!  registering threads            background thread              task thread
//!  ───────────────────            ─────────────────              ───────────
//!  register_input(p, input) ──►  [partition p lists] ──► pass ──► spill file
//!                                       ▲                           │
//!                                       └───── pass output ◄────────┘
//!                                       │
//!                                 ReadyForFinalPass ──► read_next() (streamed)
//! ```
//!
//! - **Registration**: inputs are appended to per-partition disk and memory
//!   lists under that partition's lock. The background thread is woken.
//! - **Passes**: whenever a partition holds more than `max_file_inputs` disk
//!   inputs, the background thread merges `min(remaining, max_file_inputs)`
//!   of them (plus every memory input) into a spill file named by
//!   [`spill_path`] and registers it back as a disk input.
//! - **Final pass**: once every declared input has arrived and the rest fits
//!   under the cap, the partition becomes ready. The consumer's first
//!   `read_next` builds the last heap and streams from it; it is never
//!   spilled.
//!
//! Each partition runs through the phases tracked by [`MergePlanner`]:
//! `Accumulating -> Passing -> ReadyForFinalPass -> FinalPass -> Done`.
//!
//! ## Comparison
//!
//! [`Comparison::select`] picks raw byte comparison when no explicit
//! comparator is configured and the inputs offer raw reads. Otherwise
//! records are decoded and ordered by the typed comparator. A raw-mode pass
//! over any source without raw reads, such as a relay, decodes too.
//!
//! ## Example
//!
//! ```rust,no_run
//! use merge::{Comparison, ExternalMerge, Input, RecordStream};
//! use config::MergeConfig;
//! use record::MemorySource;
//!
//! let cfg = MergeConfig::new("/tmp", "task_0_attempt_0");
//! let mut m = ExternalMerge::<u64>::new(cfg, 2, Comparison::select(None, true)).unwrap();
//! m.register_input(Input::Memory(MemorySource::from_records("a", &[1, 4]).unwrap())).unwrap();
//! m.register_input(Input::Memory(MemorySource::from_records("b", &[2, 3]).unwrap())).unwrap();
//! while let Some(v) = m.read_next().unwrap() {
//!     println!("{v}");
//! }
//! ```

mod aggregator;
mod comparison;
mod compress;
mod engine;
mod heap;
mod input;
mod planner;
mod queue;
mod spill;

use std::sync::Arc;
use thiserror::Error;

pub use aggregator::{InputSink, RecordStream, RoundRobinAggregator, RoundRobinRegistrar};
pub use comparison::Comparison;
pub use compress::{Compression, CompressionKind, SpillWrite, StreamCompression};
pub use engine::{ExternalMerge, MergeRegistrar, MergeStats, PartitionedMerge};
pub use heap::MergeHeap;
pub use input::{Input, InputDescriptor};
pub use planner::{disk_inputs_for_pass, MergeAction, MergePhase, MergePlanner};
pub use spill::{spill_path, PassOutput, SPILL_SUFFIX};

/// Errors raised by the merge engine and the aggregators.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Record(#[from] record::RecordError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid merge config: {0}")]
    Config(#[from] config::ConfigError),

    #[error("partition {partition} out of range (partition count {count})")]
    PartitionOutOfRange { partition: usize, count: usize },

    #[error("partition {partition} already has all {total} declared inputs")]
    TooManyInputs { partition: usize, total: usize },

    /// Another live engine in this process owns the same spill namespace.
    #[error("task attempt {task_attempt_id} already has a live merge in {dir}")]
    AttemptInUse { task_attempt_id: String, dir: String },

    #[error("merge engine closed")]
    Closed,

    /// A pass on the background thread failed. Every later call on the
    /// affected partition reports the same failure.
    #[error("background merge pass failed: {0}")]
    Background(Arc<MergeError>),

    #[error("background merge thread panicked")]
    Panicked,
}

pub type Result<T, E = MergeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests;
