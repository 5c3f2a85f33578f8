//! Per-partition merge state machine.
//!
//! [`MergePlanner`] works on counts only: how many disk and memory inputs
//! are waiting, how many of the declared inputs have been registered. It
//! never touches a record, which keeps the pass schedule testable on its
//! own.

/// Lifecycle of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    /// Inputs are arriving; no pass is running.
    Accumulating,
    /// An intermediate pass is being written to a spill file.
    Passing,
    /// Every input arrived and the rest fits in one pass.
    ReadyForFinalPass,
    /// The final heap is being streamed to the consumer.
    FinalPass,
    /// The final heap is exhausted.
    Done,
}

/// What the background thread should do next for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// Not enough data for a legal pass. Not an error; wait for more
    /// registrations.
    Wait,
    /// Merge the oldest `disk` disk inputs and `memory` memory inputs into a
    /// spill file.
    Pass { disk: usize, memory: usize },
    /// The partition can move to `ReadyForFinalPass`.
    Final,
}

/// Fan-in of the next intermediate pass: the naive `min(remaining, max)`.
pub fn disk_inputs_for_pass(remaining: usize, max: usize) -> usize {
    remaining.min(max)
}

#[derive(Debug, Clone)]
pub struct MergePlanner {
    max_file_inputs: usize,
    total_inputs: usize,
    memory_in_final: bool,
    registered: usize,
    disk: usize,
    memory: usize,
    passes: usize,
    phase: MergePhase,
}

impl MergePlanner {
    /// # Panics
    ///
    /// Panics if `max_file_inputs < 2`.
    pub fn new(max_file_inputs: usize, total_inputs: usize, memory_in_final: bool) -> Self {
        assert!(max_file_inputs >= 2, "max_file_inputs must be at least 2");
        Self {
            max_file_inputs,
            total_inputs,
            memory_in_final,
            registered: 0,
            disk: 0,
            memory: 0,
            passes: 0,
            phase: MergePhase::Accumulating,
        }
    }

    pub fn phase(&self) -> MergePhase {
        self.phase
    }

    pub fn registered(&self) -> usize {
        self.registered
    }

    pub fn total_inputs(&self) -> usize {
        self.total_inputs
    }

    pub fn all_registered(&self) -> bool {
        self.registered >= self.total_inputs
    }

    /// Disk inputs currently waiting, pass outputs included.
    pub fn disk_inputs(&self) -> usize {
        self.disk
    }

    pub fn memory_inputs(&self) -> usize {
        self.memory
    }

    /// Intermediate passes completed so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Records one registration. Returns `false` (and changes nothing) once
    /// every declared input has been registered.
    pub fn admit(&mut self, memory: bool) -> bool {
        if self.all_registered() {
            return false;
        }
        self.registered += 1;
        if memory {
            self.memory += 1;
        } else {
            self.disk += 1;
        }
        true
    }

    pub fn next_action(&self) -> MergeAction {
        if self.phase != MergePhase::Accumulating {
            return MergeAction::Wait;
        }
        let max = self.max_file_inputs;
        if self.disk > max {
            return MergeAction::Pass {
                disk: disk_inputs_for_pass(self.disk, max),
                memory: self.memory,
            };
        }
        if !self.all_registered() {
            return MergeAction::Wait;
        }
        if !self.memory_in_final && self.memory > 0 {
            // Spill the memory inputs. Fold disk inputs in too if the spill
            // would otherwise push the disk count over the cap.
            let disk = if self.disk + 1 > max {
                disk_inputs_for_pass(self.disk, max)
            } else {
                0
            };
            return MergeAction::Pass {
                disk,
                memory: self.memory,
            };
        }
        MergeAction::Final
    }

    /// A pass is legal unless it would swallow every remaining input after
    /// all of them arrived; that pass is the final one and must be streamed.
    /// Spilling memory inputs ahead of a disk-only final pass is the one
    /// exception.
    fn is_legal_pass(&self, disk: usize, memory: usize) -> bool {
        if disk + memory == 0 || disk > self.disk || memory > self.memory {
            return false;
        }
        let consumes_everything = disk == self.disk && memory == self.memory;
        let memory_spill = !self.memory_in_final && memory > 0;
        !(self.all_registered() && consumes_everything) || memory_spill
    }

    /// # Panics
    ///
    /// Panics if the pass is not legal in the current state.
    pub fn begin_pass(&mut self, disk: usize, memory: usize) {
        assert_eq!(self.phase, MergePhase::Accumulating, "pass started while {:?}", self.phase);
        assert!(
            self.is_legal_pass(disk, memory),
            "illegal merge pass: disk={} memory={} (waiting disk={} memory={}, registered {}/{})",
            disk,
            memory,
            self.disk,
            self.memory,
            self.registered,
            self.total_inputs
        );
        self.disk -= disk;
        self.memory -= memory;
        self.phase = MergePhase::Passing;
    }

    /// The pass output becomes one more disk input.
    pub fn complete_pass(&mut self) {
        assert_eq!(self.phase, MergePhase::Passing, "no pass in flight");
        self.disk += 1;
        self.passes += 1;
        self.phase = MergePhase::Accumulating;
    }

    /// # Panics
    ///
    /// Panics unless [`next_action`](Self::next_action) is `Final`.
    pub fn mark_ready(&mut self) {
        assert_eq!(
            self.next_action(),
            MergeAction::Final,
            "final pass is not possible yet"
        );
        self.phase = MergePhase::ReadyForFinalPass;
    }

    /// Enters the final pass and returns how many disk and memory inputs it
    /// merges.
    ///
    /// # Panics
    ///
    /// Panics unless the partition is `ReadyForFinalPass`. Forcing the final
    /// pass early is a programming error.
    pub fn begin_final(&mut self) -> (usize, usize) {
        assert_eq!(
            self.phase,
            MergePhase::ReadyForFinalPass,
            "final pass requested before the partition is ready"
        );
        self.phase = MergePhase::FinalPass;
        let taken = (self.disk, self.memory);
        self.disk = 0;
        self.memory = 0;
        taken
    }

    pub fn finish(&mut self) {
        assert_eq!(self.phase, MergePhase::FinalPass, "no final pass in flight");
        self.phase = MergePhase::Done;
    }
}
