use crate::{disk_inputs_for_pass, MergeAction, MergePhase, MergePlanner};
use proptest::prelude::*;

/// Drives a planner whose inputs have all been admitted until it is ready,
/// returning the number of intermediate passes.
fn run_to_ready(planner: &mut MergePlanner) -> usize {
    loop {
        match planner.next_action() {
            MergeAction::Pass { disk, memory } => {
                planner.begin_pass(disk, memory);
                planner.complete_pass();
            }
            MergeAction::Final => {
                planner.mark_ready();
                return planner.passes();
            }
            MergeAction::Wait => panic!("planner waiting with every input admitted"),
        }
    }
}

/// Passes needed when every pass merges `min(remaining, max)` inputs.
fn expected_passes(mut disk: usize, max: usize) -> usize {
    let mut passes = 0;
    while disk > max {
        disk = disk - disk_inputs_for_pass(disk, max) + 1;
        passes += 1;
    }
    passes
}

#[test]
fn fan_in_is_min_of_remaining_and_max() {
    assert_eq!(disk_inputs_for_pass(250, 100), 100);
    assert_eq!(disk_inputs_for_pass(7, 100), 7);
}

#[test]
fn three_inputs_with_fan_in_two_need_one_pass() {
    let mut p = MergePlanner::new(2, 3, true);
    for _ in 0..3 {
        assert!(p.admit(false));
    }
    assert_eq!(p.next_action(), MergeAction::Pass { disk: 2, memory: 0 });
    p.begin_pass(2, 0);
    assert_eq!(p.phase(), MergePhase::Passing);
    assert_eq!(p.next_action(), MergeAction::Wait);
    p.complete_pass();
    assert_eq!(p.disk_inputs(), 2);
    assert_eq!(p.next_action(), MergeAction::Final);
    p.mark_ready();
    assert_eq!(p.begin_final(), (2, 0));
    p.finish();
    assert_eq!(p.phase(), MergePhase::Done);
    assert_eq!(p.passes(), 1);
}

#[test]
fn two_hundred_fifty_inputs_with_fan_in_one_hundred() {
    let mut p = MergePlanner::new(100, 250, true);
    for _ in 0..250 {
        p.admit(false);
    }
    // 250 -> 151 -> 52, then the final pass.
    assert_eq!(run_to_ready(&mut p), 2);
    assert_eq!(p.disk_inputs(), 52);
}

#[test]
fn waits_until_every_input_is_registered() {
    let mut p = MergePlanner::new(4, 3, true);
    p.admit(false);
    p.admit(true);
    assert_eq!(p.next_action(), MergeAction::Wait);
    p.admit(false);
    assert_eq!(p.next_action(), MergeAction::Final);
}

#[test]
fn passes_run_before_all_inputs_arrive() {
    let mut p = MergePlanner::new(2, 10, true);
    for _ in 0..3 {
        p.admit(false);
    }
    assert!(matches!(p.next_action(), MergeAction::Pass { disk: 2, .. }));
}

#[test]
fn admissions_beyond_total_are_refused() {
    let mut p = MergePlanner::new(2, 1, true);
    assert!(p.admit(false));
    assert!(!p.admit(false));
    assert_eq!(p.registered(), 1);
}

#[test]
fn zero_inputs_are_immediately_final() {
    let mut p = MergePlanner::new(2, 0, true);
    assert_eq!(p.next_action(), MergeAction::Final);
    p.mark_ready();
    assert_eq!(p.begin_final(), (0, 0));
}

#[test]
fn memory_inputs_are_spilled_when_excluded_from_final_pass() {
    let mut p = MergePlanner::new(4, 3, false);
    p.admit(true);
    p.admit(true);
    p.admit(false);
    assert_eq!(p.next_action(), MergeAction::Pass { disk: 0, memory: 2 });
    p.begin_pass(0, 2);
    p.complete_pass();
    assert_eq!(p.next_action(), MergeAction::Final);
    p.mark_ready();
    assert_eq!(p.begin_final(), (2, 0));
}

#[test]
fn memory_spill_folds_disk_inputs_when_at_capacity() {
    let mut p = MergePlanner::new(2, 3, false);
    p.admit(false);
    p.admit(false);
    p.admit(true);
    assert_eq!(p.next_action(), MergeAction::Pass { disk: 2, memory: 1 });
}

#[test]
#[should_panic(expected = "final pass requested before the partition is ready")]
fn forcing_final_pass_early_panics() {
    let mut p = MergePlanner::new(2, 3, true);
    p.admit(false);
    p.begin_final();
}

#[test]
#[should_panic(expected = "final pass is not possible yet")]
fn marking_ready_with_inputs_outstanding_panics() {
    let mut p = MergePlanner::new(2, 3, true);
    p.admit(false);
    p.mark_ready();
}

#[test]
#[should_panic(expected = "illegal merge pass")]
fn pass_swallowing_every_input_is_illegal() {
    let mut p = MergePlanner::new(4, 2, true);
    p.admit(false);
    p.admit(false);
    p.begin_pass(2, 0);
}

#[test]
#[should_panic(expected = "max_file_inputs must be at least 2")]
fn fan_in_below_two_panics() {
    MergePlanner::new(1, 4, true);
}

proptest! {
    #[test]
    fn prop_pass_count_matches_naive_fan_in(k in 0usize..600, m in 2usize..120) {
        let mut p = MergePlanner::new(m, k, true);
        for _ in 0..k {
            p.admit(false);
        }
        prop_assert_eq!(run_to_ready(&mut p), expected_passes(k, m));
        prop_assert!(p.disk_inputs() <= m);
    }

    /// Inputs arrive one at a time and the planner runs whatever it allows
    /// after each arrival. It is never ready early and becomes ready once.
    #[test]
    fn prop_readiness_is_gated_on_all_inputs(
        arrivals in prop::collection::vec(any::<bool>(), 0..80),
        m in 2usize..8,
        memory_in_final in any::<bool>(),
    ) {
        let total = arrivals.len();
        let mut p = MergePlanner::new(m, total, memory_in_final);
        let mut ready = 0;
        let drive = |p: &mut MergePlanner, ready: &mut usize| loop {
            match p.next_action() {
                MergeAction::Pass { disk, memory } => {
                    p.begin_pass(disk, memory);
                    p.complete_pass();
                }
                MergeAction::Final => {
                    assert!(p.all_registered());
                    p.mark_ready();
                    *ready += 1;
                    break;
                }
                MergeAction::Wait => break,
            }
        };
        drive(&mut p, &mut ready);
        for memory in arrivals {
            prop_assert_ne!(p.phase(), MergePhase::ReadyForFinalPass);
            p.admit(memory);
            drive(&mut p, &mut ready);
            prop_assert!(p.disk_inputs() <= m || p.phase() == MergePhase::ReadyForFinalPass);
        }
        prop_assert_eq!(ready, 1);
        prop_assert_eq!(p.phase(), MergePhase::ReadyForFinalPass);
        if !memory_in_final {
            prop_assert_eq!(p.memory_inputs(), 0);
        }
    }
}
