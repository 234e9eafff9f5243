/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timeshare priority decay (component C6).
//!
//! Everything here is a pure function over a [`Thread`] and (where needed)
//! its owning [`SchedClutchBucketGroup`] — no container mutation, no
//! selection logic. `sched_tick` and the façade's setrun/quantum-expire
//! catch-up both call into this module.

use crate::clutch::SchedClutchBucketGroup;
use crate::constants::*;
use crate::thread::Thread;

/// `compute_sched_pri`: FIXPRI and bound threads bypass decay entirely;
/// `pri_shift >= 127` is the explicit "no decay in effect" sentinel.
pub fn compute_sched_pri(thread: &Thread, cbg: &SchedClutchBucketGroup) -> i32 {
    let _ = cbg; // the cbg's pri_shift was already copied onto the thread by the caller
    if is_above_timeshare(thread.sched_bucket) {
        return thread.base_pri;
    }
    if thread.is_bound() {
        return thread.base_pri;
    }
    if thread.pri_shift >= 127 {
        return thread.base_pri;
    }
    let decayed = thread.base_pri - (thread.sched_usage >> thread.pri_shift) as i32;
    decayed.clamp(MINPRI, thread.max_priority)
}

/// Folds `delta_us` of observed CPU time into both the thread's own
/// counters and (for unbound threads) its clutch-bucket-group's.
pub fn update_thread_cpu_usage(thread: &mut Thread, delta_us: u64, cbg: &mut SchedClutchBucketGroup) {
    thread.cpu_usage += delta_us;
    thread.cpu_delta += delta_us;
    if thread.pri_shift < 127 {
        thread.sched_usage += delta_us;
    }
    if !thread.is_bound() {
        cbg.cpu_usage_update(delta_us);
    }
}

/// Applies `ticks` steps of the XNU `(5/8)^ticks` decay approximation to a
/// thread's `cpu_usage`/`sched_usage`, via the exact shift table rather than
/// a floating-point multiplication (property I-10).
pub fn age_thread_cpu_usage(thread: &mut Thread, ticks: u32) {
    if ticks >= SCHED_DECAY_TICKS {
        thread.cpu_usage = 0;
        thread.sched_usage = 0;
        thread.cpu_delta = 0;
        return;
    }
    let (shift1, shift2) = SCHED_DECAY_SHIFTS[ticks as usize];
    let apply = |v: u64| -> u64 {
        if shift2 >= 0 {
            (v >> shift1) + (v >> shift2)
        } else {
            (v >> shift1).saturating_sub(v >> (-shift2))
        }
    };
    thread.cpu_usage = apply(thread.cpu_usage);
    thread.sched_usage = apply(thread.sched_usage);
    thread.cpu_delta = 0;
}

/// Shared load->shift formula behind both `pri_shift_for_load` and
/// [`SchedClutchBucketGroup::pri_shift_update`]. `adjusted_run_count` has
/// already had the "NCPU-wide workloads don't decay" `-1` applied by the
/// caller.
pub(crate) fn pri_shift_from_adjusted_run_count(adjusted_run_count: i64, processor_count: i64) -> i32 {
    let load = (adjusted_run_count.max(0) / processor_count.max(1)).min((NRQS - 1) as i64) as i32;
    let shift = SCHED_FIXED_SHIFT - sched_load_shifts()[load as usize] as i32;
    if shift > SCHED_PRI_SHIFT_MAX {
        127
    } else {
        shift
    }
}

/// Standalone mirror of `SchedClutchBucketGroup::pri_shift_update`'s
/// formula, for diagnostics/tests that don't have a `cbg` handy. Subtracts
/// the "NCPU-wide workloads don't decay" `1` itself.
pub fn pri_shift_for_load(run_count: i64, processor_count: i64) -> i32 {
    pri_shift_from_adjusted_run_count((run_count - 1).max(0), processor_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clutch::SchedClutchBucketGroup;
    use crate::ids::ThreadGroupId;
    use crate::thread::{QosBucket, SchedMode, ThreadGroup};

    fn bucket_thread(base_pri: i32, max_pri: i32) -> Thread {
        Thread::new(
            crate::ids::ThreadId(0),
            "t",
            ThreadGroupId(0),
            SchedMode::Timeshare,
            base_pri,
            max_pri,
        )
    }

    #[allow(dead_code)]
    fn _unused_threadgroup() -> ThreadGroup {
        ThreadGroup::new(ThreadGroupId(0), "tg")
    }

    #[test]
    fn compute_sched_pri_returns_base_pri_when_no_decay_in_effect() {
        let t = bucket_thread(47, 63);
        let cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        assert_eq!(compute_sched_pri(&t, &cbg), 47);
    }

    #[test]
    fn compute_sched_pri_applies_decay_and_clamps() {
        let mut t = bucket_thread(47, 63);
        t.pri_shift = 1;
        t.sched_usage = 64;
        let cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        // 47 - (64 >> 1) = 47 - 32 = 15
        assert_eq!(compute_sched_pri(&t, &cbg), 15);
    }

    #[test]
    fn compute_sched_pri_bypasses_decay_for_bound_threads() {
        let mut t = bucket_thread(47, 63);
        t.pri_shift = 1;
        t.sched_usage = 1_000_000;
        t.bound_processor = Some(crate::ids::ProcessorId(0));
        let cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        assert_eq!(compute_sched_pri(&t, &cbg), 47);
    }

    #[test]
    fn age_thread_cpu_usage_zeroes_at_decay_tick_boundary() {
        let mut t = bucket_thread(47, 63);
        t.cpu_usage = 1234;
        t.sched_usage = 5678;
        age_thread_cpu_usage(&mut t, SCHED_DECAY_TICKS);
        assert_eq!(t.cpu_usage, 0);
        assert_eq!(t.sched_usage, 0);
    }

    #[test]
    fn age_thread_cpu_usage_one_tick_uses_exact_shift_table_not_58_multiply() {
        let mut t = bucket_thread(47, 63);
        t.sched_usage = 7;
        age_thread_cpu_usage(&mut t, 1);
        // SCHED_DECAY_SHIFTS[1] = (1, 3): (7>>1) + (7>>3) = 3 + 0 = 3, not 4 (5/8 * 7 ~ 4.375 rounds to 4)
        assert_eq!(t.sched_usage, 3);
    }

    #[test]
    fn pri_shift_for_load_matches_cbg_formula_after_subtracting_one() {
        let mut cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        cbg.run_count = 5;
        cbg.pri_shift_update(1);
        assert_eq!(cbg.pri_shift, pri_shift_for_load(5, 1));
    }
}
