/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The Clutch hierarchy: `SchedClutch` (one per thread group) owning six
//! `SchedClutchBucketGroup`s (one per [`QosBucket`]), each wrapping exactly
//! one `SchedClutchBucket` since this simulation models a single cluster
//! (component C3).
//!
//! This is the middle layer of the three-level hierarchy described in the
//! module overview: threads feed into a bucket's `thread_runq`, bucket
//! priority rolls up through `pri_calculate`, and the root bucket
//! (`crate::clutch_root`) picks among clutch buckets by EDF/warp.

use crate::constants::*;
use crate::ids::{ThreadGroupId, ThreadId};
use crate::priority_queue::{PriorityQueueMax, StablePriorityQueue};
use crate::thread::{QosBucket, ALL_QOS_BUCKETS, QOS_BUCKET_COUNT};
use crate::timeshare;

/// The leaf a root bucket ultimately dequeues from. One exists per
/// `(ThreadGroupId, QosBucket)` pair.
#[derive(Debug, Clone)]
pub struct SchedClutchBucket {
    pub bucket: QosBucket,
    pub priority: i32,
    pub thr_count: u32,
    /// Runnable threads at this bucket, ordered by [`Thread::clutch_priority`]
    /// with preempted-first tiebreaking.
    pub thread_runq: StablePriorityQueue<ThreadId>,
    /// Parallel max-heap used only to answer "what's the highest
    /// `clutch_priority` among my members" in O(log n) for `base_pri`.
    pub clutchpri_prioq: PriorityQueueMax<ThreadId>,
    /// Whether this bucket is currently linked into the root hierarchy.
    /// Replaces a back-pointer to `ClutchRoot`, since there is exactly one.
    pub root_linked: bool,
}

impl SchedClutchBucket {
    pub fn new(bucket: QosBucket) -> Self {
        Self {
            bucket,
            priority: NOPRI,
            thr_count: 0,
            thread_runq: StablePriorityQueue::new(),
            clutchpri_prioq: PriorityQueueMax::new(),
            root_linked: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.thread_runq.is_empty()
    }

    /// Highest `clutch_priority()` among runnable members, or `NOPRI` if
    /// none are runnable.
    pub fn base_pri(&self) -> i32 {
        self.clutchpri_prioq.max_priority()
    }

    /// `sched_clutch_bucket_pri_calculate()`: the FIXPRI bucket passes its
    /// highest member priority through unmodified (it never ages and never
    /// gets an interactivity bonus); every other bucket adds the owning
    /// bucket group's interactivity score, capped at `MAXPRI`.
    pub fn pri_calculate(&mut self, interactivity_score: i32) -> i32 {
        let base = self.base_pri();
        self.priority = if base == NOPRI {
            NOPRI
        } else if is_above_timeshare(self.bucket) {
            base
        } else {
            (base + interactivity_score).min(MAXPRI)
        };
        self.priority
    }
}

/// Per-QoS-bucket aggregate state for one thread group: CPU accounting,
/// interactivity scoring and the pri-shift used by [`timeshare`] decay, plus
/// the single `SchedClutchBucket` it wraps.
#[derive(Debug, Clone)]
pub struct SchedClutchBucketGroup {
    pub bucket: QosBucket,
    pub clutch_bucket: SchedClutchBucket,

    pub run_count: u32,
    pub blocked_count: u32,
    pub blocked_ts: u64,

    pub pending_count: u32,
    pub pending_ts: u64,

    pub interactivity_score: i32,
    pub interactivity_ts: u64,

    pub cpu_used: u64,
    pub cpu_blocked: u64,

    pub pri_shift: i32,
}

impl SchedClutchBucketGroup {
    pub fn new(bucket: QosBucket) -> Self {
        Self {
            bucket,
            clutch_bucket: SchedClutchBucket::new(bucket),
            run_count: 0,
            blocked_count: 0,
            blocked_ts: BUCKET_GROUP_BLOCKED_TS_INVALID,
            pending_count: 0,
            pending_ts: BUCKET_GROUP_PENDING_INVALID,
            interactivity_score: INITIAL_INTERACTIVITY,
            interactivity_ts: 0,
            cpu_used: 0,
            cpu_blocked: 0,
            pri_shift: 127,
        }
    }

    /// A bucket group becoming non-empty forgives some of its blocked-time
    /// debt (`cpu_adjust`) and clears the blocked bookkeeping.
    pub fn run_count_inc(&mut self, now: u64) -> u32 {
        if self.run_count == 0 {
            self.cpu_adjust(now);
        }
        self.run_count += 1;
        self.blocked_ts = BUCKET_GROUP_BLOCKED_TS_INVALID;
        self.run_count
    }

    /// A bucket group going empty starts its blocked-time clock.
    pub fn run_count_dec(&mut self, now: u64) -> u32 {
        self.run_count = self.run_count.saturating_sub(1);
        if self.run_count == 0 {
            self.blocked_count += 1;
            self.blocked_ts = now;
        }
        self.run_count
    }

    pub fn thr_count_inc(&mut self) -> u32 {
        self.clutch_bucket.thr_count += 1;
        self.clutch_bucket.thr_count
    }

    pub fn thr_count_dec(&mut self) -> u32 {
        self.clutch_bucket.thr_count = self.clutch_bucket.thr_count.saturating_sub(1);
        self.clutch_bucket.thr_count
    }

    pub fn cpu_usage_update(&mut self, delta_us: u64) {
        self.cpu_used += delta_us;
    }

    /// Mirrors `sched_clutch_bucket_group_cpu_adjust()`: time blocked under
    /// `ADJUST_THRESHOLD_US` leaves accrued usage alone; longer blocks
    /// forgive it at `ADJUST_RATIO : 1`, crediting the forgiven amount to
    /// `cpu_blocked` so it still counts against interactivity.
    fn cpu_adjust(&mut self, now: u64) {
        if self.blocked_ts == BUCKET_GROUP_BLOCKED_TS_INVALID {
            return;
        }
        let blocked_for = now.saturating_sub(self.blocked_ts);
        if blocked_for > ADJUST_THRESHOLD_US {
            let forgiven = self.cpu_used / ADJUST_RATIO;
            self.cpu_used -= forgiven;
            self.cpu_blocked += forgiven;
        }
    }

    /// CPU-usage term of `sched_clutch_bucket_group_interactivity_score_calculate()`:
    /// the fraction of total tracked time spent blocked, scaled into
    /// `[0, 2*INTERACTIVE_PRI_DEFAULT]` so a purely CPU-bound group scores 0
    /// and a purely blocked (interactive) one scores the maximum bonus.
    fn interactivity_from_cpu_data(&self) -> i32 {
        let total = self.cpu_used + self.cpu_blocked;
        if total == 0 {
            return INITIAL_INTERACTIVITY;
        }
        let span = (2 * INTERACTIVE_PRI_DEFAULT) as u64;
        ((self.cpu_blocked * span) / total).min(span) as i32
    }

    /// FIXPRI never ages; an empty root bucket (`global_bucket_load == 0`)
    /// has nothing to age against, so the score is left untouched (matches
    /// source behavior of skipping ageout rather than decaying toward a
    /// default).
    pub fn interactivity_score_calculate(&mut self, now: u64, global_bucket_load: u32) -> i32 {
        if is_above_timeshare(self.bucket) {
            return INTERACTIVE_PRI_DEFAULT;
        }
        if global_bucket_load == 0 {
            self.interactivity_ts = now;
            return self.interactivity_score;
        }
        self.interactivity_score = self.interactivity_from_cpu_data();
        self.interactivity_ts = now;
        self.interactivity_score
    }

    /// `sched_clutch_bucket_group_pri_shift_update()`: the bucket group's
    /// own pri-shift, fed by its current runnable count rather than a
    /// standalone `run_count` argument (see [`timeshare::pri_shift_for_load`]
    /// for the free-function equivalent).
    pub fn pri_shift_update(&mut self, processor_count: i64) {
        let adjusted = (self.run_count as i64 - 1).max(0);
        self.pri_shift = timeshare::pri_shift_from_adjusted_run_count(adjusted, processor_count);
    }
}

/// One per thread group: the full set of per-QoS-bucket aggregates.
#[derive(Debug, Clone)]
pub struct SchedClutch {
    pub tg_id: ThreadGroupId,
    pub thr_count: u32,
    pub bucket_groups: [SchedClutchBucketGroup; QOS_BUCKET_COUNT],
}

impl SchedClutch {
    pub fn new(tg_id: ThreadGroupId) -> Self {
        Self {
            tg_id,
            thr_count: 0,
            bucket_groups: ALL_QOS_BUCKETS.map(SchedClutchBucketGroup::new),
        }
    }

    pub fn bucket_group(&self, bucket: QosBucket) -> &SchedClutchBucketGroup {
        &self.bucket_groups[bucket.index()]
    }

    pub fn bucket_group_mut(&mut self, bucket: QosBucket) -> &mut SchedClutchBucketGroup {
        &mut self.bucket_groups[bucket.index()]
    }

    pub fn thr_count_inc(&mut self) -> u32 {
        self.thr_count += 1;
        self.thr_count
    }

    pub fn thr_count_dec(&mut self) -> u32 {
        self.thr_count = self.thr_count.saturating_sub(1);
        self.thr_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clutch_has_one_bucket_group_per_qos_bucket_all_empty() {
        let clutch = SchedClutch::new(ThreadGroupId(0));
        for bucket in ALL_QOS_BUCKETS {
            let cbg = clutch.bucket_group(bucket);
            assert_eq!(cbg.run_count, 0);
            assert!(cbg.clutch_bucket.is_empty());
            assert_eq!(cbg.interactivity_score, INITIAL_INTERACTIVITY);
        }
    }

    #[test]
    fn run_count_dec_to_zero_starts_blocked_clock() {
        let mut cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        cbg.run_count_inc(100);
        assert_eq!(cbg.blocked_ts, BUCKET_GROUP_BLOCKED_TS_INVALID);
        cbg.run_count_dec(200);
        assert_eq!(cbg.run_count, 0);
        assert_eq!(cbg.blocked_ts, 200);
        assert_eq!(cbg.blocked_count, 1);
    }

    #[test]
    fn cpu_adjust_forgives_usage_after_long_block() {
        let mut cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        cbg.cpu_used = 1_000_000;
        cbg.run_count_dec(0);
        cbg.blocked_ts = 0;
        cbg.run_count_inc(ADJUST_THRESHOLD_US + 1);
        assert_eq!(cbg.cpu_used, 1_000_000 - 1_000_000 / ADJUST_RATIO);
        assert_eq!(cbg.cpu_blocked, 1_000_000 / ADJUST_RATIO);
    }

    #[test]
    fn cpu_adjust_leaves_usage_alone_for_short_blocks() {
        let mut cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        cbg.cpu_used = 500;
        cbg.run_count_dec(0);
        cbg.blocked_ts = 0;
        cbg.run_count_inc(ADJUST_THRESHOLD_US - 1);
        assert_eq!(cbg.cpu_used, 500);
        assert_eq!(cbg.cpu_blocked, 0);
    }

    #[test]
    fn fixpri_bucket_group_always_reports_default_interactivity() {
        let mut cbg = SchedClutchBucketGroup::new(QosBucket::FixPri);
        cbg.cpu_used = 1_000_000;
        assert_eq!(cbg.interactivity_score_calculate(1, 5), INTERACTIVE_PRI_DEFAULT);
    }

    #[test]
    fn empty_root_bucket_skips_ageout() {
        let mut cbg = SchedClutchBucketGroup::new(QosBucket::ShareFg);
        let before = cbg.interactivity_score;
        cbg.cpu_used = 999;
        assert_eq!(cbg.interactivity_score_calculate(1, 0), before);
        assert_eq!(cbg.interactivity_score, before);
    }

    #[test]
    fn pri_calculate_returns_nopri_when_bucket_has_no_members() {
        let mut scb = SchedClutchBucket::new(QosBucket::ShareFg);
        assert_eq!(scb.pri_calculate(10), NOPRI);
    }

    #[test]
    fn pri_calculate_adds_interactivity_for_timeshare_buckets() {
        let mut scb = SchedClutchBucket::new(QosBucket::ShareFg);
        scb.clutchpri_prioq.insert(ThreadId(1), 31);
        assert_eq!(scb.pri_calculate(8), 39);
    }

    #[test]
    fn pri_calculate_ignores_interactivity_for_fixpri() {
        let mut scb = SchedClutchBucket::new(QosBucket::FixPri);
        scb.clutchpri_prioq.insert(ThreadId(1), 96);
        assert_eq!(scb.pri_calculate(8), 96);
    }
}
