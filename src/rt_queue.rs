/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The realtime runqueue (component C4): one ordered-by-deadline band per RT
//! priority level above `BASEPRI_RTQUEUES`, independent of the Clutch
//! hierarchy entirely — RT threads never enter a `SchedClutchBucket`.
//!
//! Plain earliest-deadline-first covers the common case, but pure EDF can
//! let a thread with a tight `rt_constraint` slip past its constraint while
//! a looser, earlier-deadline thread in a lower-priority band runs first.
//! `choose_for_dequeue` applies XNU's safety net: the highest-priority
//! band's head normally wins outright, but if the queue-wide
//! earliest-deadline thread sits in a different (lower) band, it is let
//! through instead whenever running the high-priority thread first
//! wouldn't leave enough slack before its own constraint expires.

use std::collections::HashMap;

use crate::constants::{BASEPRI_RTQUEUES, NRTQS, RT_DEADLINE_NONE};
use crate::ids::ThreadId;

const DEFAULT_DEADLINE_EPSILON_US: u64 = 100;

#[derive(Debug, Clone, Copy)]
struct RtEntry {
    tid: ThreadId,
    deadline: u64,
    rt_computation: u64,
    rt_constraint: u64,
}

/// Per-processor-set realtime runqueue, banded by `sched_pri - BASEPRI_RTQUEUES`.
#[derive(Debug, Clone)]
pub struct RtRunQueue {
    bands: Vec<Vec<RtEntry>>,
    band_of: HashMap<ThreadId, usize>,
    count: usize,
    /// Cached queue-wide earliest deadline and the band it lives in,
    /// refreshed explicitly rather than recomputed on every peek.
    earliest_deadline: u64,
    ed_band: Option<usize>,
    /// When set, disables the constraint-safe override: the highest
    /// priority band always wins `choose_for_dequeue`.
    pub strict_priority: bool,
    pub deadline_epsilon: u64,
}

impl RtRunQueue {
    pub fn new() -> Self {
        Self {
            bands: (0..NRTQS as usize).map(|_| Vec::new()).collect(),
            band_of: HashMap::new(),
            count: 0,
            earliest_deadline: RT_DEADLINE_NONE,
            ed_band: None,
            strict_priority: false,
            deadline_epsilon: DEFAULT_DEADLINE_EPSILON_US,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    fn to_band(sched_pri: i32) -> usize {
        (sched_pri - BASEPRI_RTQUEUES).max(0) as usize
    }

    /// Inserts `tid` into its priority band, ordered by `deadline`. Returns
    /// `true` iff it becomes the head of that band, the signal callers use
    /// as a preemption hint.
    pub fn enqueue(&mut self, tid: ThreadId, sched_pri: i32, deadline: u64, rt_computation: u64, rt_constraint: u64) -> bool {
        let band = Self::to_band(sched_pri);
        let entry = RtEntry { tid, deadline, rt_computation, rt_constraint };
        let q = &mut self.bands[band];
        let pos = q.iter().position(|e| deadline < e.deadline).unwrap_or(q.len());
        q.insert(pos, entry);
        self.band_of.insert(tid, band);
        self.count += 1;
        self.refresh_global_ed();
        pos == 0
    }

    pub fn remove(&mut self, tid: ThreadId) {
        let Some(band) = self.band_of.remove(&tid) else { return };
        let q = &mut self.bands[band];
        if let Some(pos) = q.iter().position(|e| e.tid == tid) {
            q.remove(pos);
            self.count -= 1;
        }
        self.refresh_global_ed();
    }

    /// Recomputes the cached queue-wide earliest deadline, scanning bands
    /// top-down (highest priority first) so a tie favors the higher band.
    pub fn refresh_global_ed(&mut self) {
        let mut earliest = RT_DEADLINE_NONE;
        let mut ed_band = None;
        for (idx, q) in self.bands.iter().enumerate().rev() {
            if let Some(head) = q.first() {
                if head.deadline < earliest {
                    earliest = head.deadline;
                    ed_band = Some(idx);
                }
            }
        }
        self.earliest_deadline = earliest;
        self.ed_band = ed_band;
    }

    fn highest_pri_band(&self) -> Option<usize> {
        self.bands.iter().enumerate().rev().find(|(_, q)| !q.is_empty()).map(|(idx, _)| idx)
    }

    /// `-1` if empty, else the raw `sched_pri` of the highest-priority
    /// band's head.
    pub fn highest_priority(&self) -> i32 {
        match self.highest_pri_band() {
            Some(band) => BASEPRI_RTQUEUES + band as i32,
            None => -1,
        }
    }

    /// The head of the highest-priority band, ignoring the constraint-safe
    /// override. Used by the prev-thread-continuation check, which compares
    /// against the *other* candidate's raw numbers rather than whichever
    /// the override would actually dequeue.
    fn highest_pri_head(&self) -> Option<&RtEntry> {
        self.highest_pri_band().map(|band| &self.bands[band][0])
    }

    pub fn highest_pri_thread(&self) -> Option<ThreadId> {
        self.highest_pri_head().map(|e| e.tid)
    }

    pub fn highest_pri_deadline(&self) -> Option<u64> {
        self.highest_pri_head().map(|e| e.deadline)
    }

    /// `rt_computation` and `rt_constraint` of the highest-priority band's
    /// head, for the constraint-safe continuation test.
    pub fn highest_pri_computation_constraint(&self) -> Option<(u64, u64)> {
        self.highest_pri_head().map(|e| (e.rt_computation, e.rt_constraint))
    }

    pub fn peek_deadline(&self) -> Option<u64> {
        (self.earliest_deadline != RT_DEADLINE_NONE).then_some(self.earliest_deadline)
    }

    /// `_choose_index_for_dequeue`: the highest-priority band wins, unless
    /// `!strict_priority` and the queue-wide earliest-deadline thread (in a
    /// different, lower band) is tight enough on its own constraint that
    /// running the high-priority thread first wouldn't leave room for it.
    fn choose_band_for_dequeue(&self) -> Option<usize> {
        let hi_band = self.highest_pri_band()?;
        let mut chosen = hi_band;
        if !self.strict_priority {
            if let Some(ed_band) = self.ed_band {
                if ed_band != hi_band {
                    let ed = &self.bands[ed_band][0];
                    let hi = &self.bands[hi_band][0];
                    if ed.rt_computation + hi.rt_computation + self.deadline_epsilon < hi.rt_constraint {
                        chosen = ed_band;
                    }
                }
            }
        }
        Some(chosen)
    }

    /// Constraint-safe EDF selection, without dequeueing.
    pub fn choose_for_dequeue(&self) -> Option<ThreadId> {
        let band = self.choose_band_for_dequeue()?;
        self.bands[band].first().map(|e| e.tid)
    }

    /// Pops the result of [`Self::choose_for_dequeue`] off the queue.
    pub fn dequeue(&mut self) -> Option<ThreadId> {
        let band = self.choose_band_for_dequeue()?;
        let entry = self.bands[band].remove(0);
        self.band_of.remove(&entry.tid);
        self.count -= 1;
        self.refresh_global_ed();
        Some(entry.tid)
    }
}

impl Default for RtRunQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BASEPRI_REALTIME;

    #[test]
    fn plain_edf_picks_earliest_deadline_within_same_band() {
        let mut rq = RtRunQueue::new();
        rq.enqueue(ThreadId(1), BASEPRI_REALTIME, 500, 100, 1000);
        rq.enqueue(ThreadId(2), BASEPRI_REALTIME, 300, 100, 1000);
        rq.enqueue(ThreadId(3), BASEPRI_REALTIME, 700, 100, 1000);
        assert_eq!(rq.choose_for_dequeue(), Some(ThreadId(2)));
    }

    #[test]
    fn higher_band_wins_outright_when_override_test_fails() {
        let mut rq = RtRunQueue::new();
        // Lower band (pri 99), earlier deadline, but loose constraint.
        rq.enqueue(ThreadId(1), 99, 1000, 200, 10_000);
        // Higher band (pri 100), later deadline, tight constraint.
        rq.enqueue(ThreadId(2), 100, 5000, 300, 600);
        // 200 + 300 + 100 = 600, not < 600, so the high band keeps it.
        assert_eq!(rq.choose_for_dequeue(), Some(ThreadId(2)));
    }

    #[test]
    fn constraint_safe_override_lets_lower_band_through() {
        let mut rq = RtRunQueue::new();
        // S-4: lo(pri=99, deadline=1000, computation=200, constraint=2000)
        rq.enqueue(ThreadId(1), 99, 1000, 200, 2000);
        // hi(pri=100, deadline=5000, computation=300, constraint=3000)
        rq.enqueue(ThreadId(2), 100, 5000, 300, 3000);
        // 200 + 300 + 100 = 600 < 3000, so lo wins.
        assert_eq!(rq.choose_for_dequeue(), Some(ThreadId(1)));
    }

    #[test]
    fn tight_hi_constraint_keeps_hi_band_despite_earlier_lo_deadline() {
        let mut rq = RtRunQueue::new();
        rq.enqueue(ThreadId(1), 99, 1000, 200, 2000);
        // hi now has a tight constraint of its own.
        rq.enqueue(ThreadId(2), 100, 5000, 1200, 1300);
        // 200 + 1200 + 100 = 1500, not < 1300, so hi wins.
        assert_eq!(rq.choose_for_dequeue(), Some(ThreadId(2)));
    }

    #[test]
    fn strict_priority_disables_the_override() {
        let mut rq = RtRunQueue::new();
        rq.enqueue(ThreadId(1), 99, 1000, 200, 2000);
        rq.enqueue(ThreadId(2), 100, 5000, 300, 3000);
        rq.strict_priority = true;
        assert_eq!(rq.choose_for_dequeue(), Some(ThreadId(2)));
    }

    #[test]
    fn enqueue_reports_whether_it_became_band_head() {
        let mut rq = RtRunQueue::new();
        assert!(rq.enqueue(ThreadId(1), 99, 1000, 0, 0));
        assert!(!rq.enqueue(ThreadId(2), 99, 2000, 0, 0));
        assert!(rq.enqueue(ThreadId(3), 99, 500, 0, 0));
    }

    #[test]
    fn dequeue_removes_the_chosen_thread_and_refreshes_global_ed() {
        let mut rq = RtRunQueue::new();
        rq.enqueue(ThreadId(1), 99, 100, 0, 10_000);
        rq.enqueue(ThreadId(1 + 1), 99, 200, 0, 10_000);
        assert_eq!(rq.dequeue(), Some(ThreadId(1)));
        assert_eq!(rq.peek_deadline(), Some(200));
        assert_eq!(rq.len(), 1);
    }

    #[test]
    fn empty_queue_reports_no_deadline_and_no_priority() {
        let rq = RtRunQueue::new();
        assert_eq!(rq.peek_deadline(), None);
        assert_eq!(rq.highest_priority(), -1);
        assert!(rq.is_empty());
    }

    #[test]
    fn remove_of_unknown_thread_is_a_no_op() {
        let mut rq = RtRunQueue::new();
        rq.enqueue(ThreadId(1), 99, 100, 0, 10_000);
        rq.remove(ThreadId(99));
        assert_eq!(rq.len(), 1);
    }

    #[test]
    fn remove_drops_band_mapping_so_reinsertion_works() {
        let mut rq = RtRunQueue::new();
        rq.enqueue(ThreadId(1), 99, 100, 0, 10_000);
        rq.remove(ThreadId(1));
        assert!(rq.is_empty());
        rq.enqueue(ThreadId(1), 110, 50, 0, 10_000);
        assert_eq!(rq.highest_priority(), 110);
    }
}
