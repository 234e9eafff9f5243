/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The scheduler façade (component C7): the only public entry points into
//! the simulation. Everything in `crate::clutch`, `crate::clutch_root`,
//! `crate::rt_queue` and `crate::timeshare` is an implementation detail
//! reached exclusively through these operations.
//!
//! ## Design decisions vs a from-scratch port
//!
//! - Selection (`thread_select`) dequeues nothing, but it is not read-only
//!   either: picking a root bucket can fix its deadline, spend its warp
//!   window, or flip its starvation-avoidance flag, the same way XNU's
//!   `sched_clutch_thread_highest` mutates root-bucket bookkeeping as a side
//!   effect of choosing. Actual dequeueing still happens only in
//!   `thread_dispatch`/`thread_remove`.
//! - A thread that is currently `Running` is never linked into any
//!   runqueue (clutch hierarchy, RT bands, or bound queue) — `thread_select`
//!   takes the outgoing thread as an explicit `prev_tid` and lets it
//!   participate in comparisons as a phantom candidate instead.
//! - Preemption re-enqueues the outgoing thread with the `SCHED_PREEMPT`
//!   option rather than a dedicated "preempted" state, so it rejoins its
//!   runqueue ahead of same-priority peers via the stable queue's
//!   preempted-first ordering (see `crate::priority_queue::StablePriorityQueue`).
//! - `sched_tick` is the only place timeshare decay, interactivity scoring
//!   and pri-shift recompute happen globally; `thread_setrun` additionally
//!   does a targeted catch-up for a single thread that may have been
//!   blocked across several ticks, so its priority isn't stale the instant
//!   it becomes runnable again.

use tracing::debug;

use crate::clutch::SchedClutchBucketGroup;
use crate::clutch_root::{pri_greater_tiebreak, PrevBucketContext};
use crate::constants::*;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ProcessorId, ThreadGroupId, ThreadId};
use crate::processor::ProcessorSet;
use crate::thread::{SchedMode, ThreadState};
use crate::timeshare;

/// Owns the whole simulated world and exposes the kernel-style entry
/// points a discrete-event driver calls into.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pub ps: ProcessorSet,
}

impl Scheduler {
    pub fn new(processor_count: usize) -> Self {
        Self {
            ps: ProcessorSet::new(processor_count),
        }
    }

    pub fn add_thread_group(&mut self, name: impl Into<String>) -> ThreadGroupId {
        self.ps.add_thread_group(name)
    }

    pub fn add_thread(
        &mut self,
        name: impl Into<String>,
        thread_group: ThreadGroupId,
        sched_mode: SchedMode,
        base_pri: i32,
        max_priority: i32,
    ) -> ThreadId {
        self.ps.add_thread(name, thread_group, sched_mode, base_pri, max_priority)
    }

    // ── thread_setrun ────────────────────────────────────────────────────

    /// Makes a `Waiting` or newly-created thread `Runnable` and links it
    /// into whichever runqueue its scheduling class dictates.
    pub fn thread_setrun(&mut self, tid: ThreadId, options: u32, now: u64) -> CoreResult<()> {
        let thread = self.ps.thread(tid)?;
        if thread.is_bound() {
            self.bound_thread_setrun(tid)?;
        } else if thread.is_realtime() {
            self.rt_thread_setrun(tid, now)?;
        } else {
            self.clutch_thread_setrun(tid, options, now)?;
        }
        self.ps.thread_mut(tid)?.state = ThreadState::Runnable;
        Ok(())
    }

    fn rt_thread_setrun(&mut self, tid: ThreadId, now: u64) -> CoreResult<()> {
        let thread = self.ps.thread_mut(tid)?;
        if thread.rt_deadline == RT_DEADLINE_NONE || thread.rt_deadline == RT_DEADLINE_QUANTUM_EXPIRED {
            thread.rt_deadline = now.saturating_add(thread.rt_constraint.max(1));
        }
        let (deadline, constraint, sched_pri, computation) =
            (thread.rt_deadline, thread.rt_constraint.max(1), thread.sched_pri, thread.rt_computation);
        self.ps.rt_runq.enqueue(tid, sched_pri, deadline, computation, constraint);
        self.ps.trace(format!("rt_setrun {tid} deadline={deadline}"));
        Ok(())
    }

    fn bound_thread_setrun(&mut self, tid: ThreadId) -> CoreResult<()> {
        let thread = self.ps.thread(tid)?;
        let processor_id = thread.bound_processor.expect("is_bound() checked by caller");
        let pri = thread.sched_pri;
        self.ps.processor_mut(processor_id)?.bound_runq.update_priority(tid, pri);
        Ok(())
    }

    fn clutch_thread_setrun(&mut self, tid: ThreadId, options: u32, now: u64) -> CoreResult<()> {
        self.timeshare_catchup(tid, now)?;
        let thread = self.ps.thread(tid)?;
        let tg = thread.thread_group;
        let bucket = thread.sched_bucket;
        let sched_pri = thread.sched_pri;
        let clutch_pri = thread.clutch_priority();
        let preempted = options & SCHED_PREEMPT != 0;

        let cbg = self.ps.clutch_mut(tg).bucket_group_mut(bucket);
        cbg.clutch_bucket.thread_runq.update_priority(tid, sched_pri, preempted, now);
        cbg.clutch_bucket.clutchpri_prioq.update_priority(tid, clutch_pri);
        cbg.thr_count_inc();
        let was_empty = cbg.run_count == 0;
        cbg.run_count_inc(now);
        let interactivity = cbg.interactivity_score;
        let root_pri = cbg.clutch_bucket.pri_calculate(interactivity);

        if was_empty {
            self.ps.clutch_root.clutch_bucket_hierarchy_insert(bucket, tg, root_pri, now);
        } else {
            self.ps.clutch_root.clutch_bucket_update(bucket, tg, root_pri);
        }
        self.ps.trace(format!("clutch_setrun {tid} bucket={bucket:?} pri={root_pri}"));
        Ok(())
    }

    /// Ages a single thread's decay counters across whatever ticks elapsed
    /// since it last ran, then recomputes `sched_pri`. Called from
    /// `thread_setrun` so a long-blocked thread's priority isn't stale the
    /// moment it becomes runnable again; global decay for already-runnable
    /// threads happens in `sched_tick`.
    fn timeshare_catchup(&mut self, tid: ThreadId, now: u64) -> CoreResult<()> {
        let thread = self.ps.thread(tid)?;
        if thread.is_bound() || is_above_timeshare(thread.sched_bucket) {
            return Ok(());
        }
        let tg = thread.thread_group;
        let bucket = thread.sched_bucket;
        let elapsed_ticks = (now.saturating_sub(thread.sched_stamp) / SCHED_TICK_INTERVAL_US) as u32;

        let cbg = self.ps.clutch(tg).bucket_group(bucket);
        let pri_shift = cbg.pri_shift;
        let cbg_snapshot = cbg.clone();

        let thread = self.ps.thread_mut(tid)?;
        if elapsed_ticks > 0 {
            timeshare::age_thread_cpu_usage(thread, elapsed_ticks);
        }
        thread.pri_shift = pri_shift;
        thread.sched_pri = timeshare::compute_sched_pri(thread, &cbg_snapshot);
        thread.sched_stamp = now;
        Ok(())
    }

    // ── thread_remove ────────────────────────────────────────────────────

    /// Unlinks a thread from whichever runqueue currently holds it, without
    /// changing its lifecycle state. Used by dispatch and termination.
    pub fn thread_remove(&mut self, tid: ThreadId, now: u64) -> CoreResult<()> {
        let thread = self.ps.thread(tid)?;
        if thread.is_bound() {
            let processor_id = thread.bound_processor.unwrap();
            self.ps.processor_mut(processor_id)?.bound_runq.remove(tid);
        } else if thread.is_realtime() {
            self.ps.rt_runq.remove(tid);
        } else {
            let tg = thread.thread_group;
            let bucket = thread.sched_bucket;
            let cbg = self.ps.clutch_mut(tg).bucket_group_mut(bucket);
            cbg.clutch_bucket.thread_runq.remove(tid);
            cbg.clutch_bucket.clutchpri_prioq.remove(tid);
            cbg.thr_count_dec();
            cbg.run_count_dec(now);
            if cbg.clutch_bucket.is_empty() {
                self.ps.clutch_root.clutch_bucket_hierarchy_remove(bucket, tg, now);
            }
        }
        Ok(())
    }

    // ── thread_select / thread_dispatch ─────────────────────────────────

    /// `_thread_select`: which thread should run next on `processor_id`,
    /// given `prev_tid` (the outgoing thread, already removed from any
    /// runqueue, or `None` if the processor was idle). Returns the winner
    /// together with whether it's `prev_tid` kept without being
    /// re-dequeued anywhere. Dequeues nothing itself — but choosing a root
    /// bucket can still mutate its deadline/warp/starvation bookkeeping,
    /// since that bookkeeping is part of *how* the choice is made.
    pub fn thread_select(
        &mut self,
        processor_id: ProcessorId,
        now: u64,
        prev_tid: Option<ThreadId>,
    ) -> CoreResult<Option<(ThreadId, bool)>> {
        self.ps.processor(processor_id)?;

        if let Some(result) = self.rt_select(prev_tid)? {
            return Ok(Some(result));
        }

        let (clutch_pri, bound_pri, bound_top) = self.raw_priorities(processor_id, prev_tid)?;
        let clutch_wins = match (clutch_pri, bound_pri) {
            (Some(c), Some(b)) => c > b,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if clutch_wins {
            if let Some(result) = self.hierarchy_thread_highest(now, prev_tid)? {
                return Ok(Some(result));
            }
        } else if let Some(bound_tid) = bound_top {
            let prev_is_bound_top = prev_tid == Some(bound_tid);
            if !prev_is_bound_top {
                if let Some(tid) = prev_tid {
                    let thread = self.ps.thread(tid)?;
                    if thread.is_bound() && bound_pri.map(|b| thread.sched_pri >= b).unwrap_or(false) {
                        return Ok(Some((tid, true)));
                    }
                }
            }
            return Ok(Some((bound_tid, prev_is_bound_top)));
        } else if let Some(tid) = prev_tid {
            if self.ps.thread(tid)?.is_bound() {
                return Ok(Some((tid, true)));
            }
        }

        if let Some(tid) = prev_tid {
            return Ok(Some((tid, true)));
        }
        Ok(None)
    }

    /// Raw (non-interactivity-adjusted) priority available on each side of
    /// the clutch-vs-bound comparison, with `prev_tid` folded into whichever
    /// side it belongs to since it isn't linked into any queue while running.
    fn raw_priorities(
        &self,
        processor_id: ProcessorId,
        prev_tid: Option<ThreadId>,
    ) -> CoreResult<(Option<i32>, Option<i32>, Option<ThreadId>)> {
        let clutch_pri = self.clutch_raw_priority();
        let bound_top = self.ps.processor(processor_id)?.bound_runq.peek_max();
        let mut bound_pri = match bound_top {
            Some(tid) => Some(self.ps.thread(tid)?.sched_pri),
            None => None,
        };
        if let Some(tid) = prev_tid {
            let thread = self.ps.thread(tid)?;
            if thread.is_bound() {
                bound_pri = Some(bound_pri.map_or(thread.sched_pri, |p| p.max(thread.sched_pri)));
            }
        }
        Ok((clutch_pri, bound_pri, bound_top))
    }

    /// I-8's raw root priority: the highest `clutch_priority()` among the
    /// winning root bucket's top clutch bucket's members, read straight off
    /// `clutchpri_prioq` rather than the interactivity-adjusted composite
    /// stored on `ClutchRootBucket`.
    fn clutch_raw_priority(&self) -> Option<i32> {
        let (bucket, tg) = self.ps.clutch_root.root_priority_bucket()?;
        Some(self.ps.clutch(tg).bucket_group(bucket).clutch_bucket.clutchpri_prioq.max_priority())
    }

    /// Realtime selection, steps 1-2 of `_thread_select`: let a still-viable
    /// running RT thread keep the CPU, else hand back the RT queue's own
    /// constraint-safe EDF pick.
    fn rt_select(&self, prev_tid: Option<ThreadId>) -> CoreResult<Option<(ThreadId, bool)>> {
        let prev_is_rt = match prev_tid {
            Some(tid) => self.ps.thread(tid)?.is_realtime(),
            None => false,
        };
        if prev_is_rt && self.rt_prev_thread_can_continue(prev_tid.unwrap())? {
            return Ok(Some((prev_tid.unwrap(), true)));
        }
        if let Some(tid) = self.ps.rt_runq.choose_for_dequeue() {
            return Ok(Some((tid, Some(tid) == prev_tid)));
        }
        Ok(None)
    }

    /// `_rt_prev_thread_can_continue`, conditions (a)-(d): the queue being
    /// empty, or `prev` strictly outranking it, both let `prev` continue
    /// outright; if a higher band is queued, `prev` may still continue when
    /// the constraint-safe override would let it run anyway; at equal
    /// priority, `prev` continues unless the queued deadline is tighter by
    /// more than the epsilon tolerance.
    fn rt_prev_thread_can_continue(&self, tid: ThreadId) -> CoreResult<bool> {
        let thread = self.ps.thread(tid)?;
        if self.ps.rt_runq.is_empty() {
            return Ok(true); // (a)
        }
        let hi_pri = self.ps.rt_runq.highest_priority();
        if thread.sched_pri > hi_pri {
            return Ok(true); // (b)
        }
        if thread.sched_pri < hi_pri {
            if self.ps.rt_runq.strict_priority {
                return Ok(false);
            }
            let Some((hi_computation, hi_constraint)) = self.ps.rt_runq.highest_pri_computation_constraint() else {
                return Ok(false);
            };
            let epsilon = self.ps.rt_runq.deadline_epsilon;
            return Ok(thread.rt_computation + hi_computation + epsilon < hi_constraint); // (c)
        }
        let Some(hi_deadline) = self.ps.rt_runq.highest_pri_deadline() else {
            return Ok(true);
        };
        Ok(hi_deadline.saturating_add(self.ps.rt_runq.deadline_epsilon) >= thread.rt_deadline) // (d)
    }

    /// Builds the outgoing thread's Phase-A candidacy: its own
    /// `clutch_priority()` plus interactivity bonus (none for `FixPri`),
    /// computed without it being linked into any clutch bucket.
    fn prev_bucket_context(&self, prev_tid: Option<ThreadId>) -> CoreResult<Option<PrevBucketContext>> {
        let Some(tid) = prev_tid else { return Ok(None) };
        let thread = self.ps.thread(tid)?;
        if thread.is_bound() || thread.is_realtime() {
            return Ok(None);
        }
        let bucket = thread.sched_bucket;
        let clutch_pri = thread.clutch_priority();
        let effective_pri = if is_above_timeshare(bucket) {
            clutch_pri
        } else {
            let interactivity = self.ps.clutch(thread.thread_group).bucket_group(bucket).interactivity_score;
            (clutch_pri + interactivity).min(MAXPRI)
        };
        Ok(Some(PrevBucketContext { bucket, effective_pri }))
    }

    /// The three-level combinator behind the clutch side of `_thread_select`:
    /// root bucket, then clutch bucket within it, then thread within that —
    /// each level lets the outgoing thread short-circuit to `(prev_tid, true)`
    /// if it's the one that actually wins.
    fn hierarchy_thread_highest(&mut self, now: u64, prev_tid: Option<ThreadId>) -> CoreResult<Option<(ThreadId, bool)>> {
        let prev_ctx = self.prev_bucket_context(prev_tid)?;
        let (bucket, _) = self.ps.clutch_root.highest_root_bucket(now, prev_ctx);
        let Some(bucket) = bucket else { return Ok(None) };

        let prev_tg_pri = match (prev_tid, prev_ctx) {
            (Some(tid), Some(ctx)) if ctx.bucket == bucket => {
                let thread = self.ps.thread(tid)?;
                Some((thread.thread_group, ctx.effective_pri))
            }
            _ => None,
        };
        let first_timeslice = match prev_tid {
            Some(tid) => self.ps.thread(tid)?.first_timeslice,
            None => false,
        };

        let (tg, chose_prev_cb) = self.ps.clutch_root.root_bucket_highest_clutch_bucket(bucket, prev_tg_pri, first_timeslice);
        let Some(tg) = tg else { return Ok(None) };
        if chose_prev_cb {
            if let Some(tid) = prev_tid {
                return Ok(Some((tid, true)));
            }
        }

        let top = self.ps.clutch(tg).bucket_group(bucket).clutch_bucket.thread_runq.peek_max();
        if let Some(tid) = prev_tid {
            let thread = self.ps.thread(tid)?;
            if thread.thread_group == tg && thread.sched_bucket == bucket {
                let prev_wins = match top {
                    Some(top_tid) if top_tid != tid => {
                        let top_pri = self.ps.thread(top_tid)?.sched_pri;
                        pri_greater_tiebreak(thread.sched_pri, top_pri, first_timeslice)
                    }
                    _ => true,
                };
                if prev_wins {
                    return Ok(Some((tid, true)));
                }
            }
        }
        Ok(top.map(|tid| (tid, Some(tid) == prev_tid)))
    }

    /// Dequeues `tid` from its runqueue and dispatches it onto `processor_id`.
    pub fn thread_dispatch(&mut self, processor_id: ProcessorId, tid: ThreadId, now: u64) -> CoreResult<()> {
        self.thread_remove(tid, now)?;

        let thread = self.ps.thread_mut(tid)?;
        debug_assert!(
            matches!(thread.state, ThreadState::Runnable),
            "thread_dispatch on a thread that wasn't runnable"
        );
        thread.state = ThreadState::Running;
        thread.last_run_time = now;
        thread.first_timeslice = true;
        thread.reset_quantum();
        // `sched_pri` was already brought current by timeshare_catchup at
        // setrun time; dispatch only records it, never recomputes it.
        let starting_pri = thread.sched_pri;

        let proc = self.ps.processor_mut(processor_id)?;
        proc.current_thread = Some(tid);
        proc.idle = false;

        self.ps.trace(format!("dispatch {tid} on {processor_id} pri={starting_pri}"));
        Ok(())
    }

    /// Keeps `tid` running on `processor_id` without touching any runqueue:
    /// the path `thread_select`'s `chose_prev` signals, since `tid` was
    /// never re-enqueued in the first place.
    fn install_on_processor(&mut self, processor_id: ProcessorId, tid: ThreadId, now: u64) -> CoreResult<()> {
        let thread = self.ps.thread_mut(tid)?;
        thread.state = ThreadState::Running;
        thread.last_run_time = now;
        let proc = self.ps.processor_mut(processor_id)?;
        proc.current_thread = Some(tid);
        proc.idle = false;
        self.ps.trace(format!("continue {tid} on {processor_id}"));
        Ok(())
    }

    // ── thread_block / thread_wakeup ─────────────────────────────────────

    /// Voluntary block: the processor's current thread stops running.
    pub fn thread_block(&mut self, processor_id: ProcessorId, now: u64) -> CoreResult<Option<ThreadId>> {
        let Some(tid) = self.ps.processor(processor_id)?.current_thread else {
            return Ok(None);
        };
        self.account_cpu_time(tid, now)?;

        let thread = self.ps.thread_mut(tid)?;
        thread.state = ThreadState::Waiting;
        thread.context_switches += 1;

        let proc = self.ps.processor_mut(processor_id)?;
        proc.current_thread = None;
        proc.idle = true;

        self.ps.trace(format!("block {tid} on {processor_id}"));
        Ok(Some(tid))
    }

    /// A `Waiting` thread becomes runnable again.
    pub fn thread_wakeup(&mut self, tid: ThreadId, now: u64) -> CoreResult<()> {
        let thread = self.ps.thread(tid)?;
        if thread.state != ThreadState::Waiting {
            return Err(CoreError::IllegalTransition {
                detail: "thread_wakeup called on a thread that wasn't Waiting",
            });
        }
        self.ps.thread_mut(tid)?.last_made_runnable_time = now;
        self.thread_setrun(tid, SCHED_TAILQ, now)?;
        self.ps.trace(format!("wakeup {tid}"));
        Ok(())
    }

    // ── thread_quantum_expire ────────────────────────────────────────────

    /// The running thread's quantum ran out: account its CPU time, then ask
    /// `thread_select` to decide between letting it continue, switching to
    /// a different thread, or (only if selection found nothing at all)
    /// falling back to letting it keep running anyway. The outgoing thread
    /// is deliberately NOT re-enqueued before selection — it only rejoins
    /// its runqueue if something else actually wins.
    pub fn thread_quantum_expire(&mut self, processor_id: ProcessorId, now: u64) -> CoreResult<Option<ThreadId>> {
        let Some(tid) = self.ps.processor(processor_id)?.current_thread else {
            return Ok(None);
        };
        self.account_cpu_time(tid, now)?;

        {
            let thread = self.ps.thread_mut(tid)?;
            thread.state = ThreadState::Runnable;
            thread.first_timeslice = false;
            thread.quantum_remaining = 0;
        }
        self.ps.processor_mut(processor_id)?.current_thread = None;

        let result = match self.thread_select(processor_id, now, Some(tid))? {
            Some((winner, true)) => {
                self.install_on_processor(processor_id, winner, now)?;
                Some(winner)
            }
            Some((winner, false)) => {
                if self.ps.thread(tid)?.is_realtime() {
                    self.ps.thread_mut(tid)?.rt_deadline = RT_DEADLINE_QUANTUM_EXPIRED;
                }
                self.thread_setrun(tid, SCHED_TAILQ, now)?;
                self.thread_dispatch(processor_id, winner, now)?;
                Some(winner)
            }
            None => {
                self.install_on_processor(processor_id, tid, now)?;
                Some(tid)
            }
        };
        self.ps.trace(format!("quantum_expire on {processor_id} -> {result:?}"));
        Ok(result)
    }

    fn account_cpu_time(&mut self, tid: ThreadId, now: u64) -> CoreResult<()> {
        let thread = self.ps.thread(tid)?;
        let elapsed = now.saturating_sub(thread.last_run_time);
        let bound = thread.is_bound();
        let tg = thread.thread_group;
        let bucket = thread.sched_bucket;

        if bound {
            let thread = self.ps.thread_mut(tid)?;
            thread.cpu_usage += elapsed;
            thread.total_cpu_us += elapsed;
            thread.quantum_remaining -= elapsed as i64;
        } else {
            let mut cbg_copy: SchedClutchBucketGroup = self.ps.clutch(tg).bucket_group(bucket).clone();
            let thread = self.ps.thread_mut(tid)?;
            timeshare::update_thread_cpu_usage(thread, elapsed, &mut cbg_copy);
            thread.total_cpu_us += elapsed;
            thread.quantum_remaining -= elapsed as i64;
            *self.ps.clutch_mut(tg).bucket_group_mut(bucket) = cbg_copy;
        }
        Ok(())
    }

    // ── sched_tick ───────────────────────────────────────────────────────

    /// Global periodic maintenance: ages every thread's decay counters by
    /// one tick, recomputes each clutch bucket group's interactivity score
    /// and pri-shift, rolls that up into bucket priorities, and refreshes
    /// the RT runqueue's cached earliest deadline.
    pub fn sched_tick(&mut self, now: u64) -> CoreResult<()> {
        let processor_count = self.ps.processor_count().max(1) as i64;
        let tg_ids: Vec<ThreadGroupId> = self.ps.thread_group_ids().collect();

        for &tg in &tg_ids {
            for bucket in crate::thread::ALL_QOS_BUCKETS {
                let global_load = self.ps.clutch_root.bucket(bucket).runnable_count;
                let cbg = self.ps.clutch_mut(tg).bucket_group_mut(bucket);
                if cbg.clutch_bucket.is_empty() {
                    continue;
                }
                cbg.pri_shift_update(processor_count);
                let interactivity = cbg.interactivity_score_calculate(now, global_load);
                let new_pri = cbg.clutch_bucket.pri_calculate(interactivity);
                let pri_shift = cbg.pri_shift;
                self.ps.clutch_root.clutch_bucket_update(bucket, tg, new_pri);

                let member_tids: Vec<ThreadId> =
                    self.ps.clutch(tg).bucket_group(bucket).clutch_bucket.clutchpri_prioq.iter_by_priority().collect();
                for tid in member_tids {
                    let thread = self.ps.thread_mut(tid)?;
                    thread.pri_shift = pri_shift;
                    timeshare::age_thread_cpu_usage(thread, 1);
                    thread.sched_stamp = now;
                }
            }
        }

        // Recompute sched_pri and runqueue ordering now that usage has aged.
        for &tg in &tg_ids {
            for bucket in crate::thread::ALL_QOS_BUCKETS {
                let cbg_snapshot = self.ps.clutch(tg).bucket_group(bucket).clone();
                if cbg_snapshot.clutch_bucket.is_empty() {
                    continue;
                }
                let member_tids: Vec<ThreadId> = cbg_snapshot.clutch_bucket.clutchpri_prioq.iter_by_priority().collect();
                for &tid in &member_tids {
                    let thread = self.ps.thread_mut(tid)?;
                    thread.sched_pri = timeshare::compute_sched_pri(thread, &cbg_snapshot);
                }
                let mut new_pris = Vec::with_capacity(member_tids.len());
                for tid in &member_tids {
                    new_pris.push((*tid, self.ps.thread(*tid)?.sched_pri));
                }
                let cbg = self.ps.clutch_mut(tg).bucket_group_mut(bucket);
                cbg.clutch_bucket
                    .thread_runq
                    .refresh_priorities(|tid| new_pris.iter().find(|(t, _)| *t == tid).map(|(_, p)| *p).unwrap_or(0));
            }
        }

        self.ps.rt_runq.refresh_global_ed();
        self.ps.current_tick += 1;
        debug!(tick = self.ps.current_tick, "sched_tick");
        Ok(())
    }

    // ── preemption arbiter ───────────────────────────────────────────────

    /// `_check_preemption`: if a better candidate than the processor's
    /// current thread is available, requeues the current thread (marked
    /// preempted, so it jumps the queue on its return) and dispatches the
    /// candidate. Returns whether a preemption happened.
    pub fn check_preemption(&mut self, processor_id: ProcessorId, now: u64) -> CoreResult<bool> {
        let current = self.ps.processor(processor_id)?.current_thread;
        let Some((candidate, chose_prev)) = self.thread_select(processor_id, now, current)? else {
            return Ok(false);
        };

        let should_preempt = !chose_prev && current != Some(candidate);
        if !should_preempt {
            return Ok(false);
        }

        if let Some(cur) = current {
            self.account_cpu_time(cur, now)?;
            let thread = self.ps.thread_mut(cur)?;
            thread.state = ThreadState::Waiting;
            thread.preemption_count += 1;
            self.ps.processor_mut(processor_id)?.current_thread = None;
            self.thread_setrun(cur, SCHED_PREEMPT, now)?;
        }
        self.thread_dispatch(processor_id, candidate, now)?;
        self.ps.trace(format!("preempt on {processor_id} -> {candidate}"));
        Ok(true)
    }

    /// Urgency bookkeeping: a runnable candidate at or above
    /// `BASEPRI_FOREGROUND` (or any RT thread) raises urgency; logged for
    /// diagnostics, not otherwise load-bearing in this simulation.
    pub fn urgency_inc(&mut self, tid: ThreadId) -> CoreResult<()> {
        let thread = self.ps.thread(tid)?;
        let urgent = thread.is_realtime() || thread.sched_pri >= BASEPRI_FOREGROUND;
        self.ps.trace(format!("urgency_inc {tid} urgent={urgent}"));
        Ok(())
    }

    pub fn urgency_dec(&mut self, tid: ThreadId) -> CoreResult<()> {
        self.ps.trace(format!("urgency_dec {tid}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SCHED_TAILQ;

    fn new_scheduler(cpus: usize) -> Scheduler {
        Scheduler::new(cpus)
    }

    #[test]
    fn single_timeshare_thread_gets_dispatched() {
        let mut sched = new_scheduler(1);
        let tg = sched.add_thread_group("tg0");
        let tid = sched.add_thread("t0", tg, SchedMode::Timeshare, 31, 63);
        sched.thread_setrun(tid, SCHED_TAILQ, 0).unwrap();
        let (next, chose_prev) = sched.thread_select(ProcessorId(0), 0, None).unwrap().unwrap();
        assert_eq!(next, tid);
        assert!(!chose_prev);
        sched.thread_dispatch(ProcessorId(0), tid, 0).unwrap();
        assert_eq!(sched.ps.processor(ProcessorId(0)).unwrap().current_thread, Some(tid));
        assert_eq!(sched.ps.thread(tid).unwrap().state, ThreadState::Running);
    }

    #[test]
    fn higher_priority_thread_preempts_lower_priority_running_thread() {
        let mut sched = new_scheduler(1);
        let tg = sched.add_thread_group("tg0");
        let low = sched.add_thread("low", tg, SchedMode::Timeshare, 20, 63);
        let high = sched.add_thread("high", tg, SchedMode::Timeshare, 50, 63);

        sched.thread_setrun(low, SCHED_TAILQ, 0).unwrap();
        let (first, _) = sched.thread_select(ProcessorId(0), 0, None).unwrap().unwrap();
        sched.thread_dispatch(ProcessorId(0), first, 0).unwrap();
        assert_eq!(first, low);

        sched.thread_setrun(high, SCHED_TAILQ, 10).unwrap();
        let preempted = sched.check_preemption(ProcessorId(0), 10).unwrap();
        assert!(preempted);
        assert_eq!(sched.ps.processor(ProcessorId(0)).unwrap().current_thread, Some(high));
        assert_eq!(sched.ps.thread(low).unwrap().state, ThreadState::Runnable);
    }

    #[test]
    fn realtime_thread_always_outranks_timeshare() {
        let mut sched = new_scheduler(1);
        let tg = sched.add_thread_group("tg0");
        let ts = sched.add_thread("ts", tg, SchedMode::Timeshare, 50, 63);
        let rt = sched.add_thread("rt", tg, SchedMode::Realtime, 97, 97);
        sched.ps.thread_mut(rt).unwrap().rt_constraint = 1_000;

        sched.thread_setrun(ts, SCHED_TAILQ, 0).unwrap();
        sched.thread_setrun(rt, SCHED_TAILQ, 0).unwrap();
        let (next, _) = sched.thread_select(ProcessorId(0), 0, None).unwrap().unwrap();
        assert_eq!(next, rt);
    }

    #[test]
    fn bound_thread_does_not_starve_a_higher_priority_clutch_thread() {
        let mut sched = new_scheduler(1);
        let tg = sched.add_thread_group("tg0");
        let clutch_hi = sched.add_thread("hi", tg, SchedMode::Timeshare, 60, 63);
        let bound = sched.add_thread("bound", tg, SchedMode::Timeshare, 5, 63);
        sched.ps.thread_mut(bound).unwrap().bound_processor = Some(ProcessorId(0));

        sched.thread_setrun(clutch_hi, SCHED_TAILQ, 0).unwrap();
        sched.thread_setrun(bound, SCHED_TAILQ, 0).unwrap();

        let (next, _) = sched.thread_select(ProcessorId(0), 0, None).unwrap().unwrap();
        assert_eq!(next, clutch_hi);
    }

    #[test]
    fn blocked_thread_can_be_woken_and_rescheduled() {
        let mut sched = new_scheduler(1);
        let tg = sched.add_thread_group("tg0");
        let tid = sched.add_thread("t0", tg, SchedMode::Timeshare, 31, 63);
        sched.thread_setrun(tid, SCHED_TAILQ, 0).unwrap();
        let (first, _) = sched.thread_select(ProcessorId(0), 0, None).unwrap().unwrap();
        sched.thread_dispatch(ProcessorId(0), first, 0).unwrap();
        sched.thread_block(ProcessorId(0), 100).unwrap();
        assert_eq!(sched.ps.thread(tid).unwrap().state, ThreadState::Waiting);

        sched.thread_wakeup(tid, 150).unwrap();
        assert_eq!(sched.ps.thread(tid).unwrap().state, ThreadState::Runnable);
        assert_eq!(sched.thread_select(ProcessorId(0), 150, None).unwrap().map(|(t, _)| t), Some(tid));
    }

    #[test]
    fn quantum_expire_requeues_and_reselects() {
        let mut sched = new_scheduler(1);
        let tg = sched.add_thread_group("tg0");
        let a = sched.add_thread("a", tg, SchedMode::Timeshare, 31, 63);
        let b = sched.add_thread("b", tg, SchedMode::Timeshare, 31, 63);
        sched.thread_setrun(a, SCHED_TAILQ, 0).unwrap();
        sched.thread_setrun(b, SCHED_TAILQ, 0).unwrap();

        let (first, _) = sched.thread_select(ProcessorId(0), 0, None).unwrap().unwrap();
        sched.thread_dispatch(ProcessorId(0), first, 0).unwrap();
        let next = sched.thread_quantum_expire(ProcessorId(0), 10_000).unwrap();
        assert_ne!(next, Some(first));
    }

    #[test]
    fn quantum_expire_keeps_same_thread_running_when_nothing_else_is_runnable() {
        let mut sched = new_scheduler(1);
        let tg = sched.add_thread_group("tg0");
        let a = sched.add_thread("a", tg, SchedMode::Timeshare, 31, 63);
        sched.thread_setrun(a, SCHED_TAILQ, 0).unwrap();
        let (first, _) = sched.thread_select(ProcessorId(0), 0, None).unwrap().unwrap();
        sched.thread_dispatch(ProcessorId(0), first, 0).unwrap();

        let next = sched.thread_quantum_expire(ProcessorId(0), 10_000).unwrap();
        assert_eq!(next, Some(a));
        assert_eq!(sched.ps.thread(a).unwrap().state, ThreadState::Running);
        assert_eq!(sched.ps.processor(ProcessorId(0)).unwrap().current_thread, Some(a));
    }

    #[test]
    fn sched_tick_ages_cpu_usage_without_panicking_on_empty_world() {
        let mut sched = new_scheduler(2);
        sched.sched_tick(0).unwrap();
        sched.sched_tick(SCHED_TICK_INTERVAL_US).unwrap();
    }
}
