/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Arena ownership for the whole scheduling world.
//!
//! `ProcessorSet` is the one place that owns `Thread`/`ThreadGroup` storage
//! (as slabs, indexed by the newtype ids in [`crate::ids`]) plus the shared
//! `RtRunQueue` and `ClutchRoot`. Everything else — the façade in
//! `crate::scheduler`, the clutch hierarchy, the timeshare decay functions —
//! borrows from here rather than owning its own copy, which is what lets
//! `Thread`, `ThreadGroup`, `SchedClutch` and `ClutchRoot` reference each
//! other without `Rc`/`RefCell`.

use std::collections::VecDeque;

use tracing::debug;

use crate::clutch::SchedClutch;
use crate::clutch_root::ClutchRoot;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ProcessorId, ThreadGroupId, ThreadId};
use crate::priority_queue::PriorityQueueMax;
use crate::rt_queue::RtRunQueue;
use crate::thread::{SchedMode, Thread, ThreadGroup};

const TRACE_LOG_CAPACITY: usize = 512;

/// A single simulated CPU. Ownership of the running thread lives in
/// `ProcessorSet::threads`; this just records which id (if any) is
/// currently dispatched here.
#[derive(Debug, Clone)]
pub struct Processor {
    pub id: ProcessorId,
    pub current_thread: Option<ThreadId>,
    pub idle: bool,
    /// Threads bound to this specific processor (`Thread::bound_processor`),
    /// kept separate from the clutch hierarchy since bound threads never
    /// compete across processors.
    pub bound_runq: PriorityQueueMax<ThreadId>,
}

impl Processor {
    fn new(id: ProcessorId) -> Self {
        Self {
            id,
            current_thread: None,
            idle: true,
            bound_runq: PriorityQueueMax::new(),
        }
    }
}

/// Owns every thread, thread group and clutch in the simulation, plus the
/// realtime runqueue and clutch root shared across all processors.
#[derive(Debug, Clone)]
pub struct ProcessorSet {
    processors: Vec<Processor>,
    threads: Vec<Thread>,
    thread_groups: Vec<ThreadGroup>,
    clutches: Vec<SchedClutch>,
    pub rt_runq: RtRunQueue,
    pub clutch_root: ClutchRoot,
    pub current_tick: u64,
    trace_log: VecDeque<String>,
}

impl ProcessorSet {
    pub fn new(processor_count: usize) -> Self {
        Self {
            processors: (0..processor_count).map(|i| Processor::new(ProcessorId(i as u32))).collect(),
            threads: Vec::new(),
            thread_groups: Vec::new(),
            clutches: Vec::new(),
            rt_runq: RtRunQueue::new(),
            clutch_root: ClutchRoot::new(),
            current_tick: 0,
            trace_log: VecDeque::with_capacity(TRACE_LOG_CAPACITY),
        }
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    pub fn processor(&self, id: ProcessorId) -> CoreResult<&Processor> {
        self.processors
            .get(id.0 as usize)
            .ok_or(CoreError::UnknownProcessor { processor_id: id })
    }

    pub fn processor_mut(&mut self, id: ProcessorId) -> CoreResult<&mut Processor> {
        self.processors
            .get_mut(id.0 as usize)
            .ok_or(CoreError::UnknownProcessor { processor_id: id })
    }

    /// Registers a new thread group and its (initially empty) `SchedClutch`.
    pub fn add_thread_group(&mut self, name: impl Into<String>) -> ThreadGroupId {
        let id = ThreadGroupId(self.thread_groups.len() as u32);
        self.thread_groups.push(ThreadGroup::new(id, name));
        self.clutches.push(SchedClutch::new(id));
        id
    }

    pub fn add_thread(
        &mut self,
        name: impl Into<String>,
        thread_group: ThreadGroupId,
        sched_mode: SchedMode,
        base_pri: i32,
        max_priority: i32,
    ) -> ThreadId {
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(Thread::new(id, name, thread_group, sched_mode, base_pri, max_priority));
        id
    }

    pub fn thread(&self, tid: ThreadId) -> CoreResult<&Thread> {
        self.threads.get(tid.0 as usize).ok_or(CoreError::UnknownThread { tid })
    }

    pub fn thread_mut(&mut self, tid: ThreadId) -> CoreResult<&mut Thread> {
        self.threads.get_mut(tid.0 as usize).ok_or(CoreError::UnknownThread { tid })
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn thread_group(&self, tg_id: ThreadGroupId) -> &ThreadGroup {
        &self.thread_groups[tg_id.0 as usize]
    }

    pub fn clutch(&self, tg_id: ThreadGroupId) -> &SchedClutch {
        &self.clutches[tg_id.0 as usize]
    }

    pub fn clutch_mut(&mut self, tg_id: ThreadGroupId) -> &mut SchedClutch {
        &mut self.clutches[tg_id.0 as usize]
    }

    pub fn thread_group_ids(&self) -> impl Iterator<Item = ThreadGroupId> {
        (0..self.thread_groups.len() as u32).map(ThreadGroupId)
    }

    /// Appends a line to the ring buffer used by tests to assert on
    /// scheduling behavior without installing a `tracing` subscriber, and
    /// emits the same line at `debug` level.
    pub fn trace(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("{message}");
        if self.trace_log.len() == TRACE_LOG_CAPACITY {
            self.trace_log.pop_front();
        }
        self.trace_log.push_back(message);
    }

    pub fn trace_log(&self) -> &VecDeque<String> {
        &self.trace_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_thread_group_creates_a_matching_empty_clutch() {
        let mut ps = ProcessorSet::new(2);
        let tg = ps.add_thread_group("tg0");
        assert_eq!(ps.clutch(tg).tg_id, tg);
        assert_eq!(ps.clutch(tg).thr_count, 0);
    }

    #[test]
    fn unknown_thread_lookup_returns_core_error() {
        let ps = ProcessorSet::new(1);
        assert_eq!(ps.thread(ThreadId(0)).unwrap_err(), CoreError::UnknownThread { tid: ThreadId(0) });
    }

    #[test]
    fn trace_log_is_capped_at_capacity() {
        let mut ps = ProcessorSet::new(1);
        for i in 0..(TRACE_LOG_CAPACITY + 10) {
            ps.trace(format!("line {i}"));
        }
        assert_eq!(ps.trace_log().len(), TRACE_LOG_CAPACITY);
        assert_eq!(ps.trace_log().front().unwrap(), "line 10");
    }
}
