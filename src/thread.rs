/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Thread and ThreadGroup state (component C2).
//!
//! A `Thread` carries every field the Clutch hierarchy and RT queue need to
//! make a selection decision; a `ThreadGroup` owns exactly one `SchedClutch`
//! (see [`crate::clutch`]).

use crate::constants::*;
use crate::ids::{ProcessorId, ThreadGroupId, ThreadId};

/// One of the six QoS lanes a thread's priority maps into.
///
/// `FixPri` is XNU's "Above UI" band: it never ages, never competes in EDF,
/// and always wins ties against the timeshare buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QosBucket {
    FixPri = 0,
    ShareFg = 1,
    ShareIn = 2,
    ShareDf = 3,
    ShareUt = 4,
    ShareBg = 5,
}

pub const QOS_BUCKET_COUNT: usize = 6;

pub const ALL_QOS_BUCKETS: [QosBucket; QOS_BUCKET_COUNT] = [
    QosBucket::FixPri,
    QosBucket::ShareFg,
    QosBucket::ShareIn,
    QosBucket::ShareDf,
    QosBucket::ShareUt,
    QosBucket::ShareBg,
];

impl QosBucket {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Self {
        ALL_QOS_BUCKETS[idx]
    }

    pub fn next(self) -> Option<Self> {
        let idx = self.index() + 1;
        (idx < QOS_BUCKET_COUNT).then(|| Self::from_index(idx))
    }
}

/// A thread's scheduling class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedMode {
    Realtime,
    Fixed,
    Timeshare,
}

/// Lifecycle state. Transitions happen exclusively through the scheduler
/// façade (`Scheduler::thread_*`); nothing else is permitted to mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Waiting,
    Runnable,
    Running,
    Terminated,
}

/// A schedulable unit of work.
#[derive(Debug, Clone)]
pub struct Thread {
    pub tid: ThreadId,
    pub name: String,
    pub thread_group: ThreadGroupId,
    pub sched_mode: SchedMode,

    pub base_pri: i32,
    pub sched_pri: i32,
    pub max_priority: i32,
    pub sched_bucket: QosBucket,

    /// Set only if a higher-than-base priority is in effect (e.g. kernel
    /// promotion); the clutch bucket's `clutchpri_prioq` keys off of
    /// `promoted_pri` when this is set, else `base_pri`.
    pub sched_pri_promoted: bool,
    pub promoted_pri: i32,

    pub cpu_usage: u64,
    pub sched_usage: u64,
    pub cpu_delta: u64,
    pub sched_stamp: u64,
    pub pri_shift: i32,

    pub quantum_remaining: i64,
    pub first_timeslice: bool,

    pub rt_period: u64,
    pub rt_computation: u64,
    pub rt_constraint: u64,
    pub rt_deadline: u64,

    pub state: ThreadState,
    pub last_run_time: u64,
    pub last_made_runnable_time: u64,
    pub computation_epoch: u64,

    pub bound_processor: Option<ProcessorId>,

    pub total_cpu_us: u64,
    pub total_wait_us: u64,
    pub context_switches: u64,
    pub preemption_count: u64,
}

impl Thread {
    pub fn new(
        tid: ThreadId,
        name: impl Into<String>,
        thread_group: ThreadGroupId,
        sched_mode: SchedMode,
        base_pri: i32,
        max_priority: i32,
    ) -> Self {
        let sched_bucket = thread_bucket_map(sched_mode, base_pri);
        Self {
            tid,
            name: name.into(),
            thread_group,
            sched_mode,
            base_pri,
            sched_pri: base_pri,
            max_priority,
            sched_bucket,
            sched_pri_promoted: false,
            promoted_pri: base_pri,
            cpu_usage: 0,
            sched_usage: 0,
            cpu_delta: 0,
            sched_stamp: 0,
            pri_shift: 127,
            quantum_remaining: 0,
            first_timeslice: false,
            rt_period: 0,
            rt_computation: 0,
            rt_constraint: 0,
            rt_deadline: RT_DEADLINE_NONE,
            state: ThreadState::Waiting,
            last_run_time: 0,
            last_made_runnable_time: 0,
            computation_epoch: 0,
            bound_processor: None,
            total_cpu_us: 0,
            total_wait_us: 0,
            context_switches: 0,
            preemption_count: 0,
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self.sched_mode, SchedMode::Realtime)
    }

    pub fn is_timeshare(&self) -> bool {
        matches!(self.sched_mode, SchedMode::Timeshare)
    }

    pub fn is_bound(&self) -> bool {
        self.bound_processor.is_some()
    }

    /// The priority the clutch bucket's `clutchpri_prioq` should key on.
    pub fn clutch_priority(&self) -> i32 {
        if self.sched_pri_promoted {
            self.promoted_pri
        } else {
            self.base_pri
        }
    }

    fn initial_quantum(&self) -> i64 {
        if self.is_realtime() && self.rt_computation > 0 {
            self.rt_computation as i64
        } else {
            THREAD_QUANTUM_US[self.sched_bucket.index()] as i64
        }
    }

    pub fn reset_quantum(&mut self) {
        self.quantum_remaining = self.initial_quantum();
    }
}

/// A monotonic id group that owns exactly one `SchedClutch`.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    pub tg_id: ThreadGroupId,
    pub name: String,
}

impl ThreadGroup {
    pub fn new(tg_id: ThreadGroupId, name: impl Into<String>) -> Self {
        Self {
            tg_id,
            name: name.into(),
        }
    }
}

/// `pri > USER_INITIATED -> FG; > DEFAULT -> IN; > UTILITY -> DF;
/// > MAXPRI_THROTTLE -> UT; else BG`.
fn convert_pri_to_bucket(pri: i32) -> QosBucket {
    if pri > BASEPRI_USER_INITIATED {
        QosBucket::ShareFg
    } else if pri > BASEPRI_DEFAULT {
        QosBucket::ShareIn
    } else if pri > BASEPRI_UTILITY {
        QosBucket::ShareDf
    } else if pri > MAXPRI_THROTTLE {
        QosBucket::ShareUt
    } else {
        QosBucket::ShareBg
    }
}

/// `REALTIME` threads always land in `FIXPRI`; `FIXED` lands in `FIXPRI`
/// only at or above `BASEPRI_FOREGROUND`, else falls through to the
/// pri-to-bucket map like `TIMESHARE` always does.
pub fn thread_bucket_map(sched_mode: SchedMode, base_pri: i32) -> QosBucket {
    match sched_mode {
        SchedMode::Realtime => QosBucket::FixPri,
        SchedMode::Fixed if base_pri >= BASEPRI_FOREGROUND => QosBucket::FixPri,
        SchedMode::Fixed | SchedMode::Timeshare => convert_pri_to_bucket(base_pri),
    }
}
