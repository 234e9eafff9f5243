/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! A deterministic simulation of XNU's Clutch scheduler: a three-level
//! hierarchy (thread -> clutch bucket -> root bucket) combining earliest-deadline-first
//! across QoS classes with a warp starvation guard and interactivity-scored
//! timeshare decay.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── error          – CoreError, the boundary error type
//! ├── constants       – ported XNU priority/decay tables
//! ├── ids             – stable arena-index newtypes
//! ├── priority_queue  – the four queue primitives the hierarchy is built from
//! ├── thread          – Thread, ThreadGroup, QoS bucket mapping
//! ├── clutch          – SchedClutch / SchedClutchBucketGroup / SchedClutchBucket
//! ├── rt_queue        – the realtime EDF runqueue
//! ├── clutch_root     – the six root buckets and cross-QoS selection
//! ├── timeshare       – priority decay and CPU usage accounting
//! ├── processor       – ProcessorSet, the slab arena everything else borrows from
//! └── scheduler       – the façade: thread_setrun/select/dispatch/block/wakeup/...
//! ```

pub mod clutch;
pub mod clutch_root;
pub mod constants;
pub mod error;
pub mod ids;
pub mod priority_queue;
pub mod processor;
pub mod rt_queue;
pub mod scheduler;
pub mod thread;
pub mod timeshare;

pub use error::{CoreError, CoreResult};
pub use scheduler::Scheduler;
