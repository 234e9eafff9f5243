/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Stable integer identifiers for the arena-owned entities.
//!
//! Per the "Cyclic graphs" design note: `Thread`, `ThreadGroup`,
//! `SchedClutch`, `SchedClutchBucket` and `ClutchRoot` form a reference
//! cycle. Rather than model that with `Rc`/`RefCell`, every cross-reference
//! is one of these newtype indices into a slab owned by `ProcessorSet`.

/// Index into `ProcessorSet::threads`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

/// Index into `ProcessorSet::thread_groups`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadGroupId(pub u32);

/// Index into `ProcessorSet::processors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorId(pub u32);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl std::fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CPU{}", self.0)
    }
}
