/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured errors for the scheduling core.
//!
//! Invariant violations (e.g. "dispatched thread wasn't actually runnable")
//! are programmer errors, not recoverable conditions, and are asserted with
//! `debug_assert!` at the call site rather than modeled as a variant here.
//! `CoreError` covers the boundary cases a caller can legitimately hit: an
//! unknown id, or an operation attempted from the wrong lifecycle state.
//!
//! Do not replace this with `anyhow::Error` inside the library — callers
//! (tests, the demo binary) match on these variants.

use thiserror::Error;

use crate::ids::{ProcessorId, ThreadId};

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CoreError {
    #[error("unknown thread {tid}")]
    UnknownThread { tid: ThreadId },

    #[error("unknown processor {processor_id}")]
    UnknownProcessor { processor_id: ProcessorId },

    #[error("illegal state transition: {detail}")]
    IllegalTransition { detail: &'static str },
}

pub type CoreResult<T> = Result<T, CoreError>;
