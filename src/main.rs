/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Demo driver: replays a small hardcoded workload through the scheduling
//! core and prints the resulting trace log. Not part of the library API —
//! this binary exists to give the core something to run under, the way a
//! handful of threads on a handful of CPUs would in a real trace.

use anyhow::{Context, Result};
use clap::Parser;
use clutch_sched::ids::ProcessorId;
use clutch_sched::scheduler::Scheduler;
use clutch_sched::thread::SchedMode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a scripted Clutch scheduling scenario")]
struct Cli {
    /// Number of simulated processors.
    #[arg(long, default_value_t = 2)]
    processors: usize,

    /// Number of sched_tick intervals to simulate.
    #[arg(long, default_value_t = 8)]
    ticks: u64,

    /// Emit trace/debug logs at debug level instead of info.
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut sched = Scheduler::new(cli.processors);
    let interactive_tg = sched.add_thread_group("interactive");
    let batch_tg = sched.add_thread_group("batch");

    let ui_thread = sched.add_thread("ui", interactive_tg, SchedMode::Timeshare, 47, 63);
    let worker_thread = sched.add_thread("worker", batch_tg, SchedMode::Timeshare, 20, 63);
    let audio_thread = sched.add_thread("audio", interactive_tg, SchedMode::Realtime, 97, 97);
    sched
        .ps
        .thread_mut(audio_thread)
        .context("audio thread should exist, just created")?
        .rt_constraint = 2_000;

    let mut now = 0u64;
    sched.thread_setrun(ui_thread, clutch_sched::constants::SCHED_TAILQ, now)?;
    sched.thread_setrun(worker_thread, clutch_sched::constants::SCHED_TAILQ, now)?;

    for processor in 0..cli.processors as u32 {
        if let Some((tid, _chose_prev)) = sched.thread_select(ProcessorId(processor), now, None)? {
            sched.thread_dispatch(ProcessorId(processor), tid, now)?;
        }
    }

    for tick in 0..cli.ticks {
        now += clutch_sched::constants::SCHED_TICK_INTERVAL_US;

        if tick == 2 {
            sched.thread_setrun(audio_thread, clutch_sched::constants::SCHED_TAILQ, now)?;
            sched.check_preemption(ProcessorId(0), now)?;
        }

        sched.sched_tick(now)?;
        for processor in 0..cli.processors as u32 {
            sched.check_preemption(ProcessorId(processor), now)?;
        }
    }

    println!("-- trace log --");
    for line in sched.ps.trace_log() {
        println!("{line}");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    fmt().with_env_filter(filter).with_target(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_threads_end_up_dispatched_or_runnable_not_stuck_waiting() {
        let mut sched = Scheduler::new(1);
        let tg = sched.add_thread_group("tg");
        let tid = sched.add_thread("t", tg, SchedMode::Timeshare, 31, 63);
        sched.thread_setrun(tid, clutch_sched::constants::SCHED_TAILQ, 0).unwrap();
        let selected = sched.thread_select(ProcessorId(0), 0, None).unwrap().map(|(t, _)| t);
        assert_eq!(selected, Some(tid));
    }
}
