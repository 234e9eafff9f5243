/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Constants faithfully ported from XNU's `sched.h` / `sched_clutch.c` /
//! `sched_prim.c`. Every value here is load-bearing: property I-10 in
//! particular depends on `SCHED_DECAY_SHIFTS` matching bit-for-bit.

use crate::thread::QosBucket;

// ── Priority levels (sched.h:79-177) ─────────────────────────────────────────

pub const NRQS_MAX: i32 = 128;
pub const MAXPRI: i32 = NRQS_MAX - 1; // 127
pub const MINPRI: i32 = 0;
pub const IDLEPRI: i32 = MINPRI;
pub const NOPRI: i32 = -1;

pub const RT_DEADLINE_NONE: u64 = u64::MAX;
pub const RT_DEADLINE_QUANTUM_EXPIRED: u64 = u64::MAX - 1;

pub const BASEPRI_REALTIME: i32 = MAXPRI - (NRQS_MAX / 4) + 1; // 96
pub const BASEPRI_RTQUEUES: i32 = BASEPRI_REALTIME + 1; // 97

pub const MAXPRI_KERNEL: i32 = BASEPRI_REALTIME - 1; // 95
pub const BASEPRI_PREEMPT: i32 = MAXPRI_KERNEL - 3; // 92
pub const BASEPRI_PREEMPT_HIGH: i32 = BASEPRI_PREEMPT + 1; // 93
pub const BASEPRI_VM: i32 = BASEPRI_PREEMPT - 1; // 91

pub const BASEPRI_KERNEL: i32 = MAXPRI_KERNEL - (NRQS_MAX / 8) + 2; // 81
pub const MINPRI_KERNEL: i32 = MAXPRI_KERNEL - (NRQS_MAX / 8) + 1; // 80

pub const MAXPRI_RESERVED: i32 = MINPRI_KERNEL - 1; // 79
pub const MINPRI_RESERVED: i32 = MAXPRI_RESERVED - (NRQS_MAX / 8) + 1; // 64

pub const MAXPRI_USER: i32 = MINPRI_RESERVED - 1; // 63
pub const BASEPRI_DEFAULT: i32 = MAXPRI_USER - (NRQS_MAX / 4); // 31
pub const BASEPRI_CONTROL: i32 = BASEPRI_DEFAULT + 17; // 48
pub const BASEPRI_FOREGROUND: i32 = BASEPRI_DEFAULT + 16; // 47
pub const BASEPRI_BACKGROUND: i32 = BASEPRI_DEFAULT + 15; // 46
pub const BASEPRI_USER_INITIATED: i32 = BASEPRI_DEFAULT + 6; // 37
pub const MAXPRI_SUPPRESSED: i32 = BASEPRI_DEFAULT - 3; // 28
pub const BASEPRI_UTILITY: i32 = BASEPRI_DEFAULT - 11; // 20
pub const MAXPRI_THROTTLE: i32 = MINPRI + 4; // 4
pub const MINPRI_USER: i32 = MINPRI; // 0

pub const NRQS: i32 = BASEPRI_REALTIME; // 96
pub const NRTQS: i32 = MAXPRI - BASEPRI_REALTIME; // 31

pub const MAXPRI_PROMOTE: i32 = MAXPRI_KERNEL; // 95

// ── sched_mode (sched.h:184-189) ─────────────────────────────────────────────

pub const TH_MODE_REALTIME: i32 = 1;
pub const TH_MODE_FIXED: i32 = 2;
pub const TH_MODE_TIMESHARE: i32 = 3;

// ── Invalid-time sentinels (sched_clutch.c) ──────────────────────────────────

pub const SCHED_CLUTCH_INVALID_TIME_32: u64 = 0xFFFF_FFFF;
pub const SCHED_CLUTCH_INVALID_TIME_64: u64 = u64::MAX;

// ── Per-bucket tables, indexed by QosBucket as usize (sched_clutch.c:199-258) ─

pub const ROOT_BUCKET_WCEL_US: [u64; 6] = [
    SCHED_CLUTCH_INVALID_TIME_32, // FIXPRI, unused
    0,
    37_500,
    75_000,
    150_000,
    250_000,
];

pub const SCHED_CLUTCH_ROOT_BUCKET_WARP_UNUSED: u64 = SCHED_CLUTCH_INVALID_TIME_64;

pub const ROOT_BUCKET_WARP_US: [u64; 6] = [
    SCHED_CLUTCH_INVALID_TIME_32,
    8_000,
    4_000,
    2_000,
    1_000,
    0,
];

pub const THREAD_QUANTUM_US: [u64; 6] = [10_000, 10_000, 8_000, 6_000, 4_000, 2_000];

pub const SCHED_CLUTCH_BUCKET_GROUP_PENDING_DELTA_US: [u64; 6] = [
    SCHED_CLUTCH_INVALID_TIME_32,
    10_000,
    37_500,
    75_000,
    150_000,
    250_000,
];

// ── Interactivity scoring (sched_clutch.c:1319-1334) ─────────────────────────

pub const INTERACTIVE_PRI_DEFAULT: i32 = 8;
pub const ADJUST_THRESHOLD_US: u64 = 500_000;
pub const ADJUST_RATIO: u64 = 10;
pub const INITIAL_INTERACTIVITY: i32 = INTERACTIVE_PRI_DEFAULT * 2;

pub const BUCKET_GROUP_BLOCKED_TS_INVALID: u64 = SCHED_CLUTCH_INVALID_TIME_64;
pub const BUCKET_GROUP_PENDING_INVALID: u64 = SCHED_CLUTCH_INVALID_TIME_64;

// ── Timeshare decay (sched.h:385-389, sched_prim.c:400-718) ──────────────────

pub const SCHED_PRI_SHIFT_MAX: i32 = (8 * 4) - 1; // 31
pub const MAX_LOAD: i32 = NRQS - 1; // 95
pub const SCHED_FIXED_SHIFT: i32 = 31;
pub const SCHED_DECAY_TICKS: u32 = 32;

/// `sched_decay_shifts[]` (priority.c): index 0 is identity, index n applies
/// n ticks of `(5/8)^n` decay via the `(v>>s1) +/- (v>>|s2|)` approximation.
pub const SCHED_DECAY_SHIFTS: [(i32, i32); 32] = [
    (1, 1),
    (1, 3),
    (1, -3),
    (2, -7),
    (3, 5),
    (3, -5),
    (4, -8),
    (5, 7),
    (5, -7),
    (6, -10),
    (7, 10),
    (7, -9),
    (8, -11),
    (9, 12),
    (9, -11),
    (10, -13),
    (11, 14),
    (11, -13),
    (12, -15),
    (13, 17),
    (13, -15),
    (14, -17),
    (15, 19),
    (16, 18),
    (16, -19),
    (17, 22),
    (18, 20),
    (18, -20),
    (19, 26),
    (20, 22),
    (20, -22),
    (21, -27),
];

/// Reproduces XNU's `load_shift_init()` (sched_prim.c:676-718) for
/// `sched_decay_penalty == 1`: bit-length-grouped load buckets.
fn compute_load_shifts(nrqs: usize, decay_penalty: u32) -> Vec<i8> {
    let mut shifts = vec![0i8; nrqs];
    shifts[0] = -128;
    shifts[1] = 0;
    let mut idx = 2usize;
    let mut j = 1usize << decay_penalty;
    let mut k = 1i8;
    while idx < nrqs {
        j <<= 1;
        while idx < j && idx < nrqs {
            shifts[idx] = k;
            idx += 1;
        }
        k += 1;
    }
    shifts
}

/// `sched_load_shifts[]`, computed once and cached; indexed by `load`
/// (already clamped to `[0, NRQS-1]` by callers).
pub fn sched_load_shifts() -> &'static [i8] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<Vec<i8>> = OnceLock::new();
    TABLE.get_or_init(|| compute_load_shifts(NRQS as usize, 1))
}

pub const SCHED_TICK_INTERVAL_US: u64 = 125_000;

// ── Enqueue options (sched_prim.h sched_options_t) ───────────────────────────

pub const SCHED_TAILQ: u32 = 0x1;
pub const SCHED_HEADQ: u32 = 0x2;
pub const SCHED_PREEMPT: u32 = 0x4;

pub const SCHED_CLUTCH_BUCKET_OPTIONS_NONE: u32 = 0x0;
pub const SCHED_CLUTCH_BUCKET_OPTIONS_SAMEPRI_RR: u32 = 0x1;
pub const SCHED_CLUTCH_BUCKET_OPTIONS_HEADQ: u32 = 0x2;
pub const SCHED_CLUTCH_BUCKET_OPTIONS_TAILQ: u32 = 0x4;

/// `sched_clutch_bucket_is_above_timeshare()`: true only for the fixed
/// priority "Above UI" bucket, which never participates in EDF/warp.
pub fn is_above_timeshare(bucket: QosBucket) -> bool {
    bucket == QosBucket::FixPri
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_band_constants_match_xnu() {
        assert_eq!(BASEPRI_REALTIME, 96);
        assert_eq!(BASEPRI_RTQUEUES, 97);
        assert_eq!(MAXPRI_KERNEL, 95);
        assert_eq!(BASEPRI_PREEMPT, 92);
        assert_eq!(BASEPRI_PREEMPT_HIGH, 93);
        assert_eq!(BASEPRI_VM, 91);
        assert_eq!(BASEPRI_KERNEL, 81);
        assert_eq!(MINPRI_KERNEL, 80);
        assert_eq!(MAXPRI_RESERVED, 79);
        assert_eq!(MINPRI_RESERVED, 64);
        assert_eq!(MAXPRI_USER, 63);
        assert_eq!(BASEPRI_DEFAULT, 31);
        assert_eq!(BASEPRI_CONTROL, 48);
        assert_eq!(BASEPRI_FOREGROUND, 47);
        assert_eq!(BASEPRI_BACKGROUND, 46);
        assert_eq!(BASEPRI_USER_INITIATED, 37);
        assert_eq!(MAXPRI_SUPPRESSED, 28);
        assert_eq!(BASEPRI_UTILITY, 20);
        assert_eq!(MAXPRI_THROTTLE, 4);
        assert_eq!(NRQS, 96);
        assert_eq!(NRTQS, 31);
        assert_eq!(MAXPRI_PROMOTE, 95);
    }

    #[test]
    fn load_shifts_are_bit_length_grouped() {
        let shifts = sched_load_shifts();
        assert_eq!(shifts[0], -128);
        assert_eq!(shifts[1], 0);
        assert_eq!(shifts[2], 1);
        assert_eq!(shifts[3], 1);
        assert_eq!(shifts[4], 2);
        assert_eq!(shifts[7], 2);
        assert_eq!(shifts[8], 3);
        assert_eq!(shifts[15], 3);
        assert_eq!(shifts[16], 4);
        assert_eq!(shifts[31], 4);
        assert_eq!(shifts[32], 5);
        assert_eq!(shifts[63], 5);
        assert_eq!(shifts[64], 6);
        assert_eq!(shifts[95], 6);
    }

    #[test]
    fn decay_shift_table_first_and_last_entries() {
        assert_eq!(SCHED_DECAY_SHIFTS[0], (1, 1));
        assert_eq!(SCHED_DECAY_SHIFTS[31], (21, -27));
        assert_eq!(SCHED_DECAY_SHIFTS.len(), 32);
    }

    #[test]
    fn above_timeshare_is_fixpri_only() {
        assert!(is_above_timeshare(QosBucket::FixPri));
        assert!(!is_above_timeshare(QosBucket::ShareFg));
        assert!(!is_above_timeshare(QosBucket::ShareBg));
    }
}
