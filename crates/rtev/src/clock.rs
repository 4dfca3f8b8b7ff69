// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! Monotonic loop clock.
//!
//! All deadline arithmetic in the core is done in whole milliseconds taken
//! from this clock. The zero value is reserved to mean "clock not yet
//! initialized"; after [`init`] the clock starts at 1 ms and is monotonic
//! from there. Safe to call from any thread.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Offset keeping every post-init reading non-zero; 0 is the
/// "uninitialized" sentinel checked by the dispatcher.
const CLOCK_BASE_US: u64 = 1_000;

/// Initialize the clock epoch. Idempotent; called by `Context::new`.
pub fn init() {
    EPOCH.get_or_init(Instant::now);
}

/// Microseconds since the clock was initialized, or 0 before [`init`].
#[inline]
#[must_use]
pub fn now_us() -> u64 {
    match EPOCH.get() {
        Some(epoch) => CLOCK_BASE_US + epoch.elapsed().as_micros() as u64,
        None => 0,
    }
}

/// Milliseconds since the clock was initialized, or 0 before [`init`].
#[inline]
#[must_use]
pub fn now_ms() -> u64 {
    now_us() / 1000
}
