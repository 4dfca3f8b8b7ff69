// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! Wake-bit group: the single waitable primitive behind each loop context.
//!
//! Multi-producer set, single-consumer timed-wait-with-clear. Producers
//! (user threads, the selector, ISR-analogous contexts) OR bits into an
//! atomic word; the dispatch loop sleeps until any bit of its mask is set
//! or a deadline passes, and atomically claims the bits it observed.
//!
//! # Architecture
//! - Atomic word for lock-free set and claim (hot path)
//! - Condvar fallback for the sleeping dispatcher (idle path)

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Wake bit: the selector pushed new readiness into some I/O watcher.
pub const WAKE_IO: u32 = 1 << 0;

/// Wake bit: a software event was posted.
pub const WAKE_EVENT: u32 = 1 << 1;

/// Wake bit: a timer was rescheduled and deadlines must be recomputed.
pub const WAKE_TIMER: u32 = 1 << 2;

/// All wake bits a dispatch iteration waits on.
pub const WAKE_ALL: u32 = WAKE_IO | WAKE_EVENT | WAKE_TIMER;

/// Multi-producer wake-bit group with timed wait-and-clear.
///
/// The consumer side is single-threaded by contract (one dispatch loop per
/// context); producers may run anywhere, including interrupt-analogous
/// contexts, since [`set`](WakeBits::set) is an atomic OR plus an optional
/// condvar signal.
#[derive(Debug)]
pub struct WakeBits {
    bits: AtomicU32,
    /// Mutex for the condvar; only touched when the consumer sleeps.
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

impl WakeBits {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            sleeping: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Set bits from task context and wake the consumer if it sleeps.
    #[inline]
    pub fn set(&self, mask: u32) {
        self.bits.fetch_or(mask, Ordering::Release);

        // Racy check is safe: worst case is one extra signal.
        if *self.sleeping.lock() {
            self.condvar.notify_one();
        }
    }

    /// ISR-flavored setter.
    ///
    /// Hosted targets have no interrupt context, so this is the task path;
    /// the entry point is kept so call sites read the same as on embedded
    /// ports where the two differ.
    #[inline]
    pub fn set_from_isr(&self, mask: u32) {
        self.set(mask);
    }

    /// Atomically claim and clear the set bits within `mask`.
    #[inline]
    fn take(&self, mask: u32) -> u32 {
        self.bits.fetch_and(!mask, Ordering::AcqRel) & mask
    }

    /// Peek without clearing.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Sleep until any bit in `mask` is set or `timeout` elapses.
    ///
    /// Returns the observed bits, already cleared from the group; 0 means
    /// the wait timed out. `None` waits forever; a zero `timeout` is a
    /// non-blocking poll.
    pub fn wait(&self, mask: u32, timeout: Option<Duration>) -> u32 {
        // Fast path: bits already set, no lock taken.
        let got = self.take(mask);
        if got != 0 {
            return got;
        }

        let deadline = match timeout {
            Some(t) if t.is_zero() => return 0,
            Some(t) => Some(Instant::now() + t),
            None => None,
        };

        let mut sleeping = self.sleeping.lock();
        loop {
            // Re-check under the lock: a producer that set bits before we
            // flipped `sleeping` would otherwise be missed.
            let got = self.take(mask);
            if got != 0 {
                return got;
            }

            *sleeping = true;
            let timed_out = match deadline {
                Some(d) => self.condvar.wait_until(&mut sleeping, d).timed_out(),
                None => {
                    self.condvar.wait(&mut sleeping);
                    false
                }
            };
            *sleeping = false;

            if timed_out {
                return self.take(mask);
            }
        }
    }
}

impl Default for WakeBits {
    fn default() -> Self {
        Self::new()
    }
}
