// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! Loop context and the dispatch loop.
//!
//! One [`Context`] per foreground loop: a running flag, the wake-bit
//! group, and the watcher registry. [`Context::run`] is the dispatch
//! engine: compute the next timer deadline, sleep on the bit group,
//! sweep the registry once and fire callbacks, repeat.

use crate::bits::{WakeBits, WAKE_ALL, WAKE_EVENT, WAKE_IO};
use crate::clock;
use crate::error::Result;
#[cfg(unix)]
use crate::selector;
use crate::watcher::{Events, Watcher, WatcherKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sentinel deadline meaning "no timer armed, wait forever".
const FOREVER_MS: u64 = u64::MAX;

// ============================================================================
// Run flags
// ============================================================================

/// Flags controlling a [`Context::run`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags(u32);

impl RunFlags {
    /// Run until [`Context::exit`] or the registry drains.
    pub const NONE: RunFlags = RunFlags(0);

    /// Return after a single dispatch iteration, whether or not any
    /// callback fired.
    pub const ONCE: RunFlags = RunFlags(1);

    /// Suppress blocking for one iteration; useful when driven from
    /// another loop.
    pub const NONBLOCK: RunFlags = RunFlags(2);

    #[must_use]
    pub const fn contains(&self, other: RunFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for RunFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        RunFlags(self.0 | rhs.0)
    }
}

// ============================================================================
// Context
// ============================================================================

/// A loop context owning a wake-bit group and a watcher registry.
///
/// The registry is an insertion-ordered list; the dispatch sweep iterates
/// a snapshot of it, so watchers started or stopped from inside a callback
/// take effect on the next iteration.
pub struct Context {
    running: AtomicBool,
    bits: WakeBits,
    watchers: Mutex<Vec<Arc<Watcher>>>,
}

impl Context {
    /// Create a loop context. Also initializes the loop clock.
    pub fn new() -> Result<Arc<Context>> {
        clock::init();
        Ok(Arc::new(Context {
            running: AtomicBool::new(false),
            bits: WakeBits::new(),
            watchers: Mutex::new(Vec::new()),
        }))
    }

    /// Whether a dispatch loop is currently driving this context.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set wake bits on this context's bit group.
    #[inline]
    pub(crate) fn wake(&self, mask: u32) {
        self.bits.set(mask);
    }

    /// Link a watcher into the registry. Keeps at most one entry per
    /// watcher identity.
    pub(crate) fn link(&self, w: &Arc<Watcher>) {
        let mut list = self.watchers.lock();
        if !list.iter().any(|x| Arc::ptr_eq(x, w)) {
            list.push(Arc::clone(w));
        }
    }

    /// Remove a watcher from the registry by identity.
    pub(crate) fn unlink(&self, w: &Watcher) {
        self.watchers
            .lock()
            .retain(|x| !std::ptr::eq(Arc::as_ref(x), w));
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    fn snapshot(&self) -> Vec<Arc<Watcher>> {
        self.watchers.lock().clone()
    }

    // ------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------

    /// Drive the dispatch loop.
    ///
    /// Marks the context running, re-arms every active timer (a restart
    /// must not fire deadlines left over from an earlier run), then
    /// iterates: wait on the bit group until the next deadline, sweep the
    /// registry in insertion order, and fire at most one callback per
    /// watcher per iteration. Returns when stopped via [`Context::exit`],
    /// when the registry drains, or after one iteration under
    /// [`RunFlags::ONCE`].
    pub fn run(&self, flags: RunFlags) -> Result<()> {
        let mut next_deadline = if flags.contains(RunFlags::NONBLOCK) {
            0
        } else {
            FOREVER_MS
        };

        self.running.store(true, Ordering::Release);
        log::debug!("[loop] run flags={:#x}", flags.bits());

        // Start all dormant timers.
        let now_ms = clock::now_ms();
        for w in &self.snapshot() {
            if !w.is_active() {
                continue;
            }
            if let WatcherKind::Timer { sched, .. } = &w.kind {
                let mut s = sched.lock();
                // timeout == 0 means "fire as soon as the loop starts".
                s.deadline = now_ms + s.timeout as u64;
                if s.deadline > 0 && s.deadline < next_deadline {
                    next_deadline = s.deadline;
                }
            }
        }

        while self.is_running() && self.watcher_count() > 0 {
            let timeout = if next_deadline == FOREVER_MS {
                None
            } else {
                let now = clock::now_ms();
                if next_deadline == 0 || now > next_deadline {
                    Some(Duration::ZERO)
                } else {
                    // Sleep one tick past the deadline so the strict
                    // `now > deadline` expiry check holds on wake.
                    Some(Duration::from_millis(next_deadline - now + 1))
                }
            };

            let fired = self.bits.wait(WAKE_ALL, timeout);
            next_deadline = FOREVER_MS;

            let sweep = self.snapshot();
            for w in &sweep {
                if !w.is_active() {
                    continue;
                }

                match &w.kind {
                    WatcherKind::Event { .. } => {
                        if fired & WAKE_EVENT == 0 {
                            continue;
                        }
                        if w.take_posted() {
                            (w.cb)(w, Events::READ);
                        }
                    }

                    WatcherKind::Timer { sched, .. } => {
                        let now = clock::now_ms();
                        let mut expired = false;
                        let mut stop_after = false;
                        {
                            let mut s = sched.lock();
                            if now > 0 && s.deadline > 0 && now > s.deadline {
                                expired = true;

                                if s.period == 0 {
                                    s.timeout = 0;
                                }
                                if s.timeout == 0 {
                                    s.deadline = 0;
                                    stop_after = true;
                                } else {
                                    // Advance from now, not from the missed
                                    // deadline: overruns coalesce instead
                                    // of bursting.
                                    s.deadline = now + s.period as u64;
                                }
                            }
                            if s.deadline > 0 && s.deadline < next_deadline {
                                next_deadline = s.deadline;
                            }
                        }
                        if stop_after {
                            w.deactivate();
                        }
                        if expired {
                            (w.cb)(w, Events::READ);
                        }
                    }

                    WatcherKind::Io { pending } => {
                        if fired & WAKE_IO == 0 {
                            continue;
                        }
                        let ev = pending.load(Ordering::Acquire) & Events::MASK.bits();
                        if ev == 0 {
                            continue;
                        }
                        (w.cb)(w, Events::from_bits(ev));
                        // Clear only the delivered bits, then nudge the
                        // selector to re-admit this descriptor to the
                        // readiness build.
                        pending.fetch_and(!ev, Ordering::AcqRel);
                        #[cfg(unix)]
                        selector::wake();
                    }
                }
            }

            if flags.contains(RunFlags::ONCE) {
                break;
            }
        }

        // No dispatcher drives this context past this point; timers
        // rescheduled while idle stay dormant until the next run re-arms
        // them.
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    /// Stop the loop and every watcher on it.
    ///
    /// Walks the registry, deactivates each watcher (withdrawing I/O
    /// watchers from the selector), empties the list, and clears the
    /// running flag. A dispatcher sleeping in [`run`](Context::run) is
    /// woken so it observes the stop. Concurrent `stop` calls on
    /// individual watchers during `exit` are not supported; quiesce first.
    pub fn exit(&self) -> Result<()> {
        let drained = std::mem::take(&mut *self.watchers.lock());
        log::debug!("[loop] exit watchers={}", drained.len());

        for w in &drained {
            if !w.deactivate() {
                continue;
            }
            #[cfg(unix)]
            if matches!(w.kind, WatcherKind::Io { .. }) {
                selector::remove(w);
            }
        }

        self.running.store(false, Ordering::Release);
        self.bits.set(WAKE_EVENT);
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("running", &self.is_running())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
