// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! Watchers: registered interests in descriptor readiness, timer expiry,
//! or software events.
//!
//! A watcher is a common header (context handle, callback, active flag,
//! descriptor, interest mask) plus a variant payload. I/O watchers carry an
//! atomic pending-events word written by the selector; timers carry their
//! schedule behind a per-watcher lock; event watchers carry an atomic
//! posted flag. Registry linkage rules differ per variant and are spelled
//! out on each constructor.

use crate::bits::{WAKE_EVENT, WAKE_TIMER};
use crate::clock;
use crate::context::Context;
use crate::error::{Error, Result};
#[cfg(unix)]
use crate::selector;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

// ============================================================================
// Event mask
// ============================================================================

/// Readiness/event bits delivered to callbacks and used as I/O interest.
///
/// Timer and event callbacks always receive [`Events::READ`]. Callbacks
/// must handle [`Events::ERROR`] themselves (e.g. restart the watcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Events(u32);

impl Events {
    /// No events.
    pub const NONE: Events = Events(0);

    /// Error condition on the descriptor.
    pub const ERROR: Events = Events(1);

    /// Readable / fired.
    pub const READ: Events = Events(2);

    /// Writable.
    pub const WRITE: Events = Events(4);

    /// Hang-up. Compatibility bit for callers' mask arithmetic; never
    /// produced by the selector.
    pub const HUP: Events = Events(8);

    /// Bits the dispatcher will ever deliver.
    pub(crate) const MASK: Events = Events(1 | 2 | 4);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Events(bits)
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(&self, other: Events) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for Events {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Events(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Events {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Events(self.0 & rhs.0)
    }
}

// ============================================================================
// Variant payloads
// ============================================================================

/// Timer schedule, in whole milliseconds.
///
/// `deadline` is the absolute loop-clock time of the next expiry and is
/// zero exactly when the timer is dormant (unset, disarmed, or a one-shot
/// that has fired).
pub(crate) struct TimerSched {
    pub(crate) timeout: i64,
    pub(crate) period: i64,
    pub(crate) deadline: u64,
}

pub(crate) enum WatcherKind {
    Io {
        /// Readiness bits accumulated by the selector, cleared by the
        /// dispatcher after delivery.
        pending: AtomicU32,
    },
    Timer {
        /// Threadsafe timers stay linked to their context across `stop`
        /// and may be rescheduled from any thread.
        threadsafe: bool,
        sched: Mutex<TimerSched>,
    },
    Event {
        posted: AtomicBool,
    },
}

/// Watcher callback. The C-style opaque argument is the closure
/// environment; `events` is the delivered subset of
/// `ERROR | READ | WRITE`.
pub type Callback = Box<dyn Fn(&Arc<Watcher>, Events) + Send + Sync>;

// ============================================================================
// Watcher
// ============================================================================

/// A registered interest in one of {descriptor readiness, timer expiry,
/// software event} plus the callback to invoke.
///
/// Watchers are shared handles: the owning [`Context`] keeps one reference
/// in its registry while the watcher is linked, and user code keeps its
/// own. All state is interiorly mutable, so the same handle can be stopped
/// or rescheduled from any thread the variant allows.
pub struct Watcher {
    ctx: Weak<Context>,
    pub(crate) kind: WatcherKind,
    pub(crate) cb: Callback,
    active: AtomicBool,
    fd: AtomicI32,
    interest: AtomicU32,
}

impl Watcher {
    fn create(
        ctx: &Arc<Context>,
        kind: WatcherKind,
        cb: Callback,
        fd: i32,
        interest: Events,
    ) -> Arc<Watcher> {
        Arc::new(Watcher {
            ctx: Arc::downgrade(ctx),
            kind,
            cb,
            active: AtomicBool::new(false),
            fd: AtomicI32::new(fd),
            interest: AtomicU32::new(interest.bits()),
        })
    }

    /// Create an I/O watcher for `fd` with the given interest mask.
    ///
    /// The watcher is not started; call [`start`](Watcher::start) to arm
    /// it. A negative `fd` is accepted here and rejected by `start`, so a
    /// descriptor can be bound later via [`set_io`](Watcher::set_io).
    pub fn io<F>(ctx: &Arc<Context>, fd: i32, interest: Events, cb: F) -> Result<Arc<Watcher>>
    where
        F: Fn(&Arc<Watcher>, Events) + Send + Sync + 'static,
    {
        Ok(Self::create(
            ctx,
            WatcherKind::Io {
                pending: AtomicU32::new(0),
            },
            Box::new(cb),
            fd,
            interest,
        ))
    }

    /// Create and arm a timer watcher.
    ///
    /// One-shot timers set `period_ms` to zero and use only `timeout_ms`.
    /// Periodic timers usually set `timeout_ms` to zero (fire as soon as
    /// the loop starts) or to the period. The timer activates immediately,
    /// but its deadline stays zero until the loop runs; `Context::run`
    /// re-arms every active timer on entry.
    pub fn timer<F>(
        ctx: &Arc<Context>,
        timeout_ms: i64,
        period_ms: i64,
        cb: F,
    ) -> Result<Arc<Watcher>>
    where
        F: Fn(&Arc<Watcher>, Events) + Send + Sync + 'static,
    {
        Self::timer_impl(ctx, timeout_ms, period_ms, false, Box::new(cb))
    }

    /// Create and arm a threadsafe timer watcher.
    ///
    /// Same schedule semantics as [`timer`](Watcher::timer), but the
    /// schedule may be mutated from any thread via
    /// [`set_timer`](Watcher::set_timer), and the watcher stays linked to
    /// its context across `stop` (only `Context::exit` unlinks it).
    /// Processing is slightly slower: the dispatcher takes the watcher
    /// lock across every schedule update.
    pub fn timer_threadsafe<F>(
        ctx: &Arc<Context>,
        timeout_ms: i64,
        period_ms: i64,
        cb: F,
    ) -> Result<Arc<Watcher>>
    where
        F: Fn(&Arc<Watcher>, Events) + Send + Sync + 'static,
    {
        Self::timer_impl(ctx, timeout_ms, period_ms, true, Box::new(cb))
    }

    fn timer_impl(
        ctx: &Arc<Context>,
        timeout_ms: i64,
        period_ms: i64,
        threadsafe: bool,
        cb: Callback,
    ) -> Result<Arc<Watcher>> {
        if timeout_ms < 0 || period_ms < 0 {
            return Err(Error::OutOfRange);
        }

        let w = Self::create(
            ctx,
            WatcherKind::Timer {
                threadsafe,
                sched: Mutex::new(TimerSched {
                    timeout: timeout_ms,
                    period: period_ms,
                    deadline: 0,
                }),
            },
            cb,
            -1,
            Events::READ,
        );

        // Threadsafe timers are linked for their whole lifetime.
        if threadsafe {
            ctx.link(&w);
        }

        w.set_timer(timeout_ms, period_ms)?;
        Ok(w)
    }

    /// Create, register, and start an event watcher.
    ///
    /// Use [`post`](Watcher::post) to fire it; posts coalesce until the
    /// next dispatch iteration delivers the callback once.
    pub fn event<F>(ctx: &Arc<Context>, cb: F) -> Result<Arc<Watcher>>
    where
        F: Fn(&Arc<Watcher>, Events) + Send + Sync + 'static,
    {
        let w = Self::create(
            ctx,
            WatcherKind::Event {
                posted: AtomicBool::new(false),
            },
            Box::new(cb),
            -1,
            Events::READ,
        );
        w.activate(ctx);
        Ok(w)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Whether the watcher is armed (callbacks may fire).
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The watched descriptor, or -1 for non-I/O variants.
    #[inline]
    #[must_use]
    pub fn fd(&self) -> i32 {
        self.fd.load(Ordering::Acquire)
    }

    /// Requested interest mask.
    #[inline]
    #[must_use]
    pub fn interest(&self) -> Events {
        Events::from_bits(self.interest.load(Ordering::Acquire))
    }

    /// The owning context, if it is still alive.
    #[must_use]
    pub fn context(&self) -> Option<Arc<Context>> {
        self.ctx.upgrade()
    }

    /// Configured (timeout, period) of a timer watcher, in milliseconds.
    pub fn schedule(&self) -> Result<(i64, i64)> {
        match &self.kind {
            WatcherKind::Timer { sched, .. } => {
                let s = sched.lock();
                Ok((s.timeout, s.period))
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Arm the watcher. No-op when already active.
    ///
    /// I/O watchers require a valid descriptor and register with the
    /// process selector; timer watchers re-arm with their stored schedule.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let ctx = self.context().ok_or(Error::InvalidArgument)?;

        match &self.kind {
            WatcherKind::Io { .. } => {
                if self.fd() < 0 {
                    return Err(Error::InvalidArgument);
                }
                if self.is_active() {
                    return Ok(());
                }
                self.activate(&ctx);
                #[cfg(unix)]
                {
                    if let Err(err) = selector::add(self) {
                        self.deactivate();
                        return Err(err);
                    }
                    Ok(())
                }
                #[cfg(not(unix))]
                {
                    self.deactivate();
                    Err(Error::ResourceExhausted("i/o selector (unix only)"))
                }
            }
            WatcherKind::Timer { sched, .. } => {
                let (timeout, period) = {
                    let s = sched.lock();
                    (s.timeout, s.period)
                };
                self.set_timer(timeout, period)
            }
            WatcherKind::Event { .. } => {
                self.activate(&ctx);
                Ok(())
            }
        }
    }

    /// Disarm the watcher. No-op when not active.
    ///
    /// Synchronous and best-effort: prevents future callbacks but does not
    /// interrupt one already executing. Non-threadsafe variants are also
    /// unlinked from the context registry.
    pub fn stop(self: &Arc<Self>) -> Result<()> {
        match &self.kind {
            WatcherKind::Io { .. } => {
                if !self.deactivate() {
                    return Ok(());
                }
                #[cfg(unix)]
                selector::remove(self);
                Ok(())
            }
            _ => {
                self.deactivate();
                Ok(())
            }
        }
    }

    /// Rebind an I/O watcher to `fd` with a new interest mask.
    ///
    /// An active watcher is stopped, updated, and started again; a dormant
    /// one is started by this call.
    pub fn set_io(self: &Arc<Self>, fd: i32, interest: Events) -> Result<()> {
        match &self.kind {
            WatcherKind::Io { .. } => {
                self.stop()?;
                self.fd.store(fd, Ordering::Release);
                self.interest.store(interest.bits(), Ordering::Release);
                self.start()
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Reschedule a timer watcher.
    ///
    /// A zero `timeout_ms` disarms the timer (deadline drops to zero); any
    /// other value arms it `timeout_ms` from now when the loop is running.
    /// While the loop is stopped the deadline stays zero and `Context::run`
    /// re-arms on entry. The loop is woken via its TIMER bit so a sleeping
    /// dispatcher picks up the new schedule within one iteration.
    pub fn set_timer(self: &Arc<Self>, timeout_ms: i64, period_ms: i64) -> Result<()> {
        let WatcherKind::Timer { sched, .. } = &self.kind else {
            return Err(Error::InvalidArgument);
        };
        let ctx = self.context().ok_or(Error::InvalidArgument)?;
        if timeout_ms < 0 || period_ms < 0 {
            return Err(Error::OutOfRange);
        }

        let now_ms = clock::now_ms();
        {
            let mut s = sched.lock();
            s.timeout = timeout_ms;
            s.period = period_ms;
            s.deadline = if ctx.is_running() && timeout_ms != 0 {
                now_ms + timeout_ms as u64
            } else {
                0
            };
        }

        // Wake a running loop to recompute its next deadline; this may be
        // called from another thread while the dispatcher sleeps. An idle
        // context needs no wake: `run` re-arms every timer on entry.
        if ctx.is_running() {
            ctx.wake(WAKE_TIMER);
        }

        self.activate(&ctx);
        Ok(())
    }

    /// Post a software event. Callable from any thread (and from interrupt
    /// analogues): one atomic store plus a wake-bit set, no allocation.
    ///
    /// Repeated posts before delivery coalesce into a single callback.
    pub fn post(&self) -> Result<()> {
        let WatcherKind::Event { posted } = &self.kind else {
            return Err(Error::InvalidArgument);
        };
        let ctx = self.context().ok_or(Error::InvalidArgument)?;

        posted.store(true, Ordering::Release);
        ctx.wake(WAKE_EVENT);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals shared with the dispatcher
    // ------------------------------------------------------------------

    /// Mark active and link into the registry (threadsafe timers are
    /// already linked for life). Idempotent.
    fn activate(self: &Arc<Self>, ctx: &Arc<Context>) {
        if self.active.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.keeps_linkage() {
            ctx.link(self);
        }
    }

    /// Clear active and unlink unless the variant retains linkage.
    /// Returns whether the watcher was active.
    pub(crate) fn deactivate(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if !self.keeps_linkage() {
            if let Some(ctx) = self.ctx.upgrade() {
                ctx.unlink(self);
            }
        }
        true
    }

    fn keeps_linkage(&self) -> bool {
        matches!(self.kind, WatcherKind::Timer { threadsafe: true, .. })
    }

    /// Claim a posted event flag (event watchers only).
    #[inline]
    pub(crate) fn take_posted(&self) -> bool {
        match &self.kind {
            WatcherKind::Event { posted } => posted.swap(false, Ordering::AcqRel),
            _ => false,
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            WatcherKind::Io { .. } => "io",
            WatcherKind::Timer {
                threadsafe: true, ..
            } => "timer_ts",
            WatcherKind::Timer { .. } => "timer",
            WatcherKind::Event { .. } => "event",
        };
        f.debug_struct("Watcher")
            .field("kind", &kind)
            .field("fd", &self.fd())
            .field("active", &self.is_active())
            .finish()
    }
}
