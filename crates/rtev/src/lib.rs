// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! # rtev - Micro event loop for cooperative runtimes
//!
//! A small, allocation-light event loop in the RTOS tradition: descriptor
//! readiness, millisecond timers, and software-posted events multiplexed
//! into one cooperative dispatch loop, driven by a single wake-bit group
//! per loop context.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtev::{Context, RunFlags, Watcher};
//!
//! fn main() -> rtev::Result<()> {
//!     let ctx = Context::new()?;
//!
//!     // Fire once, 50 ms from loop start.
//!     let _t = Watcher::timer(&ctx, 50, 0, |_w, _events| {
//!         println!("tick");
//!     })?;
//!
//!     ctx.run(RunFlags::ONCE)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     user tasks / "ISRs"                      |
//! |        post events, reschedule timers, start watchers        |
//! +--------------------------------------------------------------+
//! |  Dispatch loop (Context::run)                                |
//! |  next deadline -> wait on wake bits -> sweep registry ->     |
//! |  fire callbacks -> reschedule periodic timers                |
//! +--------------------------------------------------------------+
//! |  Wake-bit group (IO | EVENT | TIMER)   Watcher registry      |
//! +--------------------------------------------------------------+
//! |  Selector task (one per process)                             |
//! |  select(2) over I/O watchers, loopback wake socket           |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Context`] | One loop: running flag, wake bits, watcher registry |
//! | [`Watcher`] | A registered interest (I/O, timer, event) plus callback |
//! | [`Events`] | Readiness/event bits delivered to callbacks |
//! | [`RunFlags`] | `ONCE` / `NONBLOCK` loop control |
//!
//! ## Concurrency model
//!
//! Callbacks run to completion on the thread driving [`Context::run`];
//! blocking inside one delays every other watcher on that context. The
//! only suspension points are the bit-group wait in the dispatch loop and
//! the `select` inside the selector task. Posting paths (event post,
//! threadsafe-timer reschedule) are callable from any thread and do one
//! atomic write plus a wake-bit set.
//!
//! The I/O selector is unix-only; timers and events work everywhere.

/// Wake-bit group primitive shared by producers and the dispatch loop.
pub mod bits;
/// Monotonic loop clock (millisecond deadline arithmetic).
pub mod clock;
/// Central tunables and `RTEV_*` env overrides.
pub mod config;
mod context;
mod error;
/// Process-wide `select(2)` task feeding I/O watchers.
#[cfg(unix)]
pub mod selector;
mod watcher;

pub use context::{Context, RunFlags};
pub use error::{Error, Result};
pub use watcher::{Callback, Events, Watcher};
