// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::unwrap_used)] // Test assertions

//! One-shot, periodic, and threadsafe timer behavior through the dispatch
//! loop: expiry timing, overrun coalescing, reschedule-while-asleep, and
//! registry mutation from inside callbacks.

use rtev::{Context, Events, RunFlags, Watcher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn one_shot_fires_once_after_timeout() {
    let ctx = Context::new().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired_cb = Arc::clone(&fired);
    let start = Instant::now();
    let t = Watcher::timer(&ctx, 50, 0, move |_, events| {
        assert_eq!(events, Events::READ);
        fired_cb.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    assert!(t.is_active());

    ctx.run(RunFlags::ONCE).unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(!t.is_active());

    // A second, non-blocking iteration must deliver nothing.
    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn zero_timeout_one_shot_fires_at_loop_start() {
    let ctx = Context::new().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired_cb = Arc::clone(&fired);
    let t = Watcher::timer(&ctx, 0, 0, move |_, _| {
        fired_cb.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    assert!(t.is_active());

    // Re-arm at loop entry covers timeout == 0: fire on the first
    // iteration, then stop.
    let start = Instant::now();
    ctx.run(RunFlags::ONCE).unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(!t.is_active());

    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn periodic_coalesces_after_stall() {
    let ctx = Context::new().unwrap();
    let stamps: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let stamps_cb = Arc::clone(&stamps);
    let _tick = Watcher::timer(&ctx, 0, 100, move |_, _| {
        stamps_cb.lock().unwrap().push(Instant::now());
    })
    .unwrap();

    // An unrelated event callback stalls the loop across several periods.
    let stall = Watcher::event(&ctx, |_, _| {
        thread::sleep(Duration::from_millis(350));
    })
    .unwrap();
    stall.post().unwrap();

    let ctx_cb = Arc::downgrade(&ctx);
    let _stopper = Watcher::timer(&ctx, 650, 0, move |_, _| {
        if let Some(ctx) = ctx_cb.upgrade() {
            ctx.exit().unwrap();
        }
    })
    .unwrap();

    ctx.run(RunFlags::NONE).unwrap();

    let stamps = stamps.lock().unwrap();
    // The stall swallows missed expiries: at most one tick per iteration,
    // never a burst of catch-up ticks.
    assert!(
        (2..=4).contains(&stamps.len()),
        "expected coalesced ticks, got {}",
        stamps.len()
    );
    for pair in stamps.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(99), "burst tick, gap {:?}", gap);
    }
}

#[test]
fn threadsafe_reschedule_wakes_sleeping_loop() {
    let ctx = Context::new().unwrap();
    let fired_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

    let fired_cb = Arc::clone(&fired_at);
    let ctx_cb = Arc::downgrade(&ctx);
    let t = Watcher::timer_threadsafe(&ctx, 2000, 0, move |_, _| {
        *fired_cb.lock().unwrap() = Some(Instant::now());
        if let Some(ctx) = ctx_cb.upgrade() {
            ctx.exit().unwrap();
        }
    })
    .unwrap();

    let runner_ctx = Arc::clone(&ctx);
    let runner = thread::spawn(move || runner_ctx.run(RunFlags::NONE).unwrap());

    // Let the loop go to sleep on the 2 s deadline, then reschedule from
    // this thread: the TIMER bit must wake it to pick up the new deadline.
    thread::sleep(Duration::from_millis(80));
    let set_at = Instant::now();
    t.set_timer(50, 0).unwrap();

    runner.join().unwrap();

    let fired_at = fired_at.lock().unwrap().expect("timer should have fired");
    let latency = fired_at - set_at;
    assert!(latency >= Duration::from_millis(50), "early: {:?}", latency);
    assert!(latency < Duration::from_millis(500), "late: {:?}", latency);
}

#[test]
fn timer_set_then_stop_preserves_schedule() {
    let ctx = Context::new().unwrap();
    let t = Watcher::timer(&ctx, 10, 0, |_, _| {}).unwrap();

    t.set_timer(30, 70).unwrap();
    t.start().unwrap();
    t.stop().unwrap();

    assert!(!t.is_active());
    assert_eq!(t.schedule().unwrap(), (30, 70));
}

#[test]
fn timer_started_inside_callback_fires_later() {
    let ctx = Context::new().unwrap();
    let second_fired = Arc::new(AtomicUsize::new(0));

    let ctx_outer = Arc::downgrade(&ctx);
    let second_fired_cb = Arc::clone(&second_fired);
    let _first = Watcher::timer(&ctx, 30, 0, move |_, _| {
        let ctx = ctx_outer.upgrade().expect("context alive in callback");
        let fired = Arc::clone(&second_fired_cb);
        let ctx_inner = Arc::downgrade(&ctx);
        // Registering during the sweep must not disturb the current
        // iteration; the new timer fires on a later one.
        Watcher::timer(&ctx, 10, 0, move |_, _| {
            fired.fetch_add(1, Ordering::SeqCst);
            if let Some(ctx) = ctx_inner.upgrade() {
                ctx.exit().unwrap();
            }
        })
        .unwrap();
    })
    .unwrap();

    ctx.run(RunFlags::NONE).unwrap();
    assert_eq!(second_fired.load(Ordering::SeqCst), 1);
}

#[test]
fn restart_after_run_does_not_fire_stale_deadline() {
    let ctx = Context::new().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired_cb = Arc::clone(&fired);
    let t = Watcher::timer(&ctx, 40, 0, move |_, _| {
        fired_cb.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    ctx.run(RunFlags::ONCE).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Re-arm and run again much later: the deadline must be recomputed
    // from the new start, not inherited from the first run.
    thread::sleep(Duration::from_millis(100));
    t.start().unwrap();
    let start = Instant::now();
    ctx.run(RunFlags::ONCE).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert!(start.elapsed() >= Duration::from_millis(40));
}
