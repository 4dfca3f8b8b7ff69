// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

#![cfg(unix)]
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::unwrap_used)] // Test assertions

//! I/O watchers end to end through the selector task: pipe readiness,
//! pending-bit drain, interest-mask filtering, and stop semantics.

use rtev::{selector, Context, Events, RunFlags, Watcher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn pipe() -> (i32, i32) {
    let mut fds = [0i32; 2];
    // SAFETY: fds points to a 2-element array as pipe(2) requires.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed");
    (fds[0], fds[1])
}

fn write_byte(fd: i32) {
    let buf = [0x2au8];
    // SAFETY: fd is the live write end of a pipe; buf is one byte.
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), 1) };
    assert_eq!(n, 1, "pipe write failed");
}

fn read_byte(fd: i32) {
    let mut buf = [0u8; 1];
    // SAFETY: fd is the live read end of a pipe; buf is one byte.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), 1) };
    assert_eq!(n, 1, "pipe read failed");
}

fn close_fd(fd: i32) {
    // SAFETY: fd was obtained from pipe(2) and is closed exactly once.
    unsafe { libc::close(fd) };
}

#[test]
fn pipe_read_readiness_delivers_once() {
    selector::init().unwrap();

    let ctx = Context::new().unwrap();
    let (rfd, wfd) = pipe();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_cb = Arc::clone(&hits);
    let w = Watcher::io(&ctx, rfd, Events::READ, move |w, events| {
        assert!(events.contains(Events::READ));
        assert!(!events.contains(Events::WRITE));
        // Drain the descriptor so the level signal does not re-arm.
        read_byte(w.fd());
        hits_cb.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    w.start().unwrap();
    assert!(w.is_active());

    write_byte(wfd);
    ctx.run(RunFlags::ONCE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Pending bits were cleared with delivery and the pipe is drained:
    // another iteration without a write must stay silent.
    thread::sleep(Duration::from_millis(50));
    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    w.stop().unwrap();
    close_fd(rfd);
    close_fd(wfd);
}

#[test]
fn interest_mask_filters_write_readiness() {
    selector::init().unwrap();

    let ctx = Context::new().unwrap();
    let (rfd, wfd) = pipe();
    let seen: Arc<Mutex<Vec<Events>>> = Arc::new(Mutex::new(Vec::new()));

    // Watch the (always writable) write end, but only ask for READ.
    let seen_cb = Arc::clone(&seen);
    let w = Watcher::io(&ctx, wfd, Events::READ, move |_, events| {
        seen_cb.lock().unwrap().push(events);
    })
    .unwrap();
    w.start().unwrap();

    thread::sleep(Duration::from_millis(100));
    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();
    assert!(
        seen.lock().unwrap().is_empty(),
        "writability leaked through a READ-only mask"
    );

    // Widen the interest to WRITE and the same descriptor fires.
    w.set_io(wfd, Events::WRITE).unwrap();
    ctx.run(RunFlags::ONCE).unwrap();

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Events::WRITE);
    }

    w.stop().unwrap();
    close_fd(rfd);
    close_fd(wfd);
}

#[test]
fn stopped_watcher_gets_no_callbacks() {
    selector::init().unwrap();

    let ctx = Context::new().unwrap();
    let (rfd, wfd) = pipe();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_cb = Arc::clone(&hits);
    let w = Watcher::io(&ctx, rfd, Events::READ, move |_, _| {
        hits_cb.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    w.start().unwrap();
    write_byte(wfd);
    w.stop().unwrap();

    thread::sleep(Duration::from_millis(50));
    ctx.run(RunFlags::ONCE | RunFlags::NONBLOCK).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    close_fd(rfd);
    close_fd(wfd);
}

#[test]
fn undrained_descriptor_refires_after_rebuild() {
    selector::init().unwrap();

    let ctx = Context::new().unwrap();
    let (rfd, wfd) = pipe();
    let hits = Arc::new(AtomicUsize::new(0));

    // Deliberately do NOT drain the pipe in the callback.
    let hits_cb = Arc::clone(&hits);
    let w = Watcher::io(&ctx, rfd, Events::READ, move |_, _| {
        hits_cb.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    w.start().unwrap();

    write_byte(wfd);
    ctx.run(RunFlags::ONCE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The dispatcher's post-delivery wake forces a rebuild; the
    // still-readable descriptor re-enters the set and fires again.
    ctx.run(RunFlags::ONCE).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    w.stop().unwrap();
    close_fd(rfd);
    close_fd(wfd);
}
