// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! Process-wide I/O selector task.
//!
//! One background thread per process, regardless of how many loop contexts
//! exist. It owns a UDP socket bound to loopback:ephemeral (the *wake
//! socket*) and the list of registered I/O watchers, and converts raw
//! descriptor readiness into per-watcher pending bits plus an IO wake on
//! the owning context.
//!
//! # Wake protocol
//! Any single byte sent to the wake socket's own address pops the thread
//! out of `select`. Registry mutations (add/remove) and post-dispatch
//! drains each emit one wake byte so the readiness set is rebuilt.
//!
//! # Failure
//! EINTR restarts `select`; other `select` errors back off ~1 s and retry.
//! A fatal wake-socket read error terminates the thread: I/O watchers stop
//! producing events, while timers and event watchers on every context keep
//! working.

use crate::bits::WAKE_IO;
use crate::config;
use crate::error::{Error, Result};
use crate::watcher::{Events, Watcher, WatcherKind};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::thread;

static SELECTOR: OnceLock<Arc<Selector>> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

struct Selector {
    wake_sock: UdpSocket,
    wake_addr: SocketAddr,
    /// Registered I/O watchers; subset of their contexts' registries.
    iolist: Mutex<Vec<Arc<Watcher>>>,
}

/// Start the selector task. Idempotent per process.
///
/// Called implicitly when the first I/O watcher starts; explicit early
/// initialization lets callers surface socket/thread failures up front.
pub fn init() -> Result<()> {
    let _guard = INIT_LOCK.lock();
    if SELECTOR.get().is_some() {
        return Ok(());
    }

    let sel = Arc::new(Selector::create()?);
    let task = Arc::clone(&sel);
    thread::Builder::new()
        .name(config::SELECTOR_THREAD_NAME.into())
        .spawn(move || selector_loop(&task))
        .map_err(|_| Error::ResourceExhausted("selector thread"))?;

    let _ = SELECTOR.set(sel);
    Ok(())
}

/// Register an I/O watcher with the selector and force a rebuild.
pub(crate) fn add(w: &Arc<Watcher>) -> Result<()> {
    init()?;
    let sel = SELECTOR
        .get()
        .ok_or(Error::ResourceExhausted("selector"))?;

    {
        let mut list = sel.iolist.lock();
        if !list.iter().any(|x| Arc::ptr_eq(x, w)) {
            list.push(Arc::clone(w));
        }
    }
    sel.send_wake();
    Ok(())
}

/// Withdraw an I/O watcher from the selector and force a rebuild.
pub(crate) fn remove(w: &Arc<Watcher>) {
    if let Some(sel) = SELECTOR.get() {
        sel.iolist.lock().retain(|x| !Arc::ptr_eq(x, w));
        sel.send_wake();
    }
}

/// Nudge the selector to rebuild its readiness set. Used by the dispatcher
/// after it clears delivered pending bits.
pub(crate) fn wake() {
    if let Some(sel) = SELECTOR.get() {
        sel.send_wake();
    }
}

impl Selector {
    fn create() -> Result<Selector> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(Error::Io)?;
        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        sock.bind(&bind_addr.into()).map_err(Error::Io)?;
        sock.set_nonblocking(true).map_err(Error::Io)?;

        let wake_sock: UdpSocket = sock.into();
        let wake_addr = wake_sock.local_addr().map_err(Error::Io)?;
        log::debug!("[selector] wake socket bound to {}", wake_addr);

        Ok(Selector {
            wake_sock,
            wake_addr,
            iolist: Mutex::new(Vec::new()),
        })
    }

    fn send_wake(&self) {
        let payload = [config::WAKE_PAYLOAD];
        if let Err(err) = self.wake_sock.send_to(&payload, self.wake_addr) {
            // A dropped wake byte means a stale readiness set until the
            // next registry mutation; log and carry on.
            if err.kind() != io::ErrorKind::WouldBlock {
                log::debug!("[selector] wake send failed: {}", err);
            }
        }
    }
}

struct FdSets {
    read: libc::fd_set,
    write: libc::fd_set,
    except: libc::fd_set,
}

impl FdSets {
    fn new() -> Self {
        // SAFETY: fd_set is a plain bitmap with no invalid bit patterns;
        // FD_ZERO fully initializes each set.
        unsafe {
            let mut read = std::mem::zeroed();
            let mut write = std::mem::zeroed();
            let mut except = std::mem::zeroed();
            libc::FD_ZERO(&mut read);
            libc::FD_ZERO(&mut write);
            libc::FD_ZERO(&mut except);
            Self {
                read,
                write,
                except,
            }
        }
    }
}

fn selector_loop(sel: &Selector) {
    log::debug!("[selector] task running");
    let wake_fd = sel.wake_sock.as_raw_fd();

    loop {
        let mut sets = FdSets::new();
        // SAFETY: wake_fd is a live descriptor owned by the selector and
        // created early enough to sit below FD_SETSIZE.
        unsafe { libc::FD_SET(wake_fd, &mut sets.read) };
        let mut maxfd = wake_fd;

        {
            let list = sel.iolist.lock();
            for w in list.iter() {
                if !w.is_active() {
                    continue;
                }
                let fd = w.fd();
                if fd < 0 {
                    continue;
                }
                if fd as usize >= libc::FD_SETSIZE as usize {
                    log::warn!("[selector] fd {} above FD_SETSIZE, skipped", fd);
                    continue;
                }
                // Watchers with undelivered events sit this build out;
                // the dispatcher re-admits them once it clears their bits.
                // Otherwise a still-ready descriptor would wake us in a
                // tight loop until dispatch catches up.
                if let WatcherKind::Io { pending } = &w.kind {
                    if pending.load(Ordering::Acquire) != 0 {
                        continue;
                    }
                }

                let interest = w.interest();
                if fd > maxfd {
                    maxfd = fd;
                }
                // SAFETY: fd checked non-negative and below FD_SETSIZE.
                unsafe {
                    if interest.contains(Events::READ) {
                        libc::FD_SET(fd, &mut sets.read);
                    }
                    if interest.contains(Events::WRITE) {
                        libc::FD_SET(fd, &mut sets.write);
                    }
                    if interest.contains(Events::ERROR) {
                        libc::FD_SET(fd, &mut sets.except);
                    }
                }
            }
        }

        // SAFETY: all descriptors in the sets are below FD_SETSIZE, maxfd
        // bounds them, and the null timeout blocks until readiness; select
        // does not retain the pointers past the call.
        let rc = unsafe {
            libc::select(
                maxfd + 1,
                &mut sets.read,
                &mut sets.write,
                &mut sets.except,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("[selector] select failed: {}", err);
            thread::sleep(config::select_error_backoff());
            continue;
        }
        if rc == 0 {
            // No timeout armed, so a zero return is spurious.
            continue;
        }

        // SAFETY: reading membership bits from sets populated by select.
        let wake_except = unsafe { libc::FD_ISSET(wake_fd, &sets.except) };
        if wake_except {
            log::error!("[selector] wake socket exception");
        }
        // SAFETY: as above.
        let wake_ready = unsafe { libc::FD_ISSET(wake_fd, &sets.read) };
        if wake_ready && !drain_wake(sel) {
            break;
        }

        {
            let list = sel.iolist.lock();
            for w in list.iter() {
                if !w.is_active() {
                    continue;
                }
                let fd = w.fd();
                if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
                    continue;
                }

                let interest = w.interest();
                let mut ev = 0u32;
                // SAFETY: fd bounds checked above; sets populated by select.
                unsafe {
                    if libc::FD_ISSET(fd, &sets.read) && interest.contains(Events::READ) {
                        ev |= Events::READ.bits();
                    }
                    if libc::FD_ISSET(fd, &sets.write) && interest.contains(Events::WRITE) {
                        ev |= Events::WRITE.bits();
                    }
                    if libc::FD_ISSET(fd, &sets.except) && interest.contains(Events::ERROR) {
                        ev |= Events::ERROR.bits();
                    }
                }
                if ev == 0 {
                    continue;
                }

                if let WatcherKind::Io { pending } = &w.kind {
                    pending.fetch_or(ev, Ordering::AcqRel);
                }
                if let Some(ctx) = w.context() {
                    ctx.wake(WAKE_IO);
                }
            }
        }
    }

    log::error!("[selector] task terminated; i/o watchers will no longer fire");
}

/// Drain one wake byte. Returns `false` on a condition fatal to the task.
fn drain_wake(sel: &Selector) -> bool {
    let mut buf = [0u8; 1];
    loop {
        match sel.wake_sock.recv_from(&mut buf) {
            Ok((0, _)) => {
                log::error!("[selector] wake socket closed");
                return false;
            }
            Ok(_) => return true,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return true,
            Err(err) => {
                log::error!("[selector] wake socket read failed: {}", err);
                return false;
            }
        }
    }
}
