// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! Error types for rtev operations.

use std::fmt;
use std::io;

/// Result type for rtev operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the event loop core.
///
/// Everything else is either recovered internally (EINTR on select,
/// transient selector errors via backoff) or fatal to a single subsystem
/// (selector thread termination ends I/O dispatch only).
#[derive(Debug)]
pub enum Error {
    /// Null/unowned input: watcher without a live context, operation on a
    /// watcher of the wrong variant, or an I/O watcher with a negative fd.
    InvalidArgument,

    /// Negative timeout or period.
    OutOfRange,

    /// Creation of a loop resource failed (wake-bit group, selector thread).
    ResourceExhausted(&'static str),

    /// OS-level error from the selector's wake socket.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::OutOfRange => write!(f, "Timeout or period out of range"),
            Error::ResourceExhausted(what) => write!(f, "Resource exhausted: {}", what),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
