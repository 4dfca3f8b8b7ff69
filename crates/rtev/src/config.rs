// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rtev-team

//! Central tunables for the loop core.
//!
//! Constants live here so call sites never hardcode them. A small number
//! of knobs can be overridden at process start via `RTEV_*` environment
//! variables; everything else is compile-time.

use std::time::Duration;

/// Name of the background selector thread.
pub const SELECTOR_THREAD_NAME: &str = "rtev-selector";

/// Payload of a selector wake datagram. Any single byte works; the value
/// is fixed so captures are recognizable.
pub const WAKE_PAYLOAD: u8 = 0x01;

/// Default backoff after a non-EINTR `select` failure, in milliseconds.
pub const SELECT_ERROR_BACKOFF_MS: u64 = 1000;

/// Backoff applied after a failed `select`.
///
/// Override with `RTEV_SELECT_BACKOFF_MS` (milliseconds) for tests that
/// exercise the error path without waiting a full second.
#[must_use]
pub fn select_error_backoff() -> Duration {
    let ms = std::env::var("RTEV_SELECT_BACKOFF_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(SELECT_ERROR_BACKOFF_MS);
    Duration::from_millis(ms)
}
