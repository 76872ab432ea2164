// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Steady-clock timestamps.
//!
//! All timestamps stored in the segment are `CLOCK_MONOTONIC` nanoseconds.
//! They are comparable across processes on the same host but carry no
//! wall-clock meaning; observability layers translate at the boundary.

/// Current steady-clock time in nanoseconds.
#[must_use]
pub fn steady_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec; CLOCK_MONOTONIC is always
    // available on the supported platforms, so the call cannot fail.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_nanos_nonzero() {
        assert!(steady_nanos() > 0);
    }

    #[test]
    fn test_steady_nanos_monotonic() {
        let a = steady_nanos();
        let b = steady_nanos();
        assert!(b >= a);
    }
}
