// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Linux futex wrapper for inter-process synchronization.
//!
//! # CRITICAL: SHARED vs PRIVATE
//!
//! This module uses `FUTEX_WAIT` and `FUTEX_WAKE` (NOT the `_PRIVATE`
//! variants). The `_PRIVATE` variants only work within a single process and
//! will silently fail to wake threads in other processes.
//!
//! The wait word is a ring's `notification_count` generation counter living
//! in shared memory; waiters snapshot it, re-check their condition, then
//! sleep until the publisher bumps it.

use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Futex operation codes (SHARED, not PRIVATE!)
#[cfg(target_os = "linux")]
const FUTEX_WAIT: i32 = 0; // NOT 128 (FUTEX_WAIT_PRIVATE)
#[cfg(target_os = "linux")]
const FUTEX_WAKE: i32 = 1; // NOT 129 (FUTEX_WAKE_PRIVATE)

/// Outcome of a futex wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken (or interrupted); the caller must re-check its condition
    Woken,
    /// The timeout expired with no wake
    TimedOut,
    /// The word no longer held the expected value; re-check immediately
    ValueChanged,
}

/// Wait on a futex word until it changes or the timeout expires.
///
/// Only sleeps if the word still holds `expected` when the kernel checks it;
/// otherwise returns [`WaitOutcome::ValueChanged`] without blocking. `None`
/// timeout blocks indefinitely.
///
/// For inter-process use the word must live in a `MAP_SHARED` mapping.
#[cfg(target_os = "linux")]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: libc::c_long::from(d.subsec_nanos()),
    });

    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null(), |t| t as *const libc::timespec);

    // SAFETY: addr is a live reference, so the address is valid for the whole
    // call. FUTEX_WAIT with a relative timespec is the documented form.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(), // uaddr2 (unused)
            0i32,               // val3 (unused)
        )
    };

    if ret == 0 {
        return WaitOutcome::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
        Some(libc::EAGAIN) => WaitOutcome::ValueChanged,
        // EINTR and anything unexpected: treat as a wake, caller re-checks
        _ => WaitOutcome::Woken,
    }
}

/// Wake up to `count` waiters blocked on the futex word.
///
/// Returns the number of waiters woken.
#[cfg(target_os = "linux")]
pub fn futex_wake(addr: &AtomicU32, count: i32) -> i32 {
    // SAFETY: addr is a live reference; FUTEX_WAKE ignores the timeout and
    // uaddr2/val3 arguments.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            count,
            ptr::null::<libc::timespec>(),
            ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

/// Wake all waiters (broadcast)
#[cfg(target_os = "linux")]
#[inline]
pub fn futex_wake_all(addr: &AtomicU32) -> i32 {
    futex_wake(addr, i32::MAX)
}

// Non-Linux fallback (sleep-based, for development builds only)
#[cfg(not(target_os = "linux"))]
pub fn futex_wait(_addr: &AtomicU32, _expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    let sleep_time = timeout.unwrap_or(Duration::from_millis(1));
    std::thread::sleep(sleep_time.min(Duration::from_millis(10)));
    WaitOutcome::Woken
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_addr: &AtomicU32, _count: i32) -> i32 {
    0
}

#[cfg(not(target_os = "linux"))]
#[inline]
pub fn futex_wake_all(_addr: &AtomicU32) -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wake_without_waiters() {
        let word = AtomicU32::new(0);
        assert!(futex_wake_all(&word) >= 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_wait_value_changed() {
        let word = AtomicU32::new(42);
        let outcome = futex_wait(&word, 0, Some(Duration::from_millis(100)));
        assert_eq!(outcome, WaitOutcome::ValueChanged);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_wait_timeout() {
        let word = AtomicU32::new(42);
        let start = std::time::Instant::now();
        let outcome = futex_wait(&word, 42, Some(Duration::from_millis(50)));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_wake_unblocks_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let word_clone = Arc::clone(&word);

        let handle = thread::spawn(move || {
            while word_clone.load(Ordering::Acquire) == 0 {
                futex_wait(&word_clone, 0, Some(Duration::from_secs(1)));
            }
            word_clone.load(Ordering::Acquire)
        });

        thread::sleep(Duration::from_millis(10));
        word.store(7, Ordering::Release);
        futex_wake_all(&word);

        assert_eq!(handle.join().expect("waiter panicked"), 7);
    }
}
