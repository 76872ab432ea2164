// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment management.
//!
//! Wraps `shm_open`, `ftruncate`, and `mmap` together with the segment's
//! companion named semaphore (a counting semaphore with initial value 1 that
//! serializes registry and endpoint registration across processes).
//!
//! # Segment Lifecycle
//!
//! 1. Any process calls [`ShmSegment::open`] - the segment is created on
//!    first use and re-opened afterwards
//! 2. A stale semaphore (held by a crashed process) is detected and recovered
//!    at open time, serialized by a file lock
//! 3. The mapping and semaphore handle are released on drop; the segment
//!    itself persists across process exits by design
//!
//! # Naming Convention
//!
//! Segment names must start with `/` and contain no other `/`.
//! The semaphore is named `<segment>_sem`, the recovery lock lives at
//! `/tmp/<segment>_sem.lock`.

use crate::config::{lock_path, semaphore_name};
use crate::{DdsError, Result};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr;

/// Timeout for the stale-semaphore probe during recovery
const SEM_RECOVERY_TIMEOUT_MS: i64 = 20;

/// POSIX shared memory segment plus its companion semaphore.
///
/// Automatically unmaps the region and closes the semaphore handle on drop.
/// Does NOT unlink either (the segment outlives processes by design).
pub struct ShmSegment {
    /// Pointer to mapped memory region
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// Segment name (for diagnostics and unlink)
    name: String,
    /// Companion named semaphore handle
    sem: *mut libc::sem_t,
}

// SAFETY: the mapping is shared memory accessed from multiple threads and
// processes; all mutable state inside it is managed through atomics or under
// the segment semaphore. The sem handle is process-wide and thread-safe per
// POSIX.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Open (or create on first use) the named segment and its semaphore.
    ///
    /// A fresh segment is extended to `size` bytes; an existing segment whose
    /// size differs is rejected - peers already populated it and resizing
    /// would corrupt their layout.
    ///
    /// # Errors
    ///
    /// Returns an error on any system-call failure; partially opened
    /// descriptors are closed before returning.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name =
            CString::new(name).map_err(|_| DdsError::InvalidSegmentName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; O_CREAT|O_RDWR
        // either creates the object or opens the existing one.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o666) };
        if fd < 0 {
            return Err(DdsError::SegmentOpen(io::Error::last_os_error()));
        }

        // First writer extends the fresh (zero-sized) object; everyone else
        // must observe exactly the agreed size.
        let mut sb: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid from shm_open; sb is a writable stat buffer.
        if unsafe { libc::fstat(fd, &mut sb) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and not used after this error path.
            unsafe { libc::close(fd) };
            return Err(DdsError::SegmentOpen(err));
        }

        if sb.st_size == 0 {
            // SAFETY: fd is valid; size fits in off_t for any practical segment.
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
                let err = io::Error::last_os_error();
                // SAFETY: fd is valid and not used after this error path.
                unsafe { libc::close(fd) };
                return Err(DdsError::SegmentCreate(err));
            }
        } else if sb.st_size as usize != size {
            // SAFETY: fd is valid and not used after this error path.
            unsafe { libc::close(fd) };
            return Err(DdsError::SegmentSizeMismatch {
                expected: size,
                actual: sb.st_size as usize,
            });
        }

        // MAP_POPULATE pre-faults the physical pages so embedded targets do
        // not take first-touch faults on the publish path.
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let flags = libc::MAP_SHARED | libc::MAP_POPULATE;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let flags = libc::MAP_SHARED;

        // SAFETY: fd is valid and the object is at least `size` bytes;
        // PROT_READ|PROT_WRITE with MAP_SHARED is the standard shm mapping.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd,
                0,
            )
        };

        // The mapping holds its own reference; the descriptor is no longer
        // needed either way.
        // SAFETY: fd is valid; close is called exactly once.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(DdsError::Mmap(io::Error::last_os_error()));
        }

        let sem_name = semaphore_name(name);
        let sem = match Self::open_semaphore(&sem_name) {
            Ok(sem) => sem,
            Err(e) => {
                // SAFETY: ptr/size come from the successful mmap above.
                unsafe { libc::munmap(ptr.cast::<libc::c_void>(), size) };
                return Err(e);
            }
        };

        log::debug!("[shm] segment {name} mapped, size {size}");

        Ok(Self {
            ptr: ptr.cast::<u8>(),
            size,
            name: name.to_string(),
            sem,
        })
    }

    /// Open or create the named semaphore and recover it if a previous
    /// holder died while holding it.
    fn open_semaphore(sem_name: &str) -> Result<*mut libc::sem_t> {
        let c_name =
            CString::new(sem_name).map_err(|_| DdsError::InvalidSegmentName(sem_name.into()))?;

        // Initial value 1: the semaphore behaves as a cross-process mutex.
        // SAFETY: c_name is a valid NUL-terminated string; mode and initial
        // value are passed with the C-promoted types sem_open expects.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(DdsError::Semaphore(io::Error::last_os_error()));
        }

        let mut value: libc::c_int = 0;
        // SAFETY: sem is a valid handle from sem_open; value is writable.
        if unsafe { libc::sem_getvalue(sem, &mut value) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: sem is valid; closed exactly once on this error path.
            unsafe { libc::sem_close(sem) };
            return Err(DdsError::Semaphore(err));
        }

        // Value 0 means someone holds it - possibly a process that died
        // mid-registration. Probe and reset under a file lock.
        if value == 0 {
            if let Err(e) = Self::recover_semaphore(sem, sem_name) {
                // SAFETY: sem is valid; closed exactly once on this error path.
                unsafe { libc::sem_close(sem) };
                return Err(e);
            }
        }

        Ok(sem)
    }

    /// Serialize stale-semaphore recovery through a file lock, then probe the
    /// semaphore with a short timed wait. On timeout the holder is presumed
    /// dead and the semaphore is posted back to 1.
    fn recover_semaphore(sem: *mut libc::sem_t, sem_name: &str) -> Result<()> {
        let path = lock_path(sem_name);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(DdsError::Semaphore)?;

        // SAFETY: the fd is valid for the lifetime of lock_file.
        if unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX) } < 0 {
            return Err(DdsError::Semaphore(io::Error::last_os_error()));
        }

        // Another process may have finished recovery while we waited for the
        // lock; re-check before touching the semaphore.
        let mut value: libc::c_int = 0;
        // SAFETY: sem is valid; value is writable.
        unsafe { libc::sem_getvalue(sem, &mut value) };

        if value == 0 {
            let mut ts = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            // SAFETY: ts is writable; sem_timedwait requires CLOCK_REALTIME
            // absolute time.
            unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
            ts.tv_nsec += SEM_RECOVERY_TIMEOUT_MS * 1_000_000;
            if ts.tv_nsec >= 1_000_000_000 {
                ts.tv_sec += 1;
                ts.tv_nsec -= 1_000_000_000;
            }

            // SAFETY: sem is valid, ts holds an absolute deadline.
            if unsafe { libc::sem_timedwait(sem, &ts) } < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ETIMEDOUT) {
                    log::warn!("[shm] semaphore {sem_name} appears dead-locked, resetting");
                    // SAFETY: sem is valid.
                    if unsafe { libc::sem_post(sem) } < 0 {
                        return Err(DdsError::Semaphore(io::Error::last_os_error()));
                    }
                } else {
                    return Err(DdsError::Semaphore(err));
                }
            } else {
                // The holder was merely slow; give the token back.
                // SAFETY: sem is valid and we hold one token from the wait.
                unsafe { libc::sem_post(sem) };
            }
        }

        // SAFETY: the fd is still valid; LOCK_UN releases our exclusive lock.
        unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_UN) };
        drop(lock_file);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    /// Validate segment name follows POSIX rules
    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') {
            return Err(DdsError::InvalidSegmentName(format!(
                "must start with '/': {name}"
            )));
        }
        if name.len() > 1 && name[1..].contains('/') {
            return Err(DdsError::InvalidSegmentName(format!(
                "no '/' allowed after the prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(DdsError::InvalidSegmentName(format!(
                "too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Unlink (delete) a segment and its semaphore by name.
    ///
    /// The objects disappear once every process unmaps/closes them. Normal
    /// teardown never calls this; it exists for tests and operator cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if unlink fails (not-found is not an error).
    pub fn unlink(name: &str) -> Result<()> {
        let c_name =
            CString::new(name).map_err(|_| DdsError::InvalidSegmentName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink only
        // touches the filesystem namespace.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(DdsError::SegmentOpen(err));
            }
        }

        let sem_name = semaphore_name(name);
        if let Ok(c_sem) = CString::new(sem_name) {
            // SAFETY: c_sem is a valid NUL-terminated string; errors (e.g.
            // not found) are intentionally ignored for idempotent cleanup.
            unsafe { libc::sem_unlink(c_sem.as_ptr()) };
        }

        Ok(())
    }

    /// Check whether a segment with the given name exists
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };

        // SAFETY: c_name is a valid NUL-terminated string; O_RDONLY without
        // O_CREAT only probes for existence.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            // SAFETY: fd is valid and closed exactly once.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Get raw pointer to the mapped memory
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Get the size of the mapping
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the segment name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The segment's companion semaphore handle
    #[inline]
    pub(crate) fn semaphore(&self) -> *mut libc::sem_t {
        self.sem
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from the successful mmap in open(); Drop runs
        // once, and the semaphore handle is closed, never unlinked.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
            libc::sem_close(self.sem);
        }
    }
}

/// RAII guard for the segment semaphore.
///
/// Acquired around every mutating registry or endpoint-registration
/// operation; posts the semaphore back on drop, including panics.
pub(crate) struct SemGuard {
    sem: *mut libc::sem_t,
}

impl SemGuard {
    pub(crate) fn acquire(sem: *mut libc::sem_t) -> Result<Self> {
        loop {
            // SAFETY: sem is a valid handle owned by a live ShmSegment.
            if unsafe { libc::sem_wait(sem) } == 0 {
                return Ok(Self { sem });
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(DdsError::Semaphore(err));
            }
        }
    }
}

impl Drop for SemGuard {
    fn drop(&mut self) {
        // SAFETY: sem is valid and we hold exactly one token.
        unsafe {
            libc::sem_post(self.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/ldds_seg_{ts}")
    }

    #[test]
    fn test_validate_name() {
        assert!(ShmSegment::validate_name("/foo").is_ok());
        assert!(ShmSegment::validate_name("/MB_DDF_SHM").is_ok());
        assert!(ShmSegment::validate_name("foo").is_err());
        assert!(ShmSegment::validate_name("/foo/bar").is_err());
    }

    #[test]
    fn test_open_twice_shares_memory() {
        let name = unique_name();
        let size = 1024 * 1024;

        let seg1 = ShmSegment::open(&name, size).expect("first open");
        assert_eq!(seg1.size(), size);

        // SAFETY: seg1 maps `size` bytes; offsets 0 and 1 are in bounds.
        unsafe {
            *seg1.as_ptr() = 0x42;
            *seg1.as_ptr().add(1) = 0x43;
        }

        let seg2 = ShmSegment::open(&name, size).expect("second open");
        // SAFETY: same object, same bounds.
        unsafe {
            assert_eq!(*seg2.as_ptr(), 0x42);
            assert_eq!(*seg2.as_ptr().add(1), 0x43);
        }

        drop(seg1);
        drop(seg2);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let name = unique_name();
        let _seg = ShmSegment::open(&name, 1024 * 1024).expect("create");

        let result = ShmSegment::open(&name, 2 * 1024 * 1024);
        assert!(matches!(
            result,
            Err(DdsError::SegmentSizeMismatch {
                expected,
                actual
            }) if expected == 2 * 1024 * 1024 && actual == 1024 * 1024
        ));

        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_fresh_segment_is_zeroed() {
        let name = unique_name();
        let seg = ShmSegment::open(&name, 1024 * 1024).expect("create");

        // SAFETY: freshly created shm objects are zero-filled by the kernel.
        unsafe {
            assert_eq!(*seg.as_ptr(), 0);
            assert_eq!(*seg.as_ptr().add(4096), 0);
        }

        drop(seg);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_exists_and_unlink_idempotent() {
        let name = unique_name();
        assert!(!ShmSegment::exists(&name));

        let seg = ShmSegment::open(&name, 1024 * 1024).expect("create");
        assert!(ShmSegment::exists(&name));

        drop(seg);
        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(!ShmSegment::exists(&name));
    }

    #[test]
    fn test_sem_guard_serializes() {
        let name = unique_name();
        let seg = ShmSegment::open(&name, 1024 * 1024).expect("create");

        {
            let _g1 = SemGuard::acquire(seg.semaphore()).expect("acquire");
            let mut value: libc::c_int = -1;
            // SAFETY: handle is valid while seg lives.
            unsafe { libc::sem_getvalue(seg.semaphore(), &mut value) };
            assert_eq!(value, 0);
        }

        // Guard dropped, token back
        let mut value: libc::c_int = -1;
        // SAFETY: handle is valid while seg lives.
        unsafe { libc::sem_getvalue(seg.semaphore(), &mut value) };
        assert_eq!(value, 1);

        drop(seg);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_stale_semaphore_recovered() {
        let name = unique_name();
        let seg = ShmSegment::open(&name, 1024 * 1024).expect("create");

        // Simulate a holder that died: take the token and never post.
        // SAFETY: handle is valid while seg lives.
        unsafe { libc::sem_wait(seg.semaphore()) };

        // A fresh attach must detect the stale semaphore and reset it.
        let seg2 = ShmSegment::open(&name, 1024 * 1024).expect("reopen");
        let mut value: libc::c_int = -1;
        // SAFETY: handle is valid while seg2 lives.
        unsafe { libc::sem_getvalue(seg2.semaphore(), &mut value) };
        assert_eq!(value, 1);

        drop(seg2);
        drop(seg);
        ShmSegment::unlink(&name).ok();
    }
}
