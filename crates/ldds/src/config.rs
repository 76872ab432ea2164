// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime configuration and shared-memory layout constants.
//!
//! Every constant that participates in the binary layout of the segment lives
//! here; the rest of the crate must not hardcode them.

use crate::{DdsError, Result};

/// Default segment name in the POSIX shm namespace
pub const DEFAULT_SEGMENT_NAME: &str = "/MB_DDF_SHM";

/// Default segment size (128 MiB)
pub const DEFAULT_SEGMENT_SIZE: usize = 128 * 1024 * 1024;

/// Minimum supported segment size (1 MiB)
pub const MIN_SEGMENT_SIZE: usize = 1024 * 1024;

/// Default per-topic ring size (1 MiB, header and subscriber table included)
pub const DEFAULT_RING_SIZE: usize = 1024 * 1024;

/// Maximum topics per segment
pub const MAX_TOPICS: usize = 128;

/// Maximum subscribers per topic
pub const MAX_SUBSCRIBERS: usize = 64;

/// Message records start at this alignment inside the data region
pub const RECORD_ALIGNMENT: usize = 8;

/// Alignment of registry slots, ring headers and subscriber slots
/// (one cache line, prevents false sharing)
pub const CACHE_LINE: usize = 64;

/// Pack a layout version as `major(8).minor(12).patch(12)`.
#[must_use]
pub const fn pack_version(major: u8, minor: u16, patch: u16) -> u32 {
    ((major as u32) << 24) | (((minor as u32) & 0x0FFF) << 12) | ((patch as u32) & 0x0FFF)
}

/// Major component of a packed layout version
#[must_use]
pub const fn version_major(v: u32) -> u8 {
    (v >> 24) as u8
}

/// Minor component of a packed layout version
#[must_use]
pub const fn version_minor(v: u32) -> u16 {
    ((v >> 12) & 0x0FFF) as u16
}

/// Patch component of a packed layout version
#[must_use]
pub const fn version_patch(v: u32) -> u16 {
    (v & 0x0FFF) as u16
}

/// Current segment layout version.
///
/// Processes with differing versions must not share a segment; the registry
/// rejects the attach (no silent upgrades).
pub const LAYOUT_VERSION: u32 = pack_version(0, 4, 6);

/// Configuration for a [`DdsCore`](crate::DdsCore) context.
///
/// The defaults match the layout constants above; deployments that run
/// several independent buses on one host override `segment_name`.
#[derive(Debug, Clone)]
pub struct DdsConfig {
    /// POSIX shm object name (must start with `/`)
    pub segment_name: String,
    /// Total segment size in bytes; all attaching processes must agree
    pub segment_size: usize,
    /// Ring size used when this process registers a new topic
    pub ring_size: usize,
    /// Compute and verify payload CRCs (default on)
    pub checksum: bool,
    /// Endpoint name prefix; defaults to the process name from `/proc/self/comm`
    pub process_name: Option<String>,
}

impl Default for DdsConfig {
    fn default() -> Self {
        Self {
            segment_name: DEFAULT_SEGMENT_NAME.to_string(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            ring_size: DEFAULT_RING_SIZE,
            checksum: true,
            process_name: None,
        }
    }
}

impl DdsConfig {
    /// Companion semaphore name for this segment
    #[must_use]
    pub fn semaphore_name(&self) -> String {
        semaphore_name(&self.segment_name)
    }

    /// Validate the configuration before any shared state is touched
    pub fn validate(&self) -> Result<()> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(DdsError::SegmentTooSmall {
                size: self.segment_size,
                min: MIN_SEGMENT_SIZE,
            });
        }
        Ok(())
    }
}

/// Semaphore name derived from a segment name (`<segment>_sem`)
#[must_use]
pub fn semaphore_name(segment_name: &str) -> String {
    format!("{segment_name}_sem")
}

/// Recovery file-lock path derived from a semaphore name
#[must_use]
pub fn lock_path(sem_name: &str) -> String {
    format!("/tmp/{}.lock", sem_name.trim_start_matches('/'))
}
