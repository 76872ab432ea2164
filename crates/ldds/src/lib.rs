// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # LDDS - Shared-Memory Data Distribution Service
//!
//! A lock-free, single-publisher / multi-subscriber inter-process message bus
//! built on a single POSIX shared-memory segment. Independent processes attach
//! to the segment, declare named topics, and exchange messages at memory-copy
//! speed with futex-based wake-up semantics that avoid busy polling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ldds::{DdsConfig, DdsCore, Result};
//!
//! fn main() -> Result<()> {
//!     let core = DdsCore::with_config(DdsConfig::default())?;
//!
//!     let mut publisher = core.create_publisher("sensors://imu")?;
//!     publisher.publish(b"hello")?;
//!
//!     let subscriber = core.create_subscriber("sensors://imu", None)?;
//!     let mut buf = [0u8; 256];
//!     let n = subscriber.read_next(&mut buf);
//!     assert_eq!(&buf[..n], b"hello");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------+                      +------------------+
//! |   Process A      |    Shared Segment    |   Process B      |
//! |    Publisher     |  +----------------+  |   Subscriber     |
//! |        |         |  | Registry       |  |        |         |
//! |        v         |  | Ring arena x N |  |        v         |
//! |   RingBuffer ----+->| head|subs|data |--+-> RingBuffer     |
//! +------------------+  +----------------+  +------------------+
//!                            Futex (wake)
//! ```
//!
//! The segment starts with a topic registry (magic + version header and up to
//! 128 metadata slots), followed by one ring arena per topic. Each arena holds
//! a ring header, a 64-slot subscriber table, and a byte data region where
//! sequence-numbered records are written and eventually overwritten.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DdsCore`] | Per-process context: segment attach, topic lookup, endpoint factory |
//! | [`Publisher`] | Writes records into one topic's ring (at most one per ring) |
//! | [`Subscriber`] | Cursor-based reader, optionally driven by a callback worker thread |
//! | [`RingBuffer`] | Per-topic ring protocol (publish / read / wait / registration) |
//! | [`monitor::DdsMonitor`] | Read-only snapshot over a live segment |
//!
//! ## Guarantees
//!
//! - Per topic, sequences are strictly monotonic starting at 1.
//! - Publishing is lock-free and wait-free with respect to subscribers.
//! - A fast publisher overwrites unread data; slow subscribers detect the
//!   overwrite through record validation and resync with `read_latest`.
//! - All data read from the segment is treated as untrusted and validated
//!   (bounds, magic, CRC) before use.

/// Steady-clock helpers (monotonic nanoseconds).
pub mod clock;
/// Runtime configuration and layout constants.
pub mod config;
/// Per-process DDS context (segment attach, endpoint factory).
pub mod core;
/// Shared (cross-process) futex wait/wake wrappers.
pub mod futex;
/// Message record layout and CRC-32 checksums.
pub mod message;
/// Read-only segment introspection for monitoring tools.
pub mod monitor;
/// Publisher facade and zero-copy reservation.
pub mod publisher;
/// Topic registry (directory at the segment head).
pub mod registry;
/// Per-topic ring buffer protocol.
pub mod ring;
/// POSIX shared-memory segment and named-semaphore management.
pub mod segment;
/// Subscriber facade and callback worker.
pub mod subscriber;

pub use crate::config::DdsConfig;
pub use crate::core::DdsCore;
pub use crate::publisher::Publisher;
pub use crate::registry::{TopicEntry, TopicRegistry};
pub use crate::ring::{ReadSample, RingBuffer, RingStatistics};
pub use crate::segment::ShmSegment;
pub use crate::subscriber::{MessageCallback, Subscriber};

use std::fmt;
use std::io;

/// Errors that can occur in DDS core operations.
#[derive(Debug)]
pub enum DdsError {
    /// Shared memory segment creation failed
    SegmentCreate(io::Error),

    /// Shared memory segment open failed
    SegmentOpen(io::Error),

    /// Memory mapping failed
    Mmap(io::Error),

    /// Named semaphore operation failed
    Semaphore(io::Error),

    /// Segment already exists with a different size
    SegmentSizeMismatch { expected: usize, actual: usize },

    /// Requested segment size below the supported minimum
    SegmentTooSmall { size: usize, min: usize },

    /// Segment name violates POSIX shm naming rules
    InvalidSegmentName(String),

    /// Segment exists but was never initialized by a writer
    SegmentUninitialized,

    /// Topic name does not match `<domain>://<address>`
    InvalidTopicName(String),

    /// Segment layout version differs from ours
    VersionMismatch { expected: u32, found: u32 },

    /// All topic slots are in use
    TopicCapacity { max: usize },

    /// All subscriber slots of the ring are in use
    SubscriberCapacity { max: usize },

    /// Ring allocation would exceed the segment
    SegmentExhausted { requested: usize, available: usize },

    /// Requested ring size cannot hold the ring metadata
    RingTooSmall { size: usize, min: usize },

    /// Payload (plus record header) exceeds ring capacity
    PayloadTooLarge { size: usize, capacity: usize },

    /// A different publisher is already registered on the ring
    PublisherExists { name: String },

    /// Operation requires an active subscription
    NotSubscribed,

    /// Worker thread could not be spawned
    WorkerSpawn(io::Error),

    /// CPU id outside the online range
    InvalidCpu { cpu_id: usize, online: usize },

    /// Setting worker CPU affinity failed
    CpuAffinity(io::Error),
}

impl fmt::Display for DdsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "Shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "Shared memory segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "Memory mapping failed: {e}"),
            Self::Semaphore(e) => write!(f, "Semaphore operation failed: {e}"),
            Self::SegmentSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "Segment already exists with different size: expected {expected}, got {actual}"
                )
            }
            Self::SegmentTooSmall { size, min } => {
                write!(f, "Segment size {size} below minimum {min}")
            }
            Self::InvalidSegmentName(name) => write!(f, "Invalid segment name: {name}"),
            Self::SegmentUninitialized => write!(f, "Segment is not initialized"),
            Self::InvalidTopicName(name) => {
                write!(f, "Invalid topic name (want <domain>://<address>): {name}")
            }
            Self::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Layout version mismatch: expected {expected:#010x}, found {found:#010x}"
                )
            }
            Self::TopicCapacity { max } => write!(f, "Maximum number of topics reached: {max}"),
            Self::SubscriberCapacity { max } => {
                write!(f, "Maximum number of subscribers reached: {max}")
            }
            Self::SegmentExhausted {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Not enough shared memory for ring: requested {requested}, available {available}"
                )
            }
            Self::RingTooSmall { size, min } => {
                write!(f, "Ring size {size} below minimum {min}")
            }
            Self::PayloadTooLarge { size, capacity } => {
                write!(f, "Payload too large: {size} bytes exceeds capacity {capacity}")
            }
            Self::PublisherExists { name } => {
                write!(f, "Ring already has a publisher: {name}")
            }
            Self::NotSubscribed => write!(f, "Subscriber is not subscribed"),
            Self::WorkerSpawn(e) => write!(f, "Failed to spawn worker thread: {e}"),
            Self::InvalidCpu { cpu_id, online } => {
                write!(f, "Invalid CPU id {cpu_id}, online CPUs: 0-{}", online.saturating_sub(1))
            }
            Self::CpuAffinity(e) => write!(f, "Failed to set CPU affinity: {e}"),
        }
    }
}

impl std::error::Error for DdsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e)
            | Self::SegmentOpen(e)
            | Self::Mmap(e)
            | Self::Semaphore(e)
            | Self::WorkerSpawn(e)
            | Self::CpuAffinity(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for DDS operations
pub type Result<T> = std::result::Result<T, DdsError>;
