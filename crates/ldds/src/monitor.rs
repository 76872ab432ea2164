// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-only segment introspection.
//!
//! [`DdsMonitor`] opens an existing segment with `PROT_READ` only - no
//! semaphore, no recovery, no writes - and parses the same layout the core
//! maintains: registry header, topic directory, ring headers and subscriber
//! tables. Everything read is untrusted and bounds-checked; a topic whose
//! stored offsets do not fit the mapping is reported with an empty ring view
//! rather than dereferenced.
//!
//! Liveness is a monitor-time judgement: the snapshot exposes raw
//! steady-clock activity timestamps and leaves staleness thresholds to the
//! consumer.

use crate::config::{MAX_TOPICS, MAX_SUBSCRIBERS};
use crate::registry::{load_name, RegistryHeader, TopicMetadata, TopicRegistry, REGISTRY_MAGIC};
use crate::ring::{RingHeader, SubscriberTable, RING_MAGIC, RING_METADATA_SIZE};
use crate::{DdsError, Result};
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::Ordering;

/// An endpoint identity stored in the segment.
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    /// Random 64-bit endpoint id
    pub id: u64,
    /// Endpoint name
    pub name: String,
}

/// One subscriber's cursor state at snapshot time.
#[derive(Debug, Clone)]
pub struct SubscriberSnapshot {
    /// Random 64-bit subscriber id
    pub id: u64,
    /// Subscriber name
    pub name: String,
    /// Sequence of the last consumed message
    pub last_read_sequence: u64,
    /// Messages published but not yet consumed
    pub lag: u64,
    /// Steady-clock nanoseconds of the last consumption (0 = never)
    pub last_read_ns: u64,
}

/// One topic's state at snapshot time.
#[derive(Debug, Clone)]
pub struct TopicSnapshot {
    /// Topic id
    pub id: u32,
    /// Topic name
    pub name: String,
    /// Ring arena offset within the segment
    pub ring_offset: usize,
    /// Ring arena size in bytes
    pub ring_size: usize,
    /// Whether the arena's ring header carried a valid magic
    pub ring_valid: bool,
    /// Sequence of the newest message (= messages published)
    pub current_sequence: u64,
    /// Next write offset in the data region
    pub write_pos: u64,
    /// Steady-clock nanoseconds of the most recent publish (0 = never)
    pub last_publish_ns: u64,
    /// Bytes between the write position and the end of the data region
    pub free_space: u64,
    /// The registered publisher, if any
    pub publisher: Option<EndpointInfo>,
    /// Registered subscribers
    pub subscribers: Vec<SubscriberSnapshot>,
}

/// A whole-segment snapshot.
#[derive(Debug, Clone)]
pub struct DdsSnapshot {
    /// Stored layout version
    pub version: u32,
    /// Mapped segment size in bytes
    pub segment_size: usize,
    /// Registered topic count per the registry header
    pub topic_count: u32,
    /// Per-topic state
    pub topics: Vec<TopicSnapshot>,
}

/// Read-only view over a live segment.
pub struct DdsMonitor {
    ptr: *const u8,
    size: usize,
    name: String,
}

// SAFETY: the mapping is read-only and all access goes through atomic loads
// or volatile snapshots.
unsafe impl Send for DdsMonitor {}
unsafe impl Sync for DdsMonitor {}

impl DdsMonitor {
    /// Map an existing segment read-only.
    ///
    /// # Errors
    ///
    /// Fails when the segment does not exist, cannot be mapped, or is too
    /// small to hold a registry.
    pub fn open(segment_name: &str) -> Result<Self> {
        let c_name = CString::new(segment_name)
            .map_err(|_| DdsError::InvalidSegmentName(segment_name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; O_RDONLY without
        // O_CREAT never creates anything.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            return Err(DdsError::SegmentOpen(io::Error::last_os_error()));
        }

        let mut sb: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid from shm_open; sb is a writable stat buffer.
        if unsafe { libc::fstat(fd, &mut sb) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and unused after this error path.
            unsafe { libc::close(fd) };
            return Err(DdsError::SegmentOpen(err));
        }
        let size = sb.st_size as usize;
        if size < TopicRegistry::DATA_OFFSET {
            // SAFETY: fd is valid and unused after this error path.
            unsafe { libc::close(fd) };
            return Err(DdsError::SegmentUninitialized);
        }

        // SAFETY: fd is valid and the object is `size` bytes; PROT_READ with
        // MAP_SHARED gives a coherent read-only view.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // SAFETY: fd is valid; the mapping holds its own reference.
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            return Err(DdsError::Mmap(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr as *const u8,
            size,
            name: segment_name.to_string(),
        })
    }

    /// The monitored segment's name
    #[must_use]
    pub fn segment_name(&self) -> &str {
        &self.name
    }

    /// Parse the whole segment into a snapshot.
    ///
    /// # Errors
    ///
    /// Fails when the registry magic is absent (segment never initialized).
    pub fn snapshot(&self) -> Result<DdsSnapshot> {
        // SAFETY: open() verified the mapping holds at least the registry
        // header and directory.
        let header = unsafe { &*(self.ptr.cast::<RegistryHeader>()) };
        if header.magic.load(Ordering::Acquire) != REGISTRY_MAGIC {
            return Err(DdsError::SegmentUninitialized);
        }

        let mut topics = Vec::new();
        for i in 0..MAX_TOPICS {
            // SAFETY: i < MAX_TOPICS and the directory is inside the mapping
            // (checked in open()).
            let slot = unsafe {
                &*(self
                    .ptr
                    .add(TopicRegistry::METADATA_OFFSET)
                    .cast::<TopicMetadata>())
                .add(i)
            };
            let id = slot.topic_id.load(Ordering::Acquire);
            if id == 0 {
                continue;
            }
            topics.push(self.topic_snapshot(id, slot));
        }

        Ok(DdsSnapshot {
            version: header.version.load(Ordering::Acquire),
            segment_size: self.size,
            topic_count: header.topic_count.load(Ordering::Acquire),
            topics,
        })
    }

    fn topic_snapshot(&self, id: u32, slot: &TopicMetadata) -> TopicSnapshot {
        let ring_offset = slot.ring_offset.load(Ordering::Acquire) as usize;
        let ring_size = slot.ring_size.load(Ordering::Acquire) as usize;

        let mut snapshot = TopicSnapshot {
            id,
            name: load_name(&slot.topic_name),
            ring_offset,
            ring_size,
            ring_valid: false,
            current_sequence: 0,
            write_pos: 0,
            last_publish_ns: 0,
            free_space: 0,
            publisher: None,
            subscribers: Vec::new(),
        };

        // Offsets come from shared memory: never dereference before checking
        // them against the mapping.
        let in_bounds = ring_offset
            .checked_add(ring_size)
            .is_some_and(|end| end <= self.size)
            && ring_size >= RING_METADATA_SIZE;
        if !in_bounds {
            return snapshot;
        }

        // SAFETY: [ring_offset, ring_offset+ring_size) is inside the mapping
        // and at least RING_METADATA_SIZE bytes (checked above).
        let ring = unsafe { &*(self.ptr.add(ring_offset).cast::<RingHeader>()) };
        if ring.magic.load(Ordering::Acquire) != RING_MAGIC {
            return snapshot;
        }

        snapshot.ring_valid = true;
        snapshot.current_sequence = ring.current_sequence.load(Ordering::Acquire);
        snapshot.write_pos = ring.write_pos.load(Ordering::Acquire);
        snapshot.last_publish_ns = ring.timestamp.load(Ordering::Acquire);
        snapshot.free_space = ring
            .capacity
            .load(Ordering::Acquire)
            .saturating_sub(snapshot.write_pos);

        let publisher_id = ring.publisher_id.load(Ordering::Acquire);
        if publisher_id != 0 {
            snapshot.publisher = Some(EndpointInfo {
                id: publisher_id,
                name: load_name(&ring.publisher_name),
            });
        }

        // SAFETY: the table follows the ring header inside the checked arena.
        let table = unsafe {
            &*(self
                .ptr
                .add(ring_offset + std::mem::size_of::<RingHeader>())
                .cast::<SubscriberTable>())
        };
        for i in 0..MAX_SUBSCRIBERS {
            let sub = &table.slots[i];
            let sub_id = sub.subscriber_id.load(Ordering::Acquire);
            if sub_id == 0 {
                continue;
            }
            let last_read = sub.last_read_sequence.load(Ordering::Acquire);
            snapshot.subscribers.push(SubscriberSnapshot {
                id: sub_id,
                name: load_name(&sub.subscriber_name),
                last_read_sequence: last_read,
                lag: snapshot.current_sequence.saturating_sub(last_read),
                last_read_ns: sub.timestamp.load(Ordering::Acquire),
            });
        }

        snapshot
    }
}

impl Drop for DdsMonitor {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from the successful mmap in open(); Drop
        // runs once.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DdsConfig, MIN_SEGMENT_SIZE};
    use crate::core::DdsCore;
    use crate::ring::MIN_RING_SIZE;
    use crate::segment::ShmSegment;

    fn unique_config() -> DdsConfig {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        DdsConfig {
            segment_name: format!("/ldds_mon_{ts}"),
            segment_size: MIN_SEGMENT_SIZE,
            ring_size: MIN_RING_SIZE,
            checksum: true,
            process_name: Some("monitor-test".to_string()),
        }
    }

    #[test]
    fn test_open_missing_segment_fails() {
        assert!(DdsMonitor::open("/ldds_mon_does_not_exist").is_err());
    }

    #[test]
    fn test_snapshot_live_segment() {
        let config = unique_config();
        let core = DdsCore::with_config(config.clone()).expect("core");

        let mut publisher = core.create_publisher("mon://a").expect("publisher");
        let sub = core.create_subscriber("mon://a", None).expect("subscriber");
        for _ in 0..3 {
            publisher.publish(b"sample").expect("publish");
        }
        let mut buf = [0u8; 32];
        assert_eq!(sub.read_next(&mut buf), 6);

        let monitor = DdsMonitor::open(&config.segment_name).expect("monitor");
        let snapshot = monitor.snapshot().expect("snapshot");

        assert_eq!(snapshot.version, crate::config::LAYOUT_VERSION);
        assert_eq!(snapshot.topic_count, 1);
        assert_eq!(snapshot.topics.len(), 1);

        let topic = &snapshot.topics[0];
        assert_eq!(topic.name, "mon://a");
        assert!(topic.ring_valid);
        assert_eq!(topic.current_sequence, 3);
        assert!(topic.last_publish_ns > 0);

        let publisher_info = topic.publisher.as_ref().expect("publisher recorded");
        assert_eq!(publisher_info.id, publisher.id());
        assert_eq!(publisher_info.name, "monitor-test");

        assert_eq!(topic.subscribers.len(), 1);
        assert_eq!(topic.subscribers[0].last_read_sequence, 1);
        assert_eq!(topic.subscribers[0].lag, 2);
        assert!(topic.subscribers[0].last_read_ns > 0);

        drop((publisher, sub, core, monitor));
        ShmSegment::unlink(&config.segment_name).ok();
    }

    #[test]
    fn test_uninitialized_segment_rejected() {
        use std::sync::Arc;
        let config = unique_config();
        // A raw segment that no registry ever initialized
        let seg = Arc::new(
            ShmSegment::open(&config.segment_name, MIN_SEGMENT_SIZE).expect("segment"),
        );

        let monitor = DdsMonitor::open(&config.segment_name).expect("open maps fine");
        assert!(matches!(
            monitor.snapshot(),
            Err(DdsError::SegmentUninitialized)
        ));

        drop((monitor, seg));
        ShmSegment::unlink(&config.segment_name).ok();
    }
}
