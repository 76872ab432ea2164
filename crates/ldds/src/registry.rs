// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic registry - the directory at the segment's head.
//!
//! # Memory Layout
//!
//! ```text
//! +--------------------------------------------------+
//! | RegistryHeader (64 bytes, cache-aligned)         |
//! +--------------------------------------------------+
//! | TopicMetadata[0] (128 bytes, cache-aligned)      |
//! | ...                                              |
//! | TopicMetadata[127]                               |
//! +--------------------------------------------------+
//! | ring arena | ring arena | ...   (data region)    |
//! +--------------------------------------------------+
//! ```
//!
//! The first process to attach zeroes the segment and writes the magic and
//! layout version; later attachers verify both. Registrations are serialized
//! by the segment semaphore and are permanent - there is no topic deletion,
//! a slot stays live for the segment's life.
//!
//! Lookups are lock-free linear scans. A writer publishes a slot by storing
//! its `topic_id` with Release after every other field, so a reader that
//! observes a non-zero id also observes the fully-initialized slot.

use crate::config::{CACHE_LINE, LAYOUT_VERSION, MAX_TOPICS};
use crate::message::align_up;
use crate::ring::MIN_RING_SIZE;
use crate::segment::{SemGuard, ShmSegment};
use crate::{DdsError, Result};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Registry magic, "LDDS"
pub const REGISTRY_MAGIC: u32 = 0x4C44_4453;

/// Fixed-size name fields are 63 bytes + NUL
pub const NAME_CAPACITY: usize = 64;

/// Registry header at segment offset 0.
#[repr(C, align(64))]
pub struct RegistryHeader {
    /// Magic number, absence triggers first-time initialization
    pub magic: AtomicU32,
    /// Layout version, packed `major(8).minor(12).patch(12)`
    pub version: AtomicU32,
    /// Next topic id to hand out; ids are never reused
    pub next_topic_id: AtomicU32,
    /// Number of registered topics, only ever increases
    pub topic_count: AtomicU32,
    /// Padding to fill the cache line
    _pad: [u8; 48],
}

/// One directory slot. `topic_id == 0` means the slot is free.
#[repr(C, align(64))]
pub struct TopicMetadata {
    /// Topic id (0 = empty slot); stored last with Release on registration
    pub topic_id: AtomicU32,
    _pad0: u32,
    /// Byte offset of the topic's ring arena within the segment
    pub ring_offset: AtomicU64,
    /// Ring arena size in bytes (as requested, unaligned)
    pub ring_size: AtomicU64,
    /// NUL-terminated topic name
    pub topic_name: UnsafeCell<[u8; NAME_CAPACITY]>,
}

// SAFETY: all mutable fields are atomics or name cells that are written
// under the segment semaphore and snapshotted with volatile copies.
unsafe impl Sync for TopicMetadata {}

/// Encode a name into a fixed 64-byte NUL-terminated buffer (truncating)
pub(crate) fn encode_name(name: &str) -> [u8; NAME_CAPACITY] {
    let mut buf = [0u8; NAME_CAPACITY];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_CAPACITY - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Decode a fixed NUL-terminated buffer back into a string
pub(crate) fn decode_name(buf: &[u8; NAME_CAPACITY]) -> String {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(NAME_CAPACITY - 1);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Snapshot a shared name cell.
pub(crate) fn load_name(cell: &UnsafeCell<[u8; NAME_CAPACITY]>) -> String {
    // SAFETY: a concurrent writer may race this copy; the volatile read gives
    // a stable local snapshot and decode tolerates any byte content.
    let raw = unsafe { ptr::read_volatile(cell.get()) };
    decode_name(&raw)
}

/// Overwrite a shared name cell (callers hold the segment semaphore).
pub(crate) fn store_name(cell: &UnsafeCell<[u8; NAME_CAPACITY]>, name: &str) {
    // SAFETY: writes to name cells are serialized by the segment semaphore;
    // concurrent readers snapshot via read_volatile.
    unsafe { ptr::write_volatile(cell.get(), encode_name(name)) }
}

/// A copied-out view of one registered topic.
#[derive(Debug, Clone)]
pub struct TopicEntry {
    /// Directory slot index
    pub index: usize,
    /// Topic id (never 0)
    pub id: u32,
    /// Topic name as stored
    pub name: String,
    /// Ring arena offset within the segment
    pub ring_offset: usize,
    /// Ring arena size in bytes
    pub ring_size: usize,
}

/// The topic directory of one shared segment.
pub struct TopicRegistry {
    segment: Arc<ShmSegment>,
}

impl TopicRegistry {
    /// Metadata array offset within the segment
    pub const METADATA_OFFSET: usize = std::mem::size_of::<RegistryHeader>();

    /// Start of the ring-arena data region
    pub const DATA_OFFSET: usize =
        Self::METADATA_OFFSET + MAX_TOPICS * std::mem::size_of::<TopicMetadata>();

    /// Attach to the registry, running first-writer initialization if the
    /// magic is absent.
    ///
    /// # Errors
    ///
    /// Fails on a layout-version mismatch (mixed-version processes must not
    /// share a segment) or if the semaphore cannot be acquired.
    pub fn attach(segment: Arc<ShmSegment>) -> Result<Self> {
        Self::attach_with_version(segment, LAYOUT_VERSION)
    }

    fn attach_with_version(segment: Arc<ShmSegment>, version: u32) -> Result<Self> {
        debug_assert!(segment.size() > Self::DATA_OFFSET);
        let _guard = SemGuard::acquire(segment.semaphore())?;

        let base = segment.as_ptr();
        // SAFETY: the segment is at least DATA_OFFSET bytes and page-aligned,
        // so a RegistryHeader view at offset 0 is in bounds and aligned; we
        // hold the semaphore, so no other process mutates the header.
        let magic = unsafe { (*base.cast::<RegistryHeader>()).magic.load(Ordering::Acquire) };

        if magic != REGISTRY_MAGIC {
            // First writer: wipe whatever was in the object, then publish the
            // header with the magic last.
            // SAFETY: we hold the semaphore; the region is ours to zero, and
            // the header reference is formed only after the wipe.
            let header = unsafe {
                ptr::write_bytes(base, 0, segment.size());
                &*(base.cast::<RegistryHeader>())
            };
            header.version.store(version, Ordering::Release);
            header.next_topic_id.store(1, Ordering::Release);
            header.topic_count.store(0, Ordering::Release);
            header.magic.store(REGISTRY_MAGIC, Ordering::Release);
            log::debug!(
                "[registry] initialized segment {} ({} topic slots)",
                segment.name(),
                MAX_TOPICS
            );
        } else {
            // SAFETY: same bounds as above.
            let header = unsafe { &*(base.cast::<RegistryHeader>()) };
            let found = header.version.load(Ordering::Acquire);
            if found != version {
                return Err(DdsError::VersionMismatch {
                    expected: version,
                    found,
                });
            }
        }

        drop(_guard);
        Ok(Self { segment })
    }

    #[inline]
    fn header(&self) -> &RegistryHeader {
        // SAFETY: validated in attach(); the header lives at offset 0 for the
        // segment's (and thus self's) lifetime.
        unsafe { &*(self.segment.as_ptr().cast::<RegistryHeader>()) }
    }

    #[inline]
    fn slot(&self, index: usize) -> &TopicMetadata {
        debug_assert!(index < MAX_TOPICS);
        // SAFETY: index < MAX_TOPICS and the metadata array is within the
        // segment (DATA_OFFSET <= segment size, checked in attach).
        unsafe {
            &*(self
                .segment
                .as_ptr()
                .add(Self::METADATA_OFFSET)
                .cast::<TopicMetadata>())
            .add(index)
        }
    }

    fn entry_from(&self, index: usize, id: u32) -> TopicEntry {
        let slot = self.slot(index);
        TopicEntry {
            index,
            id,
            name: load_name(&slot.topic_name),
            ring_offset: slot.ring_offset.load(Ordering::Acquire) as usize,
            ring_size: slot.ring_size.load(Ordering::Acquire) as usize,
        }
    }

    /// `<domain>://<address>`, both parts non-empty, at most 63 bytes.
    #[must_use]
    pub fn is_valid_topic_name(name: &str) -> bool {
        if name.is_empty() || name.len() > NAME_CAPACITY - 1 {
            return false;
        }
        match name.find("://") {
            Some(pos) => pos > 0 && pos + 3 < name.len(),
            None => false,
        }
    }

    /// Register a topic, or return the existing entry if the name is already
    /// registered (idempotent across processes).
    ///
    /// The new ring arena is placed after every existing arena, each rounded
    /// up to cache-line alignment.
    pub fn register_topic(&self, name: &str, ring_size: usize) -> Result<TopicEntry> {
        if !Self::is_valid_topic_name(name) {
            return Err(DdsError::InvalidTopicName(name.to_string()));
        }
        if ring_size < MIN_RING_SIZE {
            return Err(DdsError::RingTooSmall {
                size: ring_size,
                min: MIN_RING_SIZE,
            });
        }

        let _guard = SemGuard::acquire(self.segment.semaphore())?;

        if let Some(existing) = self.lookup_by_name(name) {
            log::warn!("[registry] topic already registered: {name}");
            return Ok(existing);
        }

        let header = self.header();
        if header.topic_count.load(Ordering::Acquire) as usize >= MAX_TOPICS {
            return Err(DdsError::TopicCapacity { max: MAX_TOPICS });
        }

        let Some(index) =
            (0..MAX_TOPICS).find(|&i| self.slot(i).topic_id.load(Ordering::Acquire) == 0)
        else {
            return Err(DdsError::TopicCapacity { max: MAX_TOPICS });
        };

        // Arena offset: data region start plus every occupied arena, each
        // rounded up to cache-line alignment. Guard all arithmetic - sizes
        // come from shared memory and are untrusted.
        let mut offset = Self::DATA_OFFSET;
        for i in 0..MAX_TOPICS {
            let slot = self.slot(i);
            if slot.topic_id.load(Ordering::Acquire) != 0 {
                let existing = slot.ring_size.load(Ordering::Acquire) as usize;
                let aligned = existing
                    .checked_add(CACHE_LINE - 1)
                    .map(|v| v & !(CACHE_LINE - 1))
                    .ok_or(DdsError::SegmentExhausted {
                        requested: ring_size,
                        available: 0,
                    })?;
                offset = offset
                    .checked_add(aligned)
                    .ok_or(DdsError::SegmentExhausted {
                        requested: ring_size,
                        available: 0,
                    })?;
            }
        }

        let aligned_size = align_up(ring_size, CACHE_LINE);
        let end = offset
            .checked_add(aligned_size)
            .ok_or(DdsError::SegmentExhausted {
                requested: aligned_size,
                available: 0,
            })?;
        if end > self.segment.size() {
            return Err(DdsError::SegmentExhausted {
                requested: aligned_size,
                available: self.segment.size().saturating_sub(offset),
            });
        }

        let slot = self.slot(index);
        store_name(&slot.topic_name, name);
        slot.ring_offset.store(offset as u64, Ordering::Release);
        slot.ring_size.store(ring_size as u64, Ordering::Release);

        let id = header.next_topic_id.fetch_add(1, Ordering::AcqRel);
        slot.topic_id.store(id, Ordering::Release);
        header.topic_count.fetch_add(1, Ordering::AcqRel);

        log::info!("[registry] registered topic {name} id {id} at offset {offset}");
        Ok(self.entry_from(index, id))
    }

    fn lookup_by_name(&self, name: &str) -> Option<TopicEntry> {
        for i in 0..MAX_TOPICS {
            let slot = self.slot(i);
            let id = slot.topic_id.load(Ordering::Acquire);
            if id != 0 && load_name(&slot.topic_name) == name {
                return Some(self.entry_from(i, id));
            }
        }
        None
    }

    /// Look up a topic by name (lock-free)
    #[must_use]
    pub fn get_topic(&self, name: &str) -> Option<TopicEntry> {
        self.lookup_by_name(name)
    }

    /// Look up a topic by id (lock-free)
    #[must_use]
    pub fn get_topic_by_id(&self, topic_id: u32) -> Option<TopicEntry> {
        for i in 0..MAX_TOPICS {
            let id = self.slot(i).topic_id.load(Ordering::Acquire);
            if id == topic_id && id != 0 {
                return Some(self.entry_from(i, id));
            }
        }
        None
    }

    /// All registered topics, in slot order
    #[must_use]
    pub fn all_topics(&self) -> Vec<TopicEntry> {
        let mut topics = Vec::new();
        for i in 0..MAX_TOPICS {
            let id = self.slot(i).topic_id.load(Ordering::Acquire);
            if id != 0 {
                topics.push(self.entry_from(i, id));
            }
        }
        topics
    }

    /// Current number of registered topics
    #[must_use]
    pub fn topic_count(&self) -> u32 {
        self.header().topic_count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_SEGMENT_SIZE;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/ldds_reg_{ts}")
    }

    fn open_segment(size: usize) -> (Arc<ShmSegment>, String) {
        let name = unique_name();
        let seg = Arc::new(ShmSegment::open(&name, size).expect("segment"));
        (seg, name)
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(std::mem::size_of::<RegistryHeader>(), 64);
        assert_eq!(std::mem::size_of::<TopicMetadata>(), 128);
        assert_eq!(TopicRegistry::METADATA_OFFSET, 64);
        assert_eq!(TopicRegistry::DATA_OFFSET, 64 + 128 * 128);
    }

    #[test]
    fn test_name_codec() {
        let buf = encode_name("cfg://a");
        assert_eq!(decode_name(&buf), "cfg://a");

        // 63 bytes fit, the rest is truncated
        let long = "d://".to_string() + &"x".repeat(80);
        let buf = encode_name(&long);
        assert_eq!(decode_name(&buf).len(), 63);
    }

    #[test]
    fn test_topic_name_grammar() {
        assert!(TopicRegistry::is_valid_topic_name("cfg://a"));
        assert!(TopicRegistry::is_valid_topic_name("sensors://imu/raw"));
        assert!(!TopicRegistry::is_valid_topic_name(""));
        assert!(!TopicRegistry::is_valid_topic_name("no-separator"));
        assert!(!TopicRegistry::is_valid_topic_name("://addr"));
        assert!(!TopicRegistry::is_valid_topic_name("domain://"));
        assert!(!TopicRegistry::is_valid_topic_name(&format!(
            "d://{}",
            "x".repeat(70)
        )));
    }

    #[test]
    fn test_first_attach_initializes() {
        let (seg, name) = open_segment(MIN_SEGMENT_SIZE);
        let reg = TopicRegistry::attach(Arc::clone(&seg)).expect("attach");
        assert_eq!(reg.topic_count(), 0);
        assert!(reg.all_topics().is_empty());

        drop(reg);
        drop(seg);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_second_attach_preserves_topics() {
        let (seg, name) = open_segment(MIN_SEGMENT_SIZE);
        let reg = TopicRegistry::attach(Arc::clone(&seg)).expect("attach");
        let entry = reg.register_topic("cfg://a", MIN_RING_SIZE).expect("register");
        assert_eq!(entry.id, 1);

        let reg2 = TopicRegistry::attach(Arc::clone(&seg)).expect("re-attach");
        assert_eq!(reg2.topic_count(), 1);
        let found = reg2.get_topic("cfg://a").expect("still registered");
        assert_eq!(found.id, entry.id);
        assert_eq!(found.ring_offset, entry.ring_offset);

        drop((reg, reg2, seg));
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let (seg, name) = open_segment(MIN_SEGMENT_SIZE);
        let _reg =
            TopicRegistry::attach_with_version(Arc::clone(&seg), 0x0000_4006).expect("attach");

        let result = TopicRegistry::attach_with_version(Arc::clone(&seg), 0x0000_4007);
        assert!(matches!(
            result,
            Err(DdsError::VersionMismatch {
                expected: 0x0000_4007,
                found: 0x0000_4006,
            })
        ));

        // The failed attach must not have touched the segment
        let reg = TopicRegistry::attach_with_version(Arc::clone(&seg), 0x0000_4006)
            .expect("original version still attaches");
        assert_eq!(reg.topic_count(), 0);

        drop((reg, seg));
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_register_and_lookup() {
        let (seg, name) = open_segment(MIN_SEGMENT_SIZE);
        let reg = TopicRegistry::attach(Arc::clone(&seg)).expect("attach");

        let a = reg.register_topic("cfg://a", MIN_RING_SIZE).expect("a");
        let b = reg.register_topic("cfg://b", MIN_RING_SIZE).expect("b");
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.ring_offset, TopicRegistry::DATA_OFFSET);
        assert!(b.ring_offset >= a.ring_offset + MIN_RING_SIZE);

        assert_eq!(reg.get_topic("cfg://a").unwrap().id, 1);
        assert_eq!(reg.get_topic_by_id(2).unwrap().name, "cfg://b");
        assert!(reg.get_topic("cfg://missing").is_none());
        assert_eq!(reg.all_topics().len(), 2);

        drop((reg, seg));
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_duplicate_register_is_idempotent() {
        let (seg, name) = open_segment(MIN_SEGMENT_SIZE);
        let reg = TopicRegistry::attach(Arc::clone(&seg)).expect("attach");

        let first = reg.register_topic("cfg://dup", MIN_RING_SIZE).expect("first");
        let second = reg
            .register_topic("cfg://dup", 2 * MIN_RING_SIZE)
            .expect("second");
        assert_eq!(first.id, second.id);
        assert_eq!(first.ring_offset, second.ring_offset);
        assert_eq!(first.ring_size, second.ring_size);
        assert_eq!(reg.topic_count(), 1);

        drop((reg, seg));
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_bad_names_rejected() {
        let (seg, name) = open_segment(MIN_SEGMENT_SIZE);
        let reg = TopicRegistry::attach(Arc::clone(&seg)).expect("attach");

        assert!(matches!(
            reg.register_topic("not-a-topic", MIN_RING_SIZE),
            Err(DdsError::InvalidTopicName(_))
        ));
        assert!(matches!(
            reg.register_topic("cfg://a", MIN_RING_SIZE - 1),
            Err(DdsError::RingTooSmall { .. })
        ));

        drop((reg, seg));
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_segment_exhaustion() {
        let (seg, name) = open_segment(MIN_SEGMENT_SIZE);
        let reg = TopicRegistry::attach(Arc::clone(&seg)).expect("attach");

        // One arena larger than the whole segment cannot fit
        let result = reg.register_topic("cfg://huge", 2 * MIN_SEGMENT_SIZE);
        assert!(matches!(result, Err(DdsError::SegmentExhausted { .. })));
        assert_eq!(reg.topic_count(), 0);

        drop((reg, seg));
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_topic_capacity_limit() {
        // 128 minimum-size arenas need ~1.6 MiB plus the directory
        let (seg, name) = open_segment(4 * 1024 * 1024);
        let reg = TopicRegistry::attach(Arc::clone(&seg)).expect("attach");

        for i in 0..MAX_TOPICS {
            reg.register_topic(&format!("cap://t{i}"), MIN_RING_SIZE)
                .unwrap_or_else(|e| panic!("register {i}: {e}"));
        }
        assert_eq!(reg.topic_count() as usize, MAX_TOPICS);

        let result = reg.register_topic("cap://overflow", MIN_RING_SIZE);
        assert!(matches!(result, Err(DdsError::TopicCapacity { .. })));

        drop((reg, seg));
        ShmSegment::unlink(&name).ok();
    }
}
