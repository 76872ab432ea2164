// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-topic ring buffer: the publish/read/notify protocol.
//!
//! # Memory Layout (one arena per topic)
//!
//! ```text
//! +--------------------------------------------------+
//! | RingHeader (128 bytes, cache-aligned)            |
//! +--------------------------------------------------+
//! | SubscriberTable: count + 64 slots (128 B each)   |
//! +--------------------------------------------------+
//! | data region (sequence-numbered records)          |
//! +--------------------------------------------------+
//! ```
//!
//! # Publication Protocol (single publisher per ring)
//!
//! 1. Place the record at `write_pos % capacity`; if it would cross the
//!    capacity boundary, wrap to offset 0 instead (records never straddle)
//! 2. Copy the payload, then build the header in place: magic, sequence from
//!    `current_sequence.fetch_add + 1`, steady timestamp, size, CRC
//! 3. Release-store `current_sequence`, `write_pos`, `timestamp`
//! 4. Release fence, bump `notification_count`, futex-wake all waiters
//!
//! There is no backpressure: a fast publisher overwrites old records in
//! place. Subscribers detect the overwrite because validation (magic, bounds,
//! CRC, sequence re-check) fails on their next read, and resync with
//! [`RingBuffer::read_latest`].
//!
//! Reads walk the data region in 8-byte steps from the subscriber's cursor,
//! bounded to one pass of `capacity` bytes. Everything read from the region
//! is copied out and validated before use - records are untrusted input.

use crate::clock::steady_nanos;
use crate::config::{MAX_SUBSCRIBERS, RECORD_ALIGNMENT};
use crate::futex::{futex_wake_all, futex_wait, WaitOutcome};
use crate::message::{self, align_up, record_size, MessageHeader, HEADER_SIZE, MESSAGE_MAGIC};
use crate::registry::{load_name, store_name, NAME_CAPACITY};
use crate::segment::{SemGuard, ShmSegment};
use crate::{DdsError, Result};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ring header magic, "RING"
pub const RING_MAGIC: u32 = 0x5249_4E47;

/// Ring header at the arena base.
///
/// `capacity` and `data_offset` are written once by the first attacher and
/// immutable afterwards; the counters are the publisher's commit surface.
#[repr(C, align(64))]
pub struct RingHeader {
    /// Byte offset into the data region for the next record
    pub write_pos: AtomicU64,
    /// Sequence of the most recently published message (0 = none yet)
    pub current_sequence: AtomicU64,
    /// Generation counter bumped on every publish; the futex wake word
    pub notification_count: AtomicU32,
    _pad0: u32,
    /// Steady-clock nanoseconds of the most recent publish
    pub timestamp: AtomicU64,
    /// Data region capacity in bytes
    pub capacity: AtomicU64,
    /// Data region offset from the arena base
    pub data_offset: AtomicU64,
    /// Magic number; absence triggers first-attacher initialization
    pub magic: AtomicU32,
    _pad1: u32,
    /// The single registered publisher (0 = none)
    pub publisher_id: AtomicU64,
    /// NUL-terminated publisher name
    pub publisher_name: UnsafeCell<[u8; NAME_CAPACITY]>,
}

// SAFETY: every mutable field is an atomic or a name cell mutated only under
// the segment semaphore and snapshotted with volatile copies.
unsafe impl Sync for RingHeader {}

/// One subscriber's shared cursor. `subscriber_id == 0` means the slot is
/// free.
#[repr(C, align(64))]
pub struct SubscriberSlot {
    /// Byte offset of the last successfully consumed record
    pub read_pos: AtomicU64,
    /// Sequence of the last consumed message (0 = nothing yet)
    pub last_read_sequence: AtomicU64,
    /// Steady-clock nanoseconds of the last consumption (liveness signal)
    pub timestamp: AtomicU64,
    /// Random 64-bit id assigned at subscribe time (0 = free slot)
    pub subscriber_id: AtomicU64,
    /// NUL-terminated subscriber name
    pub subscriber_name: UnsafeCell<[u8; NAME_CAPACITY]>,
}

// SAFETY: same reasoning as RingHeader.
unsafe impl Sync for SubscriberSlot {}

/// The ring's subscriber directory.
#[repr(C, align(64))]
pub struct SubscriberTable {
    /// Number of registered subscribers
    pub count: AtomicU32,
    _pad: [u8; 60],
    /// Fixed slot array
    pub slots: [SubscriberSlot; MAX_SUBSCRIBERS],
}

/// Bytes of arena metadata preceding the data region
pub const RING_METADATA_SIZE: usize =
    std::mem::size_of::<RingHeader>() + std::mem::size_of::<SubscriberTable>();

/// Smallest useful arena: metadata plus one page of data
pub const MIN_RING_SIZE: usize = RING_METADATA_SIZE + 4096;

/// A successfully consumed message.
#[derive(Debug, Clone, Copy)]
pub struct ReadSample {
    /// Bytes copied into the caller's buffer (payload truncated if smaller)
    pub len: usize,
    /// The record's sequence number
    pub sequence: u64,
    /// The record's publish timestamp (steady-clock ns)
    pub timestamp: u64,
}

/// Read-only snapshot of one ring's state.
#[derive(Debug, Clone)]
pub struct RingStatistics {
    /// Messages published over the ring's lifetime
    pub total_messages: u64,
    /// Sequence of the newest message
    pub current_sequence: u64,
    /// Bytes between the write position and the end of the data region
    pub available_space: usize,
    /// Number of live subscriber slots
    pub active_subscribers: u32,
    /// Live subscribers as (id, name)
    pub subscribers: Vec<(u64, String)>,
}

/// In-process view of one topic's ring arena.
///
/// Cheap to construct; all durable state lives in the shared segment. The
/// view is bound to a topic id and a checksum policy at construction.
pub struct RingBuffer {
    segment: Arc<ShmSegment>,
    /// Arena base offset within the segment
    offset: usize,
    /// Data region capacity (8-byte aligned)
    capacity: usize,
    topic_id: u32,
    checksum: bool,
}

impl RingBuffer {
    /// Attach to the arena at `offset`, initializing the header and the
    /// subscriber table if this process is the first attacher.
    ///
    /// Attachment itself needs no lock: first-attacher initialization writes
    /// deterministic values into a zeroed arena and publishes the magic last,
    /// so a racing attacher either sees the magic or writes the same bytes.
    pub fn attach(
        segment: Arc<ShmSegment>,
        offset: usize,
        size: usize,
        topic_id: u32,
        checksum: bool,
    ) -> Result<Self> {
        if size < MIN_RING_SIZE {
            return Err(DdsError::RingTooSmall {
                size,
                min: MIN_RING_SIZE,
            });
        }
        let end = offset
            .checked_add(size)
            .ok_or(DdsError::SegmentExhausted {
                requested: size,
                available: 0,
            })?;
        if end > segment.size() {
            return Err(DdsError::SegmentExhausted {
                requested: size,
                available: segment.size().saturating_sub(offset),
            });
        }

        let capacity = (size - RING_METADATA_SIZE) & !(RECORD_ALIGNMENT - 1);
        let ring = Self {
            segment,
            offset,
            capacity,
            topic_id,
            checksum,
        };

        let header = ring.header();
        if header.magic.load(Ordering::Acquire) != RING_MAGIC {
            // Counters and the subscriber table are already zero (the
            // registry zeroes the segment before any arena is handed out).
            header.capacity.store(capacity as u64, Ordering::Release);
            header
                .data_offset
                .store(RING_METADATA_SIZE as u64, Ordering::Release);
            header.magic.store(RING_MAGIC, Ordering::Release);
            log::debug!(
                "[ring] initialized arena at offset {offset}, data capacity {capacity}"
            );
        } else {
            let stored = header.capacity.load(Ordering::Acquire) as usize;
            if stored != capacity {
                log::warn!(
                    "[ring] arena at offset {offset}: stored capacity {stored} != computed {capacity}"
                );
            }
        }

        Ok(ring)
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: attach() verified [offset, offset+size) is inside the
        // mapping; the arena base is cache-line aligned by the registry.
        unsafe { &*(self.segment.as_ptr().add(self.offset).cast::<RingHeader>()) }
    }

    #[inline]
    fn table(&self) -> &SubscriberTable {
        // SAFETY: the table follows the header inside the checked arena.
        unsafe {
            &*(self
                .segment
                .as_ptr()
                .add(self.offset + std::mem::size_of::<RingHeader>())
                .cast::<SubscriberTable>())
        }
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: the data region follows the metadata inside the checked
        // arena.
        unsafe { self.segment.as_ptr().add(self.offset + RING_METADATA_SIZE) }
    }

    /// The topic this ring belongs to
    #[must_use]
    pub fn topic_id(&self) -> u32 {
        self.topic_id
    }

    /// Data region capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence of the newest published message (0 = nothing published)
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.header().current_sequence.load(Ordering::Acquire)
    }

    /// True until the first publish
    #[must_use]
    pub fn empty(&self) -> bool {
        self.current_sequence() == 0
    }

    /// Total messages published so far
    #[must_use]
    pub fn available_data(&self) -> u64 {
        self.current_sequence()
    }

    /// Writable space; the ring overwrites, so this is always the capacity
    #[must_use]
    pub fn available_space(&self) -> usize {
        self.capacity
    }

    // ------------------------------------------------------------------
    // Publish side
    // ------------------------------------------------------------------

    /// Where a record of `total` bytes starts: the current write position,
    /// or 0 when the record would cross the capacity boundary.
    fn slot_start(&self, total: usize) -> usize {
        let pos = (self.header().write_pos.load(Ordering::Acquire) as usize) % self.capacity;
        if pos + total > self.capacity {
            0
        } else {
            pos
        }
    }

    /// Publish a payload. Returns the assigned sequence number.
    ///
    /// Lock-free and wait-free with respect to subscribers; there is no
    /// backpressure, old records are overwritten.
    pub fn publish(&self, payload: &[u8]) -> Result<u64> {
        let total = record_size(payload.len());
        if total > self.capacity {
            return Err(DdsError::PayloadTooLarge {
                size: payload.len(),
                capacity: self.capacity,
            });
        }

        let start = self.slot_start(total);
        // SAFETY: [start+HEADER_SIZE, start+total) is inside the data region
        // (slot_start guarantees start+total <= capacity) and only this
        // single publisher writes there.
        unsafe {
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.data_ptr().add(start + HEADER_SIZE),
                payload.len(),
            );
        }

        Ok(self.commit_record(start, payload.len()))
    }

    /// Reserve a writable slot for a zero-copy publish.
    ///
    /// The reservation consumes no sequence number until committed; dropping
    /// it cancels.
    pub fn reserve(&self, max_size: usize) -> Result<Reservation<'_>> {
        let total = record_size(max_size);
        if total > self.capacity {
            return Err(DdsError::PayloadTooLarge {
                size: max_size,
                capacity: self.capacity,
            });
        }
        let start = self.slot_start(total);
        Ok(Reservation {
            ring: self,
            start,
            max_size,
        })
    }

    /// Stamp the record header over an already-written payload and make the
    /// record visible to subscribers.
    fn commit_record(&self, start: usize, len: usize) -> u64 {
        let header = self.header();
        let sequence = header.current_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let now = steady_nanos();

        let checksum = if self.checksum && len > 0 {
            // SAFETY: the payload was just written by this publisher at
            // [start+HEADER_SIZE, +len) inside the data region.
            let payload =
                unsafe { std::slice::from_raw_parts(self.data_ptr().add(start + HEADER_SIZE), len) };
            message::checksum(payload)
        } else {
            0
        };

        let record = MessageHeader {
            magic: MESSAGE_MAGIC,
            topic_id: self.topic_id,
            sequence,
            timestamp: now,
            data_size: len as u32,
            checksum,
        };
        // SAFETY: start is 8-aligned and the whole record fits the data
        // region (checked before the payload copy).
        unsafe {
            ptr::write_volatile(self.data_ptr().add(start).cast::<MessageHeader>(), record);
        }

        let total = record_size(len);
        let mut new_pos = align_up((start + total) % self.capacity, RECORD_ALIGNMENT);
        if new_pos >= self.capacity {
            new_pos = 0;
        }

        header.current_sequence.store(sequence, Ordering::Release);
        header.write_pos.store(new_pos as u64, Ordering::Release);
        header.timestamp.store(now, Ordering::Release);

        // Everything above must be visible before the wake word moves.
        fence(Ordering::Release);
        self.notify_subscribers();

        log::debug!("[ring] published sequence {sequence} ({len} bytes)");
        sequence
    }

    /// Bump the notification word and wake every futex waiter.
    pub fn notify_subscribers(&self) {
        let header = self.header();
        header.notification_count.fetch_add(1, Ordering::AcqRel);
        futex_wake_all(&header.notification_count);
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    /// Copy and validate the record header at `pos`, treating the bytes as
    /// untrusted (the publisher may be overwriting them right now).
    fn record_header_at(&self, pos: usize) -> Option<MessageHeader> {
        if pos >= self.capacity || pos + HEADER_SIZE > self.capacity {
            return None;
        }
        // SAFETY: bounds checked above, pos is 8-aligned; the volatile read
        // yields a stable local copy regardless of concurrent writes.
        let header =
            unsafe { ptr::read_volatile(self.data_ptr().add(pos).cast::<MessageHeader>()) };
        if !header.is_valid() {
            return None;
        }
        let size = header.data_size as usize;
        if size > self.capacity || pos + record_size(size) > self.capacity {
            return None;
        }
        Some(header)
    }

    /// Copy the payload at `pos` into `buf` (truncating) and re-validate the
    /// record afterwards to catch a concurrent overwrite.
    fn copy_record(&self, pos: usize, rec: &MessageHeader, buf: &mut [u8]) -> Option<usize> {
        let size = rec.data_size as usize;
        let n = size.min(buf.len());
        // SAFETY: record_header_at() bounds-checked the record; n <= size
        // keeps the copy within the payload, n <= buf.len() within buf.
        unsafe {
            ptr::copy_nonoverlapping(
                self.data_ptr().add(pos + HEADER_SIZE).cast_const(),
                buf.as_mut_ptr(),
                n,
            );
        }

        // The publisher may have lapped us mid-copy; a changed header means
        // the payload bytes cannot be trusted.
        // SAFETY: same bounds as record_header_at().
        let reread =
            unsafe { ptr::read_volatile(self.data_ptr().add(pos).cast::<MessageHeader>()) };
        if !reread.is_valid() || reread.sequence != rec.sequence {
            return None;
        }

        if self.checksum && size > 0 && n == size && message::checksum(&buf[..n]) != rec.checksum {
            return None;
        }
        Some(n)
    }

    /// Advance a scan position by `by` bytes, wrapping and re-aligning.
    fn step(&self, pos: usize, by: usize) -> usize {
        let next = align_up((pos + by) % self.capacity, RECORD_ALIGNMENT);
        if next >= self.capacity {
            0
        } else {
            next
        }
    }

    /// Read the message whose sequence equals `expected`, updating the
    /// subscriber cursor on success.
    ///
    /// Walks the data region from the cursor in alignment steps, validating
    /// every candidate; bounded to one pass of `capacity` bytes. Returns
    /// `None` when the message is not (or no longer) available.
    pub fn read_expected(
        &self,
        slot: &SubscriberSlot,
        expected: u64,
        buf: &mut [u8],
    ) -> Option<ReadSample> {
        let current = self.header().current_sequence.load(Ordering::Acquire);
        if expected == 0 || expected > current {
            return None;
        }

        // The cursor comes from shared memory: clamp and re-align.
        let mut pos =
            ((slot.read_pos.load(Ordering::Acquire) as usize) % self.capacity) & !(RECORD_ALIGNMENT - 1);
        let mut remaining = self.capacity;

        while remaining > 0 {
            match self.record_header_at(pos) {
                Some(rec) if rec.sequence == expected => {
                    if let Some(len) = self.copy_record(pos, &rec, buf) {
                        slot.read_pos.store(pos as u64, Ordering::Release);
                        slot.last_read_sequence.store(rec.sequence, Ordering::Release);
                        slot.timestamp.store(rec.timestamp, Ordering::Release);
                        return Some(ReadSample {
                            len,
                            sequence: rec.sequence,
                            timestamp: rec.timestamp,
                        });
                    }
                    // Overwritten under us; step past and keep scanning
                    pos = self.step(pos, RECORD_ALIGNMENT);
                    remaining = remaining.saturating_sub(RECORD_ALIGNMENT);
                }
                Some(rec) => {
                    // Valid record, wrong sequence: skip the whole record
                    let skip = record_size(rec.data_size as usize);
                    pos = self.step(pos, skip);
                    remaining = remaining.saturating_sub(skip);
                }
                None => {
                    pos = self.step(pos, RECORD_ALIGNMENT);
                    remaining = remaining.saturating_sub(RECORD_ALIGNMENT);
                }
            }
        }

        None
    }

    /// Read the next in-order message for this subscriber.
    pub fn read_next(&self, slot: &SubscriberSlot, buf: &mut [u8]) -> Option<ReadSample> {
        let expected = slot.last_read_sequence.load(Ordering::Acquire) + 1;
        self.read_expected(slot, expected, buf)
    }

    /// Jump the subscriber to the newest message, dropping any gap.
    pub fn read_latest(&self, slot: &SubscriberSlot, buf: &mut [u8]) -> Option<ReadSample> {
        let latest = self.header().current_sequence.load(Ordering::Acquire);
        self.read_expected(slot, latest, buf)
    }

    /// Messages published but not yet consumed by this subscriber.
    #[must_use]
    pub fn unread_count(&self, slot: &SubscriberSlot) -> u64 {
        let current = self.header().current_sequence.load(Ordering::Acquire);
        current.saturating_sub(slot.last_read_sequence.load(Ordering::Acquire))
    }

    /// Block until a message newer than the subscriber's cursor may exist.
    ///
    /// Snapshots the notification word, re-checks the sequence condition,
    /// then futex-waits on the snapshot. `timeout_ms == 0` blocks
    /// indefinitely. Returns `false` only on timeout; any wake-up (including
    /// a stale snapshot) returns `true` and the caller re-checks by reading.
    pub fn wait_for_message(&self, slot: &SubscriberSlot, timeout_ms: u32) -> bool {
        let header = self.header();
        let snapshot = header.notification_count.load(Ordering::Acquire);

        let expected = slot.last_read_sequence.load(Ordering::Acquire) + 1;
        if header.current_sequence.load(Ordering::Acquire) >= expected {
            return true;
        }

        let timeout = (timeout_ms > 0).then(|| Duration::from_millis(u64::from(timeout_ms)));
        match futex_wait(&header.notification_count, snapshot, timeout) {
            WaitOutcome::TimedOut => false,
            WaitOutcome::Woken | WaitOutcome::ValueChanged => true,
        }
    }

    // ------------------------------------------------------------------
    // Registration (serialized by the segment semaphore)
    // ------------------------------------------------------------------

    /// Register this ring's single publisher.
    ///
    /// A second registration succeeds only when the name matches (a restarted
    /// publisher re-attaching); otherwise it fails without mutating the ring.
    pub fn set_publisher(&self, id: u64, name: &str) -> Result<()> {
        let _guard = SemGuard::acquire(self.segment.semaphore())?;
        let header = self.header();

        if header.publisher_id.load(Ordering::Acquire) != 0 {
            let existing = load_name(&header.publisher_name);
            if existing == name {
                header.publisher_id.store(id, Ordering::Release);
                log::info!("[ring] publisher {name} re-attached with id {id}");
                return Ok(());
            }
            return Err(DdsError::PublisherExists { name: existing });
        }

        store_name(&header.publisher_name, name);
        header.publisher_id.store(id, Ordering::Release);
        log::info!("[ring] publisher {name} registered with id {id}");
        Ok(())
    }

    /// Clear the ring's publisher registration.
    pub fn remove_publisher(&self) {
        let Ok(_guard) = SemGuard::acquire(self.segment.semaphore()) else {
            log::error!("[ring] remove_publisher: semaphore unavailable");
            return;
        };
        let header = self.header();
        header.publisher_id.store(0, Ordering::Release);
        store_name(&header.publisher_name, "");
    }

    /// Register a subscriber and return its slot index.
    ///
    /// Idempotent for a known id; a known name with a new id rebinds the id
    /// in place (a restarted subscriber reclaiming its cursor).
    pub fn register_subscriber(&self, id: u64, name: &str) -> Result<usize> {
        let _guard = SemGuard::acquire(self.segment.semaphore())?;
        let table = self.table();

        for (i, slot) in table.slots.iter().enumerate() {
            if slot.subscriber_id.load(Ordering::Acquire) == id {
                return Ok(i);
            }
        }

        for (i, slot) in table.slots.iter().enumerate() {
            if slot.subscriber_id.load(Ordering::Acquire) != 0
                && load_name(&slot.subscriber_name) == name
            {
                slot.subscriber_id.store(id, Ordering::Release);
                log::info!("[ring] subscriber {name} rebound to id {id}");
                return Ok(i);
            }
        }

        let Some(index) = table
            .slots
            .iter()
            .position(|s| s.subscriber_id.load(Ordering::Acquire) == 0)
        else {
            return Err(DdsError::SubscriberCapacity {
                max: MAX_SUBSCRIBERS,
            });
        };

        let slot = &table.slots[index];
        store_name(&slot.subscriber_name, name);
        slot.read_pos.store(0, Ordering::Release);
        slot.last_read_sequence.store(0, Ordering::Release);
        slot.timestamp.store(0, Ordering::Release);
        slot.subscriber_id.store(id, Ordering::Release);
        table.count.fetch_add(1, Ordering::AcqRel);

        log::debug!("[ring] subscriber {name} registered with id {id} in slot {index}");
        Ok(index)
    }

    /// Free a subscriber slot.
    pub fn unregister_subscriber(&self, index: usize) {
        if index >= MAX_SUBSCRIBERS {
            return;
        }
        let Ok(_guard) = SemGuard::acquire(self.segment.semaphore()) else {
            log::error!("[ring] unregister_subscriber: semaphore unavailable");
            return;
        };
        let table = self.table();
        let slot = &table.slots[index];
        if slot.subscriber_id.load(Ordering::Acquire) == 0 {
            return;
        }

        slot.subscriber_id.store(0, Ordering::Release);
        store_name(&slot.subscriber_name, "");
        slot.read_pos.store(0, Ordering::Release);
        slot.last_read_sequence.store(0, Ordering::Release);
        slot.timestamp.store(0, Ordering::Release);

        let count = table.count.load(Ordering::Acquire);
        table.count.store(count.saturating_sub(1), Ordering::Release);
    }

    /// Shared cursor for a registered subscriber slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range (indices come from
    /// [`RingBuffer::register_subscriber`]).
    #[must_use]
    pub fn subscriber_slot(&self, index: usize) -> &SubscriberSlot {
        assert!(index < MAX_SUBSCRIBERS);
        &self.table().slots[index]
    }

    /// Lock-free statistics snapshot.
    #[must_use]
    pub fn statistics(&self) -> RingStatistics {
        let header = self.header();
        let current_sequence = header.current_sequence.load(Ordering::Acquire);
        let write_pos = header.write_pos.load(Ordering::Acquire) as usize;

        let mut subscribers = Vec::new();
        for slot in &self.table().slots {
            let id = slot.subscriber_id.load(Ordering::Acquire);
            if id != 0 {
                subscribers.push((id, load_name(&slot.subscriber_name)));
            }
        }

        RingStatistics {
            total_messages: current_sequence,
            current_sequence,
            available_space: self.capacity.saturating_sub(write_pos),
            active_subscribers: subscribers.len() as u32,
            subscribers,
        }
    }
}

/// A reserved, writable slot for a zero-copy publish.
///
/// Fill [`Reservation::payload`] and [`Reservation::commit`] with the actual
/// byte count, or drop the reservation to cancel (no sequence is consumed,
/// no notification is sent).
pub struct Reservation<'a> {
    ring: &'a RingBuffer,
    start: usize,
    max_size: usize,
}

impl Reservation<'_> {
    /// The writable payload region.
    pub fn payload(&mut self) -> &mut [u8] {
        // SAFETY: [start+HEADER_SIZE, +max_size) lies inside the data region
        // (checked in reserve()) and belongs to the single publisher until
        // commit; readers validate before trusting any bytes there.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.ring.data_ptr().add(self.start + HEADER_SIZE),
                self.max_size,
            )
        }
    }

    /// Maximum payload bytes this reservation can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Publish the first `used` bytes of the reserved region.
    pub fn commit(self, used: usize) -> Result<u64> {
        if used > self.max_size {
            return Err(DdsError::PayloadTooLarge {
                size: used,
                capacity: self.max_size,
            });
        }
        Ok(self.ring.commit_record(self.start, used))
    }

    /// Abandon the reservation (equivalent to dropping it).
    pub fn cancel(self) {}
}
