// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher facade.
//!
//! A thin per-process handle bound to one topic's ring. The ring enforces
//! the single-publisher invariant at registration time
//! ([`crate::ring::RingBuffer::set_publisher`]); the facade only carries
//! identity and delegates.

use crate::registry::TopicEntry;
use crate::ring::{Reservation, RingBuffer};
use crate::Result;
use std::sync::Arc;

/// Draw a process-unique random 64-bit endpoint id (never 0; 0 marks free
/// slots in the shared tables).
pub(crate) fn random_endpoint_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// Writes records into one topic's ring.
///
/// At most one publisher is registered per ring at any instant. Publishing
/// is lock-free; the handle is `Send` but publishing is `&mut self` so a
/// single publisher cannot race itself across threads.
pub struct Publisher {
    topic: TopicEntry,
    ring: Arc<RingBuffer>,
    id: u64,
    name: String,
}

impl Publisher {
    pub(crate) fn new(topic: TopicEntry, ring: Arc<RingBuffer>, name: &str) -> Self {
        let id = random_endpoint_id();
        let name = if name.is_empty() {
            format!("publisher_{id}")
        } else {
            name.to_string()
        };
        Self {
            topic,
            ring,
            id,
            name,
        }
    }

    /// Publish a payload; returns the assigned sequence number.
    pub fn publish(&mut self, payload: &[u8]) -> Result<u64> {
        self.ring.publish(payload)
    }

    /// Alias for [`Publisher::publish`].
    pub fn write(&mut self, payload: &[u8]) -> Result<u64> {
        self.publish(payload)
    }

    /// Reserve a zero-copy slot of up to `max_size` payload bytes.
    ///
    /// Fill the returned token and commit with the actual size, or drop it
    /// to cancel (no sequence is consumed).
    pub fn begin_message(&mut self, max_size: usize) -> Result<Reservation<'_>> {
        self.ring.reserve(max_size)
    }

    /// Zero-copy publish through a fill closure.
    ///
    /// The closure writes into the reserved slot and returns the number of
    /// bytes used; returning 0 cancels. On publish, returns the sequence.
    pub fn publish_fill<F>(&mut self, max_size: usize, fill: F) -> Result<Option<u64>>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let mut reservation = self.ring.reserve(max_size)?;
        let used = fill(reservation.payload());
        if used == 0 {
            reservation.cancel();
            return Ok(None);
        }
        reservation.commit(used).map(Some)
    }

    /// Clear this publisher's registration on the ring, allowing a
    /// differently-named publisher to claim the topic.
    pub fn unregister(&self) {
        self.ring.remove_publisher();
    }

    /// The topic's id
    #[must_use]
    pub fn topic_id(&self) -> u32 {
        self.topic.id
    }

    /// The topic's name
    #[must_use]
    pub fn topic_name(&self) -> &str {
        &self.topic.name
    }

    /// This publisher's random id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// This publisher's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_endpoint_id_nonzero_and_distinct() {
        let a = random_endpoint_id();
        let b = random_endpoint_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        // 64-bit collisions are not a realistic concern
        assert_ne!(a, b);
    }
}
