// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber facade and callback worker.
//!
//! A subscriber owns one slot in the ring's subscriber table (a stable index
//! obtained at subscribe time) and a shared cursor stored in that slot.
//! With a callback, a dedicated worker thread drains the ring and blocks on
//! the ring's futex word between messages; without one, the caller polls
//! through [`Subscriber::read_next`] / [`Subscriber::read_latest`].
//!
//! The callback runs on the worker thread, never on the caller's thread;
//! user state captured by the closure must be thread-safe.
//!
//! Shutdown is cooperative: clear the running flag, broadcast on the
//! notification word to kick the worker out of the futex, join, unregister.

use crate::publisher::random_endpoint_id;
use crate::registry::TopicEntry;
use crate::ring::RingBuffer;
use crate::{DdsError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Callback invoked for every delivered message: `(payload, timestamp)`
/// with the record's steady-clock timestamp in nanoseconds.
pub type MessageCallback = Arc<dyn Fn(&[u8], u64) + Send + Sync>;

/// Worker-side receive buffer; larger payloads are truncated on dispatch
const WORKER_BUFFER_SIZE: usize = 64 * 1024;

/// Cursor-based reader over one topic's ring.
pub struct Subscriber {
    topic: TopicEntry,
    ring: Arc<RingBuffer>,
    id: u64,
    name: String,
    slot_index: Option<usize>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Subscriber {
    pub(crate) fn new(topic: TopicEntry, ring: Arc<RingBuffer>, name: &str) -> Self {
        let id = random_endpoint_id();
        let name = if name.is_empty() {
            format!("subscriber_{id}")
        } else {
            name.to_string()
        };
        Self {
            topic,
            ring,
            id,
            name,
            slot_index: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Register with the ring and, if a callback is given, start the worker
    /// thread that dispatches incoming messages.
    pub fn subscribe(&mut self, callback: Option<MessageCallback>) -> Result<()> {
        if self.slot_index.is_some() {
            return Ok(());
        }

        let index = self.ring.register_subscriber(self.id, &self.name)?;
        self.slot_index = Some(index);

        if let Some(callback) = callback {
            self.running.store(true, Ordering::Release);
            let ring = Arc::clone(&self.ring);
            let running = Arc::clone(&self.running);
            let worker_name = self.name.clone();
            self.worker = Some(
                std::thread::Builder::new()
                    .name(format!("ldds-sub-{worker_name}"))
                    .spawn(move || worker_loop(&ring, index, &running, &callback))
                    .map_err(DdsError::WorkerSpawn)?,
            );
        }

        log::debug!("[dds] subscriber {} attached to {}", self.name, self.topic.name);
        Ok(())
    }

    /// Stop the worker, wake it out of any futex wait, join it, and free the
    /// subscriber slot. Idempotent.
    pub fn unsubscribe(&mut self) {
        let Some(index) = self.slot_index.take() else {
            return;
        };

        self.running.store(false, Ordering::Release);
        if self.worker.is_some() {
            // Thundering-herd broadcast; harmless for the other waiters,
            // they re-check their condition and go back to sleep.
            self.ring.notify_subscribers();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        self.ring.unregister_subscriber(index);
        log::debug!("[dds] subscriber {} detached from {}", self.name, self.topic.name);
    }

    /// Whether the subscriber currently owns a ring slot
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.slot_index.is_some()
    }

    /// Read into `buf`: the newest message when `latest`, the next in-order
    /// message otherwise. Returns the byte count (0 = no message).
    pub fn read(&self, buf: &mut [u8], latest: bool) -> usize {
        if latest {
            self.read_latest(buf)
        } else {
            self.read_next(buf)
        }
    }

    /// Read the next in-order message; 0 when none is available.
    pub fn read_next(&self, buf: &mut [u8]) -> usize {
        let Some(index) = self.slot_index else {
            return 0;
        };
        let slot = self.ring.subscriber_slot(index);
        self.ring.read_next(slot, buf).map_or(0, |s| s.len)
    }

    /// Jump to the newest message, dropping any gap; 0 when the ring is
    /// empty.
    pub fn read_latest(&self, buf: &mut [u8]) -> usize {
        let Some(index) = self.slot_index else {
            return 0;
        };
        let slot = self.ring.subscriber_slot(index);
        self.ring.read_latest(slot, buf).map_or(0, |s| s.len)
    }

    /// Messages published but not yet consumed by this subscriber.
    #[must_use]
    pub fn unread_count(&self) -> u64 {
        self.slot_index.map_or(0, |index| {
            self.ring.unread_count(self.ring.subscriber_slot(index))
        })
    }

    /// Block until a new message may be available (0 = indefinitely).
    ///
    /// Returns `false` only on timeout.
    pub fn wait_for_message(&self, timeout_ms: u32) -> bool {
        self.slot_index.map_or(false, |index| {
            self.ring
                .wait_for_message(self.ring.subscriber_slot(index), timeout_ms)
        })
    }

    /// Pin the worker thread to a CPU core.
    ///
    /// Requires an active callback worker; validates the core id against the
    /// number of online CPUs.
    #[cfg(target_os = "linux")]
    pub fn bind_to_cpu(&self, cpu_id: usize) -> Result<()> {
        use std::os::unix::thread::JoinHandleExt;

        // SAFETY: trivial sysconf query.
        let num_cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if num_cpus > 0 && cpu_id >= num_cpus as usize {
            return Err(DdsError::InvalidCpu {
                cpu_id,
                online: num_cpus as usize,
            });
        }

        let Some(worker) = self.worker.as_ref() else {
            return Err(DdsError::NotSubscribed);
        };

        // SAFETY: cpuset is zeroed before use; the pthread handle stays
        // valid while we hold the JoinHandle.
        unsafe {
            let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut cpuset);
            libc::CPU_SET(cpu_id, &mut cpuset);
            let ret = libc::pthread_setaffinity_np(
                worker.as_pthread_t(),
                std::mem::size_of::<libc::cpu_set_t>(),
                &cpuset,
            );
            if ret != 0 {
                return Err(DdsError::CpuAffinity(std::io::Error::from_raw_os_error(ret)));
            }
        }

        log::info!("[dds] subscriber {} worker pinned to CPU {cpu_id}", self.name);
        Ok(())
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

    /// This subscriber's random id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// This subscriber's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Drain the ring, dispatching every in-order message to the callback;
/// block on the ring's futex word when caught up.
fn worker_loop(
    ring: &Arc<RingBuffer>,
    slot_index: usize,
    running: &Arc<AtomicBool>,
    callback: &MessageCallback,
) {
    let mut buf = vec![0u8; WORKER_BUFFER_SIZE];

    while running.load(Ordering::Acquire) {
        let slot = ring.subscriber_slot(slot_index);

        if ring.unread_count(slot) > 0 {
            // Fall back to the newest message when the cursor's record was
            // overwritten (the reader lost the gap anyway).
            let sample = ring
                .read_next(slot, &mut buf)
                .or_else(|| ring.read_latest(slot, &mut buf));
            match sample {
                Some(sample) => callback(&buf[..sample.len], sample.timestamp),
                None => std::thread::yield_now(),
            }
        } else {
            ring.wait_for_message(slot, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RING_METADATA_SIZE;
    use crate::segment::ShmSegment;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/ldds_sub_{ts}")
    }

    fn fixture() -> (Arc<ShmSegment>, Arc<RingBuffer>, TopicEntry, String) {
        let name = unique_name();
        let size = RING_METADATA_SIZE + 16 * 1024;
        let seg = Arc::new(ShmSegment::open(&name, size).expect("segment"));
        let ring =
            Arc::new(RingBuffer::attach(Arc::clone(&seg), 0, size, 1, true).expect("attach"));
        let topic = TopicEntry {
            index: 0,
            id: 1,
            name: "test://sub".to_string(),
            ring_offset: 0,
            ring_size: size,
        };
        (seg, ring, topic, name)
    }

    #[test]
    fn test_default_name_from_id() {
        let (_seg, ring, topic, name) = fixture();
        let sub = Subscriber::new(topic, ring, "");
        assert!(sub.name().starts_with("subscriber_"));
        assert!(!sub.is_subscribed());
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_polling_subscribe_and_read() {
        let (_seg, ring, topic, name) = fixture();

        let mut sub = Subscriber::new(topic, Arc::clone(&ring), "poller");
        sub.subscribe(None).expect("subscribe");
        assert!(sub.is_subscribed());

        ring.publish(b"one").expect("publish");
        ring.publish(b"two").expect("publish");
        assert_eq!(sub.unread_count(), 2);

        let mut buf = [0u8; 64];
        assert_eq!(sub.read_next(&mut buf), 3);
        assert_eq!(&buf[..3], b"one");
        assert_eq!(sub.read(&mut buf, true), 3);
        assert_eq!(&buf[..3], b"two");
        assert_eq!(sub.unread_count(), 0);

        sub.unsubscribe();
        assert!(!sub.is_subscribed());
        assert_eq!(sub.read_next(&mut buf), 0);

        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_callback_worker_delivers() {
        let (_seg, ring, topic, name) = fixture();

        let received = Arc::new(AtomicUsize::new(0));
        let received_cb = Arc::clone(&received);
        let callback: MessageCallback = Arc::new(move |payload, timestamp| {
            assert_eq!(payload, b"event");
            assert!(timestamp > 0);
            received_cb.fetch_add(1, Ordering::SeqCst);
        });

        let mut sub = Subscriber::new(topic, Arc::clone(&ring), "worker");
        sub.subscribe(Some(callback)).expect("subscribe");

        for _ in 0..5 {
            ring.publish(b"event").expect("publish");
        }

        // The worker wakes via futex, no polling deadline needed beyond CI
        // scheduling slack
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while received.load(Ordering::SeqCst) < 5 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(received.load(Ordering::SeqCst), 5);

        // Shutdown joins promptly even though the worker blocks on the futex
        let start = std::time::Instant::now();
        sub.unsubscribe();
        assert!(start.elapsed() < Duration::from_millis(500));

        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (_seg, ring, topic, name) = fixture();

        {
            let mut sub = Subscriber::new(topic, Arc::clone(&ring), "ephemeral");
            sub.subscribe(None).expect("subscribe");
            assert_eq!(ring.statistics().active_subscribers, 1);
        }
        assert_eq!(ring.statistics().active_subscribers, 0);

        ShmSegment::unlink(&name).ok();
    }
}
