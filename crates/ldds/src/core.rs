// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-process DDS context.
//!
//! [`DdsCore`] is the entry point: it attaches the shared segment, wraps the
//! topic registry, and hands out [`Publisher`] / [`Subscriber`] facades. On
//! each endpoint creation the topic is discovered or registered and an
//! in-process [`RingBuffer`] view is bound to the topic's arena; views are
//! cached per topic id so all endpoints of one process share them.
//!
//! The context is plain owned state - construct it once near `main` and pass
//! it where endpoints are created. Dropping it unmaps the segment; the
//! segment itself persists for the process group's life.

use crate::config::DdsConfig;
use crate::publisher::Publisher;
use crate::registry::{TopicEntry, TopicRegistry};
use crate::ring::RingBuffer;
use crate::segment::ShmSegment;
use crate::subscriber::{MessageCallback, Subscriber};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The per-process DDS context.
pub struct DdsCore {
    config: DdsConfig,
    segment: Arc<ShmSegment>,
    registry: TopicRegistry,
    /// Process-local topic-id -> ring-view map
    rings: Mutex<HashMap<u32, Arc<RingBuffer>>>,
    process_name: String,
}

impl DdsCore {
    /// Attach with the default configuration (segment `/MB_DDF_SHM`,
    /// 128 MiB, 1 MiB rings, checksums on).
    pub fn new() -> Result<Self> {
        Self::with_config(DdsConfig::default())
    }

    /// Attach the segment described by `config`, creating and initializing
    /// it when this process is the first attacher.
    pub fn with_config(config: DdsConfig) -> Result<Self> {
        config.validate()?;

        let segment = Arc::new(ShmSegment::open(&config.segment_name, config.segment_size)?);
        let registry = TopicRegistry::attach(Arc::clone(&segment))?;
        let process_name = config
            .process_name
            .clone()
            .unwrap_or_else(default_process_name);

        log::info!(
            "[dds] attached segment {} ({} bytes) as {process_name}",
            config.segment_name,
            config.segment_size
        );

        Ok(Self {
            config,
            segment,
            registry,
            rings: Mutex::new(HashMap::new()),
            process_name,
        })
    }

    /// Create a publisher on `topic_name`, registering the topic on first
    /// use.
    ///
    /// Fails when the ring already has a publisher under a different name;
    /// a publisher with the same name (a restarted process) re-attaches.
    pub fn create_publisher(&self, topic_name: &str) -> Result<Publisher> {
        let (entry, ring) = self.ring_for(topic_name)?;
        let publisher = Publisher::new(entry, Arc::clone(&ring), &self.process_name);
        ring.set_publisher(publisher.id(), publisher.name())?;
        log::info!(
            "[dds] created publisher {} on {topic_name}",
            publisher.name()
        );
        Ok(publisher)
    }

    /// Alias for [`DdsCore::create_publisher`].
    pub fn create_writer(&self, topic_name: &str) -> Result<Publisher> {
        self.create_publisher(topic_name)
    }

    /// Create a subscriber on `topic_name` and subscribe it.
    ///
    /// With a callback the subscriber spawns a worker thread that blocks on
    /// the ring's futex word and dispatches every in-order message.
    pub fn create_subscriber(
        &self,
        topic_name: &str,
        callback: Option<MessageCallback>,
    ) -> Result<Subscriber> {
        let (entry, ring) = self.ring_for(topic_name)?;
        let mut subscriber = Subscriber::new(entry, ring, &self.process_name);
        subscriber.subscribe(callback)?;
        log::info!(
            "[dds] created subscriber {} on {topic_name}",
            subscriber.name()
        );
        Ok(subscriber)
    }

    /// Alias for [`DdsCore::create_subscriber`].
    pub fn create_reader(
        &self,
        topic_name: &str,
        callback: Option<MessageCallback>,
    ) -> Result<Subscriber> {
        self.create_subscriber(topic_name, callback)
    }

    /// All topics currently registered in the segment.
    #[must_use]
    pub fn topics(&self) -> Vec<TopicEntry> {
        self.registry.all_topics()
    }

    /// The topic registry view.
    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// The underlying segment.
    #[must_use]
    pub fn segment(&self) -> &Arc<ShmSegment> {
        &self.segment
    }

    /// The ring view for a topic, discovering or registering the topic and
    /// caching the view per topic id.
    fn ring_for(&self, topic_name: &str) -> Result<(TopicEntry, Arc<RingBuffer>)> {
        let entry = match self.registry.get_topic(topic_name) {
            Some(entry) => entry,
            // register_topic re-checks under the semaphore, so a racing
            // process registering the same name yields one entry
            None => self
                .registry
                .register_topic(topic_name, self.config.ring_size)?,
        };

        let mut rings = self.rings.lock();
        if let Some(ring) = rings.get(&entry.id) {
            return Ok((entry, Arc::clone(ring)));
        }

        let ring = Arc::new(RingBuffer::attach(
            Arc::clone(&self.segment),
            entry.ring_offset,
            entry.ring_size,
            entry.id,
            self.config.checksum,
        )?);
        rings.insert(entry.id, Arc::clone(&ring));
        Ok((entry, ring))
    }
}

/// The calling process's name per `/proc/self/comm`.
fn default_process_name() -> String {
    std::fs::read_to_string("/proc/self/comm")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
