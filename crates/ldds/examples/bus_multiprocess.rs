// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-Process Bus Example
//!
//! Demonstrates inter-process publish/subscribe over one shared segment.
//!
//! # Usage
//!
//! Terminal 1 (Publisher):
//! ```bash
//! cargo run --example bus_multiprocess -- publish
//! ```
//!
//! Terminal 2 (Subscriber):
//! ```bash
//! cargo run --example bus_multiprocess -- subscribe
//! ```
//!
//! The publisher registers the topic and writes a message every 100 ms; the
//! subscriber blocks on the ring's futex word and prints each message as it
//! arrives. `cleanup` unlinks the demo segment.

use ldds::{DdsConfig, DdsCore, MessageCallback, ShmSegment};
use std::sync::Arc;
use std::time::Duration;

const SEGMENT_NAME: &str = "/ldds_demo_bus";
const TOPIC: &str = "demo://ticker";

fn demo_config() -> DdsConfig {
    DdsConfig {
        segment_name: SEGMENT_NAME.to_string(),
        segment_size: 8 * 1024 * 1024,
        ..DdsConfig::default()
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        println!("Usage: {} <publish|subscribe|cleanup>", args[0]);
        println!();
        println!("  publish   - Register the topic and publish one message per 100 ms");
        println!("  subscribe - Print every message as it arrives");
        println!("  cleanup   - Unlink the demo segment");
        return;
    }

    match args[1].as_str() {
        "publish" => run_publisher(),
        "subscribe" => run_subscriber(),
        "cleanup" => run_cleanup(),
        other => {
            println!("Unknown command: {other}");
            println!("Use 'publish', 'subscribe', or 'cleanup'");
        }
    }
}

fn run_publisher() {
    println!("=== LDDS Publisher ===");
    let core = DdsCore::with_config(demo_config()).expect("attach segment");
    let mut publisher = core.create_publisher(TOPIC).expect("create publisher");
    println!(
        "Publishing on {TOPIC} as {} (id {:#018x})",
        publisher.name(),
        publisher.id()
    );

    for tick in 0u64.. {
        let payload = format!("tick {tick}");
        match publisher.publish(payload.as_bytes()) {
            Ok(sequence) => println!("  published sequence {sequence}: {payload}"),
            Err(e) => {
                eprintln!("publish failed: {e}");
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn run_subscriber() {
    println!("=== LDDS Subscriber ===");
    let core = DdsCore::with_config(demo_config()).expect("attach segment");

    let callback: MessageCallback = Arc::new(|payload, timestamp| {
        println!(
            "  received {} bytes at t={timestamp}ns: {}",
            payload.len(),
            String::from_utf8_lossy(payload)
        );
    });

    let subscriber = core
        .create_subscriber(TOPIC, Some(callback))
        .expect("create subscriber");
    println!(
        "Subscribed to {TOPIC} as {} (id {:#018x}); Ctrl-C to stop",
        subscriber.name(),
        subscriber.id()
    );

    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn run_cleanup() {
    match ShmSegment::unlink(SEGMENT_NAME) {
        Ok(()) => println!("Unlinked {SEGMENT_NAME}"),
        Err(e) => eprintln!("cleanup failed: {e}"),
    }
}
