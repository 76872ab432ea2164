// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ldds-shm-viewer - Inspect LDDS shared memory segments
//!
//! Opens a segment read-only and renders the registry, per-topic ring state,
//! the registered publisher, and every subscriber cursor.

use clap::Parser;
use colored::*;
use ldds::config::{version_major, version_minor, version_patch, DEFAULT_SEGMENT_NAME};
use ldds::monitor::{DdsMonitor, DdsSnapshot, TopicSnapshot};

/// Inspect LDDS shared memory segments
#[derive(Parser, Debug)]
#[command(name = "ldds-shm-viewer")]
#[command(version = "0.1.0")]
#[command(about = "Inspect LDDS shared memory segments")]
struct Args {
    /// Segment name (POSIX shm namespace)
    #[arg(short, long, default_value = DEFAULT_SEGMENT_NAME)]
    segment: String,

    /// Show per-subscriber cursor details
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Output format: pretty, json
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Show only summary statistics
    #[arg(long)]
    summary: bool,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "json" | "j" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = DdsMonitor::open(&args.segment)?;
    let snapshot = monitor.snapshot()?;

    match args.format {
        OutputFormat::Pretty => {
            if args.summary {
                print_summary(&args.segment, &snapshot);
            } else {
                print_pretty(&args.segment, &snapshot, args.verbose);
            }
        }
        OutputFormat::Json => print_json(&snapshot),
    }

    Ok(())
}

fn print_pretty(segment: &str, snapshot: &DdsSnapshot, verbose: bool) {
    println!();
    println!("{}", format!("=== LDDS Segment {segment} ===").bold());
    println!(
        "  Version: {}.{}.{}  Size: {}  Topics: {}",
        version_major(snapshot.version),
        version_minor(snapshot.version),
        version_patch(snapshot.version),
        format_size(snapshot.segment_size as u64),
        snapshot.topic_count
    );
    println!();

    if snapshot.topics.is_empty() {
        println!("{}", "No topics registered".yellow());
        return;
    }

    for topic in &snapshot.topics {
        print_topic(topic, verbose);
    }

    let total_messages: u64 = snapshot.topics.iter().map(|t| t.current_sequence).sum();
    let total_subscribers: usize = snapshot.topics.iter().map(|t| t.subscribers.len()).sum();
    println!("{}", "--- Summary ---".dimmed());
    println!(
        "  Topics: {}  Messages: {}  Subscribers: {}",
        snapshot.topics.len(),
        total_messages,
        total_subscribers
    );
    println!();
}

fn print_topic(topic: &TopicSnapshot, verbose: bool) {
    let state_badge = if topic.ring_valid {
        "RING".green()
    } else {
        "UNINIT".yellow()
    };

    println!(
        "  {} {} (id {}, {})",
        state_badge,
        topic.name.cyan(),
        topic.id,
        format_size(topic.ring_size as u64)
    );

    if !topic.ring_valid {
        println!();
        return;
    }

    println!(
        "      seq={} write_pos={} free={}",
        topic.current_sequence.to_string().yellow(),
        topic.write_pos,
        format_size(topic.free_space)
    );

    match &topic.publisher {
        Some(publisher) => println!(
            "      publisher: {} (id {:#018x})",
            publisher.name.green(),
            publisher.id
        ),
        None => println!("      publisher: {}", "none".dimmed()),
    }

    if topic.subscribers.is_empty() {
        println!("      subscribers: {}", "none".dimmed());
    } else if verbose {
        println!("      subscribers:");
        for sub in &topic.subscribers {
            let lag_badge = if sub.lag == 0 {
                "up-to-date".green()
            } else {
                format!("lag {}", sub.lag).red()
            };
            println!(
                "        {} (id {:#018x}) last_seq={} [{}]",
                sub.name, sub.id, sub.last_read_sequence, lag_badge
            );
        }
    } else {
        let max_lag = topic.subscribers.iter().map(|s| s.lag).max().unwrap_or(0);
        println!(
            "      subscribers: {} (max lag {})",
            topic.subscribers.len(),
            max_lag
        );
    }

    println!();
}

fn print_summary(segment: &str, snapshot: &DdsSnapshot) {
    let total_messages: u64 = snapshot.topics.iter().map(|t| t.current_sequence).sum();
    let total_subscribers: usize = snapshot.topics.iter().map(|t| t.subscribers.len()).sum();
    let publishers = snapshot
        .topics
        .iter()
        .filter(|t| t.publisher.is_some())
        .count();

    println!(
        "segment={} version={:#010x} topics={} publishers={} subscribers={} messages={}",
        segment, snapshot.version, snapshot.topics.len(), publishers, total_subscribers, total_messages
    );
}

fn print_json(snapshot: &DdsSnapshot) {
    print!(
        "{{\"version\":{},\"segment_size\":{},\"topic_count\":{},\"topics\":[",
        snapshot.version, snapshot.segment_size, snapshot.topic_count
    );

    for (i, topic) in snapshot.topics.iter().enumerate() {
        if i > 0 {
            print!(",");
        }
        print!(
            "{{\"id\":{},\"name\":\"{}\",\"ring_size\":{},\"valid\":{},\"sequence\":{},\"write_pos\":{},\"free_space\":{}",
            topic.id,
            topic.name.replace('"', "\\\""),
            topic.ring_size,
            topic.ring_valid,
            topic.current_sequence,
            topic.write_pos,
            topic.free_space
        );

        if let Some(publisher) = &topic.publisher {
            print!(
                ",\"publisher\":{{\"id\":{},\"name\":\"{}\"}}",
                publisher.id,
                publisher.name.replace('"', "\\\"")
            );
        }

        print!(",\"subscribers\":[");
        for (j, sub) in topic.subscribers.iter().enumerate() {
            if j > 0 {
                print!(",");
            }
            print!(
                "{{\"id\":{},\"name\":\"{}\",\"last_seq\":{},\"lag\":{},\"last_read_ns\":{}}}",
                sub.id,
                sub.name.replace('"', "\\\""),
                sub.last_read_sequence,
                sub.lag,
                sub.last_read_ns
            );
        }
        print!("]}}");
    }

    println!("]}}");
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
