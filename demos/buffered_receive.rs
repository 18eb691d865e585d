//! # Double-Buffered Capture Example
//!
//! Captures traffic from an in-memory loopback link with two buffers attached
//! to one handle. While the engine fills one buffer, the callback drains the
//! other.
//!
//! ## Features Demonstrated
//! - **Double buffering**: two attached buffers, one filling, one draining
//! - **Batch thresholds**: `min_packets_to_copy` and the receive timeout
//! - **Statistics**: per-handle receive counters and pipeline metrics
//!
//! ## Usage
//! ```bash
//! cargo run --example buffered_receive
//!
//! # Bigger batches, more traffic
//! cargo run --example buffered_receive -- --min-packets 64 --frames 5000
//! ```

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use safer_rawcap::{
    logging, Adapter, Buffer, CaptureConfig, Handle, LoopbackBackend, PacketAccess, Receiver,
    Status,
};

/// Demo settings taken from the command line
#[derive(Debug)]
struct DemoConfig {
    /// Packets per fill cycle before the callback runs
    min_packets: u32,
    /// Frames injected into the link
    frames: usize,
    /// Slots per buffer
    slots: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            min_packets: 16,
            frames: 1000,
            slots: 512,
        }
    }
}

impl DemoConfig {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = DemoConfig::default();

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1);
            match (args[i].as_str(), value) {
                ("--min-packets", Some(v)) => config.min_packets = v.parse().unwrap_or(config.min_packets),
                ("--frames", Some(v)) => config.frames = v.parse().unwrap_or(config.frames),
                ("--slots", Some(v)) => config.slots = v.parse().unwrap_or(config.slots),
                (other, _) => {
                    eprintln!("ignoring argument {other}");
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }
        config
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let demo = DemoConfig::from_args();
    let config = CaptureConfig::development();
    logging::init(&config.logging);

    let backend = Arc::new(LoopbackBackend::new("demo0"));
    let handle = Handle::open_with_config(&Adapter::from_shared(backend.clone()), config)?;
    handle.set_min_packets_to_copy(demo.min_packets)?;
    handle.set_rx_timeout(Duration::from_millis(10))?;

    let receiver = Receiver::new(&handle);
    receiver.attach(&Buffer::new(1514, demo.slots)?)?;
    receiver.attach(&Buffer::new(1514, demo.slots)?)?;

    let delivered = Arc::new(AtomicUsize::new(0));
    let cycles = Arc::new(AtomicUsize::new(0));
    let (delivered_cb, cycles_cb) = (Arc::clone(&delivered), Arc::clone(&cycles));
    receiver.start(
        move |buffer, status| {
            if status != Status::Success {
                return;
            }
            let Ok(access) = buffer.access() else {
                return;
            };
            let bytes: usize = access.iter().map(|p| p.payload_length()).sum();
            delivered_cb.fetch_add(access.count(), Ordering::Relaxed);
            let cycle = cycles_cb.fetch_add(1, Ordering::Relaxed) + 1;
            println!("cycle {cycle:>4}: {:>4} packets, {bytes:>7} bytes", access.count());
        },
        false,
    )?;

    let started = Instant::now();
    for i in 0..demo.frames {
        let length = 60 + (i % 1400);
        backend.inject(vec![(i % 256) as u8; length]);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while delivered.load(Ordering::Relaxed) < demo.frames && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    receiver.stop()?;

    let stats = handle.rx_stats();
    println!();
    println!("captured {} of {} frames in {:?}", stats.captured, demo.frames, started.elapsed());
    println!("fill cycles:  {}", cycles.load(Ordering::Relaxed));
    println!("match rate:   {:.1}%", stats.match_rate_percent());
    println!("drop rate:    {:.1}%", stats.drop_rate_percent());
    if let Some(metrics) = handle.metrics() {
        println!();
        println!("{}", metrics.generate_report());
    }
    Ok(())
}
