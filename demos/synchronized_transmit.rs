//! # Synchronized Transmit Example
//!
//! Replays a buffer of packets with their recorded inter-packet gaps, then
//! sends a second buffer as fast as the link takes it.
//!
//! ## Usage
//! ```bash
//! cargo run --example synchronized_transmit
//! cargo run --example synchronized_transmit -- --gap-ms 20 --packets 10
//! ```

use std::env;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use safer_rawcap::{
    logging, Adapter, Buffer, CaptureConfig, Handle, LoopbackBackend, Packet, PacketAccess,
    TimestampMode, Transmitter,
};

fn arg(name: &str, default: u64) -> u64 {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn recorded_buffer(packets: u32, gap_ms: u64) -> safer_rawcap::Result<Buffer> {
    let buffer = Buffer::new(1514, packets)?;
    for i in 0..packets {
        let mut packet = Packet::new(1514)?;
        packet.payload_set(&vec![i as u8; 64])?;
        let offset = Duration::from_millis(u64::from(i) * gap_ms);
        packet
            .timestamp_mut()
            .set_ns(1_000 + offset.as_secs(), offset.subsec_nanos())?;
        buffer.push_back(&packet)?;
    }
    Ok(buffer)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let gap_ms = arg("--gap-ms", 10);
    let packets = arg("--packets", 8) as u32;

    let mut config = CaptureConfig::default();
    config.transmit.timestamp_mode = TimestampMode::SystemHighPrec;
    logging::init(&config.logging);

    let backend = Arc::new(LoopbackBackend::new("demo0"));
    let handle = Handle::open_with_config(&Adapter::from_shared(backend.clone()), config)?;
    let transmitter = Transmitter::new(&handle);

    let (done, completed) = mpsc::channel();
    transmitter.start(move |buffer, status| {
        let _ = done.send((buffer.clone(), status));
    })?;

    let paced = recorded_buffer(packets, gap_ms)?;
    let burst = recorded_buffer(packets, gap_ms)?;

    for (name, buffer, synchronized) in [("paced", &paced, true), ("burst", &burst, false)] {
        let started = Instant::now();
        transmitter.send(buffer, synchronized)?;
        let (buffer, status) = completed.recv_timeout(Duration::from_secs(30))?;
        let elapsed = started.elapsed();

        let access = buffer.access()?;
        let first = access.front().map(|p| p.timestamp().since_epoch());
        let last = access.back().map(|p| p.timestamp().since_epoch());
        let spread = match (first, last) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => Duration::ZERO,
        };
        println!(
            "{name}: {} packets, status {status}, took {elapsed:?}, send stamps span {spread:?}",
            access.count()
        );
    }

    transmitter.stop()?;
    let stats = handle.tx_stats();
    println!(
        "sent {} frames, {} bytes, success rate {:.1}%",
        stats.completed,
        stats.bytes,
        stats.success_rate_percent()
    );
    Ok(())
}
