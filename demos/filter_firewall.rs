//! # Byte-Mask Filter Example
//!
//! Drops everything except UDP traffic to one port, the way a tiny firewall
//! would. Frames rejected by the filter go on to the host stack; frames it
//! keeps are captured and, with indication disabled, withheld from the stack.
//!
//! ## Usage
//! ```bash
//! cargo run --example filter_firewall
//! cargo run --example filter_firewall -- --port 53
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use safer_rawcap::{
    logging, Adapter, CaptureConfig, Filter, FilterType, Handle, LoopbackBackend, Packet,
    PacketAccess, Status,
};

const ETHERTYPE_OFFSET: usize = 12;
const IP_PROTOCOL_OFFSET: usize = 23;
const UDP_DEST_PORT_OFFSET: usize = 36;
const UDP: u8 = 17;
const TCP: u8 = 6;

fn port_arg() -> u16 {
    let args: Vec<String> = env::args().collect();
    args.windows(2)
        .find(|pair| pair[0] == "--port")
        .and_then(|pair| pair[1].parse().ok())
        .unwrap_or(1900)
}

/// Minimal Ethernet + IPv4 + L4 header with the given protocol and port.
fn frame(protocol: u8, dest_port: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 64];
    frame[ETHERTYPE_OFFSET..ETHERTYPE_OFFSET + 2].copy_from_slice(&[0x08, 0x00]);
    frame[14] = 0x45;
    frame[IP_PROTOCOL_OFFSET] = protocol;
    frame[UDP_DEST_PORT_OFFSET..UDP_DEST_PORT_OFFSET + 2].copy_from_slice(&dest_port.to_be_bytes());
    frame
}

/// Filter matching IPv4 UDP to `port`. Everything between the protocol byte
/// and the port is ignored.
fn udp_port_filter(port: u16) -> safer_rawcap::Result<Filter> {
    let span = UDP_DEST_PORT_OFFSET + 2 - IP_PROTOCOL_OFFSET;
    let mut mask = vec![0u8; span];
    let mut ignore = vec![0xFFu8; span];
    mask[0] = UDP;
    ignore[0] = 0;
    mask[span - 2..].copy_from_slice(&port.to_be_bytes());
    ignore[span - 2..].fill(0);

    let mut filter = Filter::new(FilterType::ByteMask)?;
    filter.mask_set(IP_PROTOCOL_OFFSET, &mask, &ignore)?;
    filter.capture_window_set(0, 42)?;
    filter.indicate_set(false);
    filter.activate();
    Ok(filter)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port = port_arg();
    let config = CaptureConfig::development();
    logging::init(&config.logging);

    let backend = Arc::new(LoopbackBackend::new("demo0"));
    let handle = Handle::open_with_config(&Adapter::from_shared(backend.clone()), config)?;
    handle.set_rx_timeout(Duration::from_millis(20))?;
    handle.set_filter(&udp_port_filter(port)?)?;

    let traffic = [
        ("udp to watched port", frame(UDP, port)),
        ("udp elsewhere", frame(UDP, port.wrapping_add(1))),
        ("tcp to watched port", frame(TCP, port)),
        ("udp to watched port", frame(UDP, port)),
    ];
    for (_, bytes) in &traffic {
        backend.inject(bytes.clone());
    }

    let mut packet = Packet::new(1514)?;
    let mut captured = 0;
    while handle.receive_packet(&mut packet)? == Status::Success {
        captured += 1;
        println!(
            "captured {} of {} bytes on the wire",
            packet.payload_length(),
            packet.length_on_wire()
        );
    }

    let stats = handle.rx_stats();
    println!();
    println!("frames seen:         {}", stats.received);
    println!("frames captured:     {captured}");
    println!("passed to the stack: {}", backend.indicated_count());
    Ok(())
}
