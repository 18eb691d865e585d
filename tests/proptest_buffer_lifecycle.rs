//! Property-based tests for buffer, packet, timestamp and filter invariants.

use proptest::prelude::*;
use safer_rawcap::{
    Buffer, BufferPool, Filter, FilterType, Packet, PacketAccess, RawcapError, Timestamp,
    FILTER_MASK_MAX_LENGTH,
};

/// Occupied count never exceeds capacity, and a refused insert changes nothing
#[test]
fn test_buffer_capacity_invariant() {
    proptest!(|(
        capacity in 1u32..=32,
        inserts in prop::collection::vec(0usize..3, 1..80)
    )| {
        let buffer = Buffer::new(64, capacity).unwrap();
        let packet = Packet::new(64).unwrap();

        for choice in inserts {
            let before = buffer.count().unwrap();
            let stored = match choice {
                0 => buffer.push_back(&packet).unwrap(),
                1 => buffer.push_front(&packet).unwrap(),
                _ => buffer.insert_at(before / 2, &packet).unwrap(),
            };
            let after = buffer.count().unwrap();

            prop_assert!(after <= capacity as usize);
            if stored {
                prop_assert_eq!(after, before + 1);
            } else {
                prop_assert_eq!(after, capacity as usize);
                prop_assert_eq!(after, before);
            }
        }
    });
}

/// Payloads round-trip; oversized payloads leave the previous one intact
#[test]
fn test_payload_round_trip() {
    proptest!(|(
        max_size in 14u16..=512,
        first in prop::collection::vec(any::<u8>(), 0..512),
        second in prop::collection::vec(any::<u8>(), 0..1024)
    )| {
        let mut packet = Packet::new(max_size).unwrap();
        let first = &first[..first.len().min(usize::from(max_size))];
        packet.payload_set(first).unwrap();
        prop_assert_eq!(packet.payload(), first);

        let result = packet.payload_set(&second);
        if second.len() <= usize::from(max_size) {
            prop_assert!(result.is_ok());
            prop_assert_eq!(packet.payload(), &second[..]);
        } else {
            let is_out_of_range = matches!(result, Err(RawcapError::OutOfRange { .. }));
            prop_assert!(is_out_of_range);
            prop_assert_eq!(packet.payload(), first);
        }
    });
}

/// Buffered slots keep exactly the bytes pushed into them, in order
#[test]
fn test_buffered_payloads_in_order() {
    proptest!(|(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 1..16)
    )| {
        let buffer = Buffer::new(128, 16).unwrap();
        for payload in &payloads {
            let mut packet = Packet::new(128).unwrap();
            packet.payload_set(payload).unwrap();
            prop_assert!(buffer.push_back(&packet).unwrap());
        }

        let access = buffer.access().unwrap();
        let stored: Vec<Vec<u8>> = access.iter().map(|p| p.payload().to_vec()).collect();
        prop_assert_eq!(stored, payloads);
    });
}

/// Timestamps read back exactly at the granularity they were set with
#[test]
fn test_timestamp_granularity() {
    proptest!(|(seconds in any::<u32>(), nanos in 0u32..2_000_000_000)| {
        let mut ts = Timestamp::default();
        let result = ts.set_ns(u64::from(seconds), nanos);
        if nanos < 1_000_000_000 {
            prop_assert!(result.is_ok());
            prop_assert_eq!(ts.get_ns(), (u64::from(seconds), nanos));
        } else {
            prop_assert!(result.is_err());
        }

        let micros = nanos % 1_000_000;
        ts.set_us(u64::from(seconds), micros).unwrap();
        prop_assert_eq!(ts.get_us(), (u64::from(seconds), micros));
    });
}

/// Mask spans beyond the limit are refused and keep the previous mask
#[test]
fn test_filter_mask_bound() {
    proptest!(|(offset in 0usize..96, length in 1usize..64)| {
        let mut filter = Filter::new(FilterType::ByteMask).unwrap();
        filter.mask_set(0, &[0xAA], &[0x00]).unwrap();
        let previous = filter.clone();

        let mask = vec![0x55; length];
        let ignore = vec![0x00; length];
        let result = filter.mask_set(offset, &mask, &ignore);
        if offset + length > FILTER_MASK_MAX_LENGTH {
            prop_assert!(result.is_err());
            prop_assert_eq!(&filter, &previous);
        } else {
            prop_assert!(result.is_ok());
        }
    });
}

/// Pools never hand out more buffers than their capacity
#[test]
fn test_buffer_pool_invariants() {
    proptest!(|(
        pool_size in 1usize..=16,
        drop_count in 0usize..16
    )| {
        let pool = BufferPool::new(pool_size, 256, 4).unwrap();
        let mut buffers = Vec::new();
        while let Some(buffer) = pool.get() {
            prop_assert_eq!(buffer.max_payload_size(), 256);
            buffers.push(buffer);
        }
        prop_assert_eq!(buffers.len(), pool_size);

        let dropped = drop_count.min(pool_size);
        buffers.truncate(pool_size - dropped);
        prop_assert_eq!(pool.available().unwrap(), dropped);
        prop_assert_eq!(pool.in_use().unwrap(), pool_size - dropped);
    });
}
