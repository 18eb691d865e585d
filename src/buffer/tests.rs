//! Tests for buffer storage, locking and iteration.

use super::*;
use crate::packet::Packet;
use crate::status::{last_status, Status};

const OWNER: u64 = 7;

fn packet(byte: u8, len: usize) -> Packet {
    let mut packet = Packet::new(128).unwrap();
    packet.payload_set(&vec![byte; len]).unwrap();
    packet
}

fn filled(count: u8) -> Buffer {
    let buffer = Buffer::new(128, 16).unwrap();
    for i in 0..count {
        assert!(buffer.push_back(&packet(i, usize::from(i) + 1)).unwrap());
    }
    buffer
}

#[test]
fn creation_bounds() {
    assert!(Buffer::new(14, 1).is_ok());
    assert!(matches!(
        Buffer::new(13, 1),
        Err(RawcapError::OutOfRange { .. })
    ));
    assert!(Buffer::new(9019, 1).is_err());
    assert!(Buffer::new(64, 0).is_err());
    assert!(Buffer::new(64, BUFFER_PACKETS_MAX + 1).is_err());
}

#[test]
fn new_buffer_is_unlocked_and_empty() {
    let buffer = Buffer::new(1514, 8).unwrap();
    assert_eq!(buffer.lock_state(), LockState::Unlocked);
    assert_eq!(buffer.count().unwrap(), 0);
    assert_eq!(buffer.capacity().unwrap(), 8);
    assert_eq!(buffer.max_payload_size(), 1514);
}

#[test]
fn capacity_exhausted_insert() {
    let buffer = Buffer::new(64, 1).unwrap();
    let packet = Packet::new(64).unwrap();

    assert!(buffer.push_back(&packet).unwrap());
    assert!(!buffer.push_back(&packet).unwrap());
    assert!(!buffer.push_front(&packet).unwrap());
    assert!(!buffer.insert_at(0, &packet).unwrap());
    assert_eq!(buffer.count().unwrap(), 1);
}

#[test]
fn oversized_packet_is_rejected() {
    let buffer = Buffer::new(32, 4).unwrap();
    let result = buffer.push_back(&packet(1, 33));
    assert!(matches!(result, Err(RawcapError::OutOfRange { .. })));
    assert_eq!(last_status(), Status::ParamOutOfRange);
    assert_eq!(buffer.count().unwrap(), 0);
}

#[test]
fn insert_positions() {
    let buffer = Buffer::new(128, 8).unwrap();
    buffer.push_back(&packet(1, 1)).unwrap();
    buffer.push_back(&packet(3, 3)).unwrap();
    buffer.insert_at(1, &packet(2, 2)).unwrap();
    buffer.push_front(&packet(0, 4)).unwrap();

    let access = buffer.access().unwrap();
    let firsts: Vec<u8> = access.iter().map(|p| p.bytes()[0]).collect();
    assert_eq!(firsts, [0, 1, 2, 3]);
    assert_eq!(access.front().unwrap().payload_length(), 4);
    assert_eq!(access.back().unwrap().payload_length(), 3);
    assert!(matches!(
        access.at(4),
        Err(RawcapError::InvalidParam(_))
    ));
}

#[test]
fn insert_beyond_count_is_invalid() {
    let buffer = Buffer::new(128, 8).unwrap();
    assert!(matches!(
        buffer.insert_at(1, &packet(1, 1)),
        Err(RawcapError::InvalidParam(_))
    ));
}

#[test]
fn second_access_is_in_use() {
    let buffer = Buffer::new(64, 2).unwrap();
    let _guard = buffer.access().unwrap();
    assert!(matches!(buffer.access(), Err(RawcapError::InUse)));
    assert!(matches!(
        buffer.lock_for(LockState::LockedForReceive, OWNER),
        Err(RawcapError::InUse)
    ));
}

#[test]
fn locked_buffer_rejects_application_access() {
    let buffer = filled(2);
    let generation = buffer.lock_for(LockState::LockedForTransmit, OWNER).unwrap();
    assert_eq!(buffer.lock_state(), LockState::LockedForTransmit);

    assert!(matches!(buffer.access(), Err(RawcapError::InUse)));
    assert!(matches!(buffer.push_back(&packet(9, 9)), Err(RawcapError::InUse)));
    assert!(matches!(buffer.count(), Err(RawcapError::InUse)));
    assert!(matches!(buffer.clear(), Err(RawcapError::InUse)));
    assert!(matches!(buffer.free(), Err(RawcapError::InUse)));
    assert!(matches!(
        buffer.lock_for(LockState::LockedForReceive, OWNER + 1),
        Err(RawcapError::InUse)
    ));

    assert!(buffer
        .unlock_from(LockState::LockedForTransmit, OWNER, generation)
        .unwrap());
    assert_eq!(buffer.count().unwrap(), 2);
}

#[test]
fn stale_generation_cannot_unlock_or_write() {
    let buffer = filled(1);
    let first = buffer.lock_for(LockState::LockedForReceive, OWNER).unwrap();
    assert!(buffer.unlock_from(LockState::LockedForReceive, OWNER, first).unwrap());
    let second = buffer.lock_for(LockState::LockedForReceive, OWNER).unwrap();
    assert_ne!(first, second);

    assert!(!buffer.unlock_from(LockState::LockedForReceive, OWNER, first).unwrap());
    let touched = buffer
        .with_locked_storage(LockState::LockedForReceive, OWNER, first, |s| s.clear())
        .unwrap();
    assert!(touched.is_none());

    let count = buffer
        .with_locked_storage(LockState::LockedForReceive, OWNER, second, |s| s.count())
        .unwrap();
    assert_eq!(count, Some(1));
}

#[test]
fn free_is_terminal() {
    let buffer = filled(3);
    let other = buffer.clone();
    buffer.free().unwrap();

    assert_eq!(other.lock_state(), LockState::Destroyed);
    assert!(matches!(other.access(), Err(RawcapError::Freed)));
    assert!(matches!(other.free(), Err(RawcapError::Freed)));
    assert!(matches!(
        other.lock_for(LockState::LockedForReceive, OWNER),
        Err(RawcapError::Freed)
    ));
}

#[test]
fn clones_share_storage() {
    let buffer = Buffer::new(64, 4).unwrap();
    let clone = buffer.clone();
    buffer.push_back(&packet(1, 10)).unwrap();
    assert_eq!(clone.count().unwrap(), 1);
    assert_eq!(buffer, clone);
    assert_ne!(buffer, Buffer::new(64, 4).unwrap());
}

#[test]
fn clear_bumps_generation() {
    let buffer = filled(2);
    let before = buffer.generation();
    buffer.clear().unwrap();
    assert_eq!(buffer.count().unwrap(), 0);
    assert!(buffer.generation() > before);
}

#[test]
fn slot_edit_through_access() {
    let buffer = filled(1);
    {
        let mut access = buffer.access().unwrap();
        let mut slot = access.at_mut(0).unwrap();
        slot.payload_set(&[0xEE; 20]).unwrap();
        slot.timestamp_mut().set_ms(3, 4).unwrap();
        assert!(slot.payload_set(&[0; 129]).is_err());
    }
    let access = buffer.access().unwrap();
    let slot = access.at(0).unwrap();
    assert_eq!(slot.payload(), &[0xEE; 20]);
    assert_eq!(slot.timestamp().get_ms(), (3, 4));
}

mod iterator {
    use super::*;

    #[test]
    fn boundaries() {
        let buffer = filled(4);
        let access = buffer.access().unwrap();

        let mut it = access.iter_at(4).unwrap();
        assert_eq!(it, access.end());
        assert!(it.eval().is_none());

        it.retreat();
        assert_eq!(it.position(), Some(3));

        it.advance();
        assert!(it.is_end());
        it.advance();
        assert!(it.is_end());

        let mut first = access.begin();
        first.retreat();
        assert_eq!(first, access.end());
    }

    #[test]
    fn start_beyond_count_fails() {
        let buffer = filled(2);
        let access = buffer.access().unwrap();
        assert!(matches!(
            access.iter_at(3),
            Err(RawcapError::InvalidParam(_))
        ));
    }

    #[test]
    fn empty_buffer_begin_is_end() {
        let buffer = Buffer::new(64, 2).unwrap();
        let access = buffer.access().unwrap();
        assert_eq!(access.begin(), access.end());
        let mut it = access.end();
        it.retreat();
        assert!(it.is_end());
    }

    #[test]
    fn walks_in_order() {
        let buffer = filled(5);
        let access = buffer.access().unwrap();
        let mut lengths = Vec::new();
        let mut it = access.begin();
        while it != access.end() {
            lengths.push(it.eval().unwrap().payload_length());
            it.advance();
        }
        assert_eq!(lengths, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn equality_is_by_resolved_slot() {
        let buffer = filled(3);
        let access = buffer.access().unwrap();
        let mut a = access.begin();
        let b = access.iter_at(1).unwrap();
        assert_ne!(a, b);
        a.advance();
        assert_eq!(a, b);
    }

    #[test]
    fn cursors_of_different_buffers_differ() {
        let one = filled(1);
        let two = filled(1);
        let a = one.access().unwrap();
        let b = two.access().unwrap();
        assert_ne!(a.end(), b.end());
    }

    #[test]
    fn std_iterator_is_double_ended() {
        let buffer = filled(3);
        let access = buffer.access().unwrap();
        let reversed: Vec<_> = access.iter().rev().map(|p| p.payload_length()).collect();
        assert_eq!(reversed, [3, 2, 1]);
        assert_eq!(access.iter().len(), 3);
    }
}
