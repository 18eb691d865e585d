//! Pre-allocated slot storage behind a buffer.

use crate::error::{RawcapError, Result};
use crate::packet::{write_payload, PacketAccess, PacketMut, PacketRef, SlotMeta};
use crate::timestamp::Timestamp;

/// Outcome of writing a captured frame into the next free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotWrite {
    Stored,
    Full,
    TooLong,
}

/// Fixed set of packet slots sharing one payload arena.
///
/// `order` maps logical positions to physical slots. Slots are only ever
/// appended physically and released all at once by `clear`, so the occupied
/// physical slots are always `0..count` and front insertion only shifts the
/// index table.
pub(crate) struct Storage {
    slot_size: usize,
    arena: Box<[u8]>,
    slots: Box<[SlotMeta]>,
    order: Vec<u32>,
}

impl Storage {
    pub(crate) fn new(max_payload_size: u16, capacity: usize) -> Self {
        let slot_size = usize::from(max_payload_size);
        Self {
            slot_size,
            arena: vec![0u8; slot_size * capacity].into_boxed_slice(),
            slots: vec![SlotMeta::default(); capacity].into_boxed_slice(),
            order: Vec::with_capacity(capacity),
        }
    }

    /// Storage of a freed buffer.
    pub(crate) fn released() -> Self {
        Self {
            slot_size: 0,
            arena: Box::new([]),
            slots: Box::new([]),
            order: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Physical slot behind a logical position.
    pub(crate) fn physical(&self, index: usize) -> Option<usize> {
        self.order.get(index).map(|&slot| slot as usize)
    }

    fn region(&self, slot: usize) -> std::ops::Range<usize> {
        slot * self.slot_size..(slot + 1) * self.slot_size
    }

    pub(crate) fn get(&self, index: usize) -> Option<PacketRef<'_>> {
        let slot = self.physical(index)?;
        Some(PacketRef::new(
            &self.slots[slot],
            &self.arena[self.region(slot)],
        ))
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<PacketMut<'_>> {
        let slot = self.physical(index)?;
        let region = self.region(slot);
        Some(PacketMut::new(&mut self.slots[slot], &mut self.arena[region]))
    }

    /// Copy `packet` into a free slot placed at logical `index`.
    ///
    /// `Ok(false)` means the buffer is full.
    pub(crate) fn insert<P: PacketAccess + ?Sized>(&mut self, index: usize, packet: &P) -> Result<bool> {
        if index > self.count() {
            return Err(RawcapError::InvalidParam("insert index beyond packet count"));
        }
        if self.count() == self.capacity() {
            return Ok(false);
        }

        let slot = self.count();
        let region = self.region(slot);
        let meta = &mut self.slots[slot];
        write_payload(meta, &mut self.arena[region], packet.payload())?;
        meta.wire_length = packet.length_on_wire().max(meta.length);
        meta.status = packet.status();
        meta.timestamp = *packet.timestamp();

        self.order.insert(index, slot as u32);
        Ok(true)
    }

    /// Append a captured frame at the back.
    pub(crate) fn push_captured(
        &mut self,
        payload: &[u8],
        wire_length: usize,
        timestamp: Timestamp,
    ) -> SlotWrite {
        if self.count() == self.capacity() {
            return SlotWrite::Full;
        }
        if payload.len() > self.slot_size {
            return SlotWrite::TooLong;
        }

        let slot = self.count();
        let region = self.region(slot);
        self.arena[region][..payload.len()].copy_from_slice(payload);
        let meta = &mut self.slots[slot];
        meta.reset();
        meta.length = payload.len();
        meta.wire_length = wire_length.max(payload.len());
        meta.timestamp = timestamp;

        self.order.push(slot as u32);
        SlotWrite::Stored
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
    }
}
