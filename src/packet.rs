//! Standalone packets and borrowed views into buffer slots.
//!
//! A [`Packet`] owns its payload storage. [`PacketRef`] and [`PacketMut`] are
//! views into a slot of a [`Buffer`](crate::Buffer) and borrow from the
//! [`BufferAccess`](crate::BufferAccess) guard that produced them, so a view
//! cannot outlive the window in which the buffer is unlocked:
//!
//! ```compile_fail
//! use safer_rawcap::{Buffer, Packet, PacketAccess};
//!
//! let buffer = Buffer::new(64, 4).unwrap();
//! let mut packet = Packet::new(64).unwrap();
//! packet.payload_set(&[0u8; 20]).unwrap();
//! buffer.push_back(&packet).unwrap();
//!
//! let view = {
//!     let access = buffer.access().unwrap();
//!     access.at(0).unwrap()
//! };
//! println!("{}", view.payload_length());
//! ```
//!
//! All read accessors are shared through the [`PacketAccess`] trait.

use std::fmt;

use crate::error::{RawcapError, Result};
use crate::status::{self, Status};
use crate::timestamp::Timestamp;

/// Smallest permitted payload capacity (an Ethernet header).
pub const PACKET_SIZE_MIN: u16 = 14;
/// Largest permitted payload capacity (jumbo frame with one VLAN tag).
pub const PACKET_SIZE_MAX: u16 = 9018;

/// Per-slot metadata kept next to the payload bytes.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlotMeta {
    pub(crate) length: usize,
    pub(crate) wire_length: usize,
    pub(crate) status: Status,
    pub(crate) timestamp: Timestamp,
}

impl SlotMeta {
    pub(crate) fn reset(&mut self) {
        *self = SlotMeta::default();
    }
}

pub(crate) fn check_payload_size(max_payload_size: u16) -> Result<()> {
    if !(PACKET_SIZE_MIN..=PACKET_SIZE_MAX).contains(&max_payload_size) {
        return Err(RawcapError::out_of_range(
            "max payload size",
            u64::from(max_payload_size),
            u64::from(PACKET_SIZE_MIN),
            u64::from(PACKET_SIZE_MAX),
        ));
    }
    Ok(())
}

/// Copy `bytes` into a slot. Nothing is written on failure.
pub(crate) fn write_payload(meta: &mut SlotMeta, data: &mut [u8], bytes: &[u8]) -> Result<()> {
    if bytes.len() > data.len() {
        return Err(RawcapError::out_of_range(
            "payload length",
            bytes.len() as u64,
            0,
            data.len() as u64,
        ));
    }
    data[..bytes.len()].copy_from_slice(bytes);
    meta.length = bytes.len();
    meta.wire_length = bytes.len();
    Ok(())
}

fn check_wire_length(meta: &SlotMeta, length: usize) -> Result<()> {
    if length < meta.length {
        return Err(RawcapError::InvalidParam(
            "length on wire is shorter than the captured payload",
        ));
    }
    Ok(())
}

/// Read access shared by standalone packets and buffer slot views.
pub trait PacketAccess {
    /// Captured payload bytes. No copy is made.
    fn payload(&self) -> &[u8];

    /// Per-packet status set by the engine.
    fn status(&self) -> Status;

    /// Length of the frame on the wire, which may exceed the captured length.
    fn length_on_wire(&self) -> usize;

    /// Payload capacity in bytes.
    fn max_payload_size(&self) -> u16;

    /// Capture or send time.
    fn timestamp(&self) -> &Timestamp;

    /// Captured payload length in bytes.
    fn payload_length(&self) -> usize {
        self.payload().len()
    }

    /// Copy the payload into `dest`, returning the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::Overrun`] carrying the required length if
    /// `dest` is too small. `dest` is left untouched in that case.
    fn payload_copy(&self, dest: &mut [u8]) -> Result<usize> {
        let payload = self.payload();
        if dest.len() < payload.len() {
            return status::record(Err(RawcapError::Overrun {
                required: payload.len(),
            }));
        }
        dest[..payload.len()].copy_from_slice(payload);
        status::record(Ok(payload.len()))
    }
}

/// A packet that owns its payload storage.
#[derive(Clone)]
pub struct Packet {
    meta: SlotMeta,
    data: Box<[u8]>,
}

impl Packet {
    /// Create an empty packet able to hold `max_payload_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if the size is outside
    /// [`PACKET_SIZE_MIN`]`..=`[`PACKET_SIZE_MAX`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use safer_rawcap::{Packet, PacketAccess};
    ///
    /// let mut packet = Packet::new(1514)?;
    /// packet.payload_set(&[0xFF; 60])?;
    /// assert_eq!(packet.payload_length(), 60);
    /// # Ok::<(), safer_rawcap::RawcapError>(())
    /// ```
    pub fn new(max_payload_size: u16) -> Result<Self> {
        status::record(check_payload_size(max_payload_size).map(|()| Self {
            meta: SlotMeta::default(),
            data: vec![0u8; usize::from(max_payload_size)].into_boxed_slice(),
        }))
    }

    /// Create a standalone copy of any packet, keeping its capacity.
    pub fn copy_from<P: PacketAccess + ?Sized>(source: &P) -> Result<Self> {
        let mut packet = Self::new(source.max_payload_size())?;
        packet.payload_set(source.payload())?;
        packet.meta.wire_length = source.length_on_wire();
        packet.meta.status = source.status();
        packet.meta.timestamp = *source.timestamp();
        Ok(packet)
    }

    /// Replace the payload. Also resets the length on wire to the new length.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if `bytes` is longer than the
    /// capacity; the previous payload is kept.
    pub fn payload_set(&mut self, bytes: &[u8]) -> Result<()> {
        status::record(write_payload(&mut self.meta, &mut self.data, bytes))
    }

    /// Set the length on wire.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::InvalidParam`] if `length` is shorter than the
    /// captured payload.
    pub fn set_length_on_wire(&mut self, length: usize) -> Result<()> {
        status::record(check_wire_length(&self.meta, length).map(|()| {
            self.meta.wire_length = length;
        }))
    }

    /// Mutable access to the timestamp.
    pub fn timestamp_mut(&mut self) -> &mut Timestamp {
        &mut self.meta.timestamp
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.meta.status = status;
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut SlotMeta, &mut [u8]) {
        (&mut self.meta, &mut self.data)
    }
}

impl PacketAccess for Packet {
    fn payload(&self) -> &[u8] {
        &self.data[..self.meta.length]
    }

    fn status(&self) -> Status {
        self.meta.status
    }

    fn length_on_wire(&self) -> usize {
        self.meta.wire_length
    }

    fn max_payload_size(&self) -> u16 {
        // Capacity was validated against PACKET_SIZE_MAX on creation.
        self.data.len() as u16
    }

    fn timestamp(&self) -> &Timestamp {
        &self.meta.timestamp
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("length", &self.meta.length)
            .field("wire_length", &self.meta.wire_length)
            .field("max_payload_size", &self.data.len())
            .field("status", &self.meta.status)
            .finish()
    }
}

/// Read-only view of a packet stored in a buffer slot.
#[derive(Clone, Copy)]
pub struct PacketRef<'a> {
    meta: &'a SlotMeta,
    data: &'a [u8],
}

impl<'a> PacketRef<'a> {
    pub(crate) fn new(meta: &'a SlotMeta, data: &'a [u8]) -> Self {
        Self { meta, data }
    }

    /// Payload with the full borrow lifetime of the view.
    pub fn bytes(&self) -> &'a [u8] {
        &self.data[..self.meta.length]
    }
}

impl PacketAccess for PacketRef<'_> {
    fn payload(&self) -> &[u8] {
        self.bytes()
    }

    fn status(&self) -> Status {
        self.meta.status
    }

    fn length_on_wire(&self) -> usize {
        self.meta.wire_length
    }

    fn max_payload_size(&self) -> u16 {
        self.data.len() as u16
    }

    fn timestamp(&self) -> &Timestamp {
        &self.meta.timestamp
    }
}

impl fmt::Debug for PacketRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketRef")
            .field("length", &self.meta.length)
            .field("wire_length", &self.meta.wire_length)
            .field("status", &self.meta.status)
            .finish()
    }
}

/// Mutable view of a packet stored in a buffer slot.
pub struct PacketMut<'a> {
    meta: &'a mut SlotMeta,
    data: &'a mut [u8],
}

impl<'a> PacketMut<'a> {
    pub(crate) fn new(meta: &'a mut SlotMeta, data: &'a mut [u8]) -> Self {
        Self { meta, data }
    }

    /// Replace the payload of the slot.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if `bytes` exceeds the slot
    /// capacity; the slot is left unchanged.
    pub fn payload_set(&mut self, bytes: &[u8]) -> Result<()> {
        status::record(write_payload(self.meta, self.data, bytes))
    }

    /// Set the length on wire.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::InvalidParam`] if `length` is shorter than the
    /// captured payload.
    pub fn set_length_on_wire(&mut self, length: usize) -> Result<()> {
        status::record(check_wire_length(self.meta, length).map(|()| {
            self.meta.wire_length = length;
        }))
    }

    /// Mutable access to the timestamp.
    pub fn timestamp_mut(&mut self) -> &mut Timestamp {
        &mut self.meta.timestamp
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.meta.status = status;
    }
}

impl PacketAccess for PacketMut<'_> {
    fn payload(&self) -> &[u8] {
        &self.data[..self.meta.length]
    }

    fn status(&self) -> Status {
        self.meta.status
    }

    fn length_on_wire(&self) -> usize {
        self.meta.wire_length
    }

    fn max_payload_size(&self) -> u16 {
        self.data.len() as u16
    }

    fn timestamp(&self) -> &Timestamp {
        &self.meta.timestamp
    }
}
