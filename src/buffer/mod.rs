//! Fixed-capacity packet buffers with an explicit lock state.
//!
//! A [`Buffer`] is a cheap, cloneable handle to one pre-allocated set of
//! packet slots. Exactly one party owns the slots at any time:
//!
//! | [`LockState`]         | Owner                                   |
//! |-----------------------|-----------------------------------------|
//! | `Unlocked`            | application                             |
//! | `LockedForReceive`    | capture pipeline of one handle          |
//! | `LockedForTransmit`   | transmit pipeline of one handle         |
//! | `Destroyed`           | nobody, storage released                |
//!
//! Application access goes through a [`BufferAccess`] guard obtained with
//! [`Buffer::access`], which fails with [`RawcapError::InUse`] while a
//! pipeline holds the buffer. Packet views and iterators borrow from the
//! guard, so none of them can survive a lock transition.
//!
//! # Example
//!
//! ```rust
//! use safer_rawcap::{Buffer, Packet, PacketAccess};
//!
//! let buffer = Buffer::new(1514, 2)?;
//! let mut packet = Packet::new(1514)?;
//! packet.payload_set(&[0xAB; 64])?;
//!
//! assert!(buffer.push_back(&packet)?);
//! assert!(buffer.push_front(&packet)?);
//! assert!(!buffer.push_back(&packet)?); // full
//!
//! let access = buffer.access()?;
//! for packet in &access {
//!     assert_eq!(packet.payload_length(), 64);
//! }
//! # Ok::<(), safer_rawcap::RawcapError>(())
//! ```
//!
//! # Thread safety
//!
//! Handles may be shared between threads. Freeing a buffer while another
//! thread still works with it is the caller's problem to avoid: the other
//! thread will see [`RawcapError::Freed`] on its next call.

pub mod generation;
mod iterator;
mod storage;

pub use generation::GenerationCounter;
pub use iterator::{BufferIterator, Packets};
pub(crate) use storage::{SlotWrite, Storage};

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::error::{RawcapError, Result};
use crate::packet::{check_payload_size, PacketAccess, PacketMut, PacketRef};
use crate::status;

/// Smallest number of packet slots per buffer.
pub const BUFFER_PACKETS_MIN: u32 = 1;
/// Largest number of packet slots per buffer.
pub const BUFFER_PACKETS_MAX: u32 = 100_000;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Current owner of a buffer's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LockState {
    /// Owned by the application.
    Unlocked = 0,
    /// Attached to a capture pipeline.
    LockedForReceive = 1,
    /// Queued on a transmit pipeline.
    LockedForTransmit = 2,
    /// Freed; storage has been released.
    Destroyed = 3,
}

impl LockState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LockState::Unlocked,
            1 => LockState::LockedForReceive,
            2 => LockState::LockedForTransmit,
            _ => LockState::Destroyed,
        }
    }

    /// `true` for either pipeline lock.
    pub fn is_locked(self) -> bool {
        matches!(self, LockState::LockedForReceive | LockState::LockedForTransmit)
    }
}

/// Mutable part of a buffer, guarded by its mutex.
struct BufferState {
    lock: LockState,
    /// Handle id of the pipeline holding the lock.
    owner: u64,
    storage: Storage,
}

struct BufferShared {
    id: u64,
    max_payload_size: u16,
    generation: GenerationCounter,
    // Mirror of `state.lock` for lock-free queries.
    lock_hint: AtomicU8,
    // Live `PipelineHold`s. Outlasts the lock across callbacks.
    holds: AtomicUsize,
    state: Mutex<BufferState>,
}

impl BufferShared {
    fn lock(&self) -> Result<MutexGuard<'_, BufferState>> {
        self.state.lock().map_err(|_| RawcapError::LockPoisoned)
    }

    fn try_lock(&self) -> Result<MutexGuard<'_, BufferState>> {
        match self.state.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(RawcapError::InUse),
            Err(TryLockError::Poisoned(_)) => Err(RawcapError::LockPoisoned),
        }
    }

    fn set_lock(&self, state: &mut BufferState, lock: LockState, owner: u64) -> u64 {
        state.lock = lock;
        state.owner = owner;
        self.lock_hint.store(lock as u8, Ordering::Release);
        self.generation.increment()
    }
}

/// Shared handle to a fixed-capacity set of packet slots.
///
/// Cloning the handle does not clone the slots.
#[derive(Clone)]
pub struct Buffer {
    shared: Arc<BufferShared>,
}

impl Buffer {
    /// Create a buffer of `num_packets` slots of `max_payload_size` bytes.
    ///
    /// All slot memory is allocated here and reused for the buffer's
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if `max_payload_size` is outside
    /// the packet size bounds or `num_packets` outside
    /// [`BUFFER_PACKETS_MIN`]`..=`[`BUFFER_PACKETS_MAX`].
    pub fn new(max_payload_size: u16, num_packets: u32) -> Result<Self> {
        status::record(Self::create(max_payload_size, num_packets))
    }

    fn create(max_payload_size: u16, num_packets: u32) -> Result<Self> {
        check_payload_size(max_payload_size)?;
        if !(BUFFER_PACKETS_MIN..=BUFFER_PACKETS_MAX).contains(&num_packets) {
            return Err(RawcapError::out_of_range(
                "packets per buffer",
                u64::from(num_packets),
                u64::from(BUFFER_PACKETS_MIN),
                u64::from(BUFFER_PACKETS_MAX),
            ));
        }

        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            target: "safer_rawcap::buffer",
            "buffer {id}: {num_packets} slots of {max_payload_size} bytes"
        );
        Ok(Self {
            shared: Arc::new(BufferShared {
                id,
                max_payload_size,
                generation: GenerationCounter::new(),
                lock_hint: AtomicU8::new(LockState::Unlocked as u8),
                holds: AtomicUsize::new(0),
                state: Mutex::new(BufferState {
                    lock: LockState::Unlocked,
                    owner: 0,
                    storage: Storage::new(max_payload_size, num_packets as usize),
                }),
            }),
        })
    }

    /// Process-unique identifier.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Whether both handles refer to the same slots.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Payload capacity of every slot.
    pub fn max_payload_size(&self) -> u16 {
        self.shared.max_payload_size
    }

    /// Current lock state.
    pub fn lock_state(&self) -> LockState {
        LockState::from_u8(self.shared.lock_hint.load(Ordering::Acquire))
    }

    /// Generation of the buffer, bumped on every lock transition and clear.
    pub fn generation(&self) -> u64 {
        self.shared.generation.get()
    }

    /// Exclusive access to the slots.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::InUse`] if a pipeline holds the buffer or another
    ///   guard is alive
    /// - [`RawcapError::Freed`] after [`Buffer::free`]
    pub fn access(&self) -> Result<BufferAccess<'_>> {
        status::record(self.try_access())
    }

    fn try_access(&self) -> Result<BufferAccess<'_>> {
        let state = self.shared.try_lock()?;
        match state.lock {
            LockState::Unlocked => Ok(BufferAccess {
                state,
                shared: &self.shared,
            }),
            LockState::Destroyed => Err(RawcapError::Freed),
            LockState::LockedForReceive | LockState::LockedForTransmit => Err(RawcapError::InUse),
        }
    }

    /// Append a copy of `packet`. `Ok(false)` if the buffer is full.
    ///
    /// # Errors
    ///
    /// See [`BufferAccess::push_back`].
    pub fn push_back<P: PacketAccess + ?Sized>(&self, packet: &P) -> Result<bool> {
        self.access()?.push_back(packet)
    }

    /// Prepend a copy of `packet`. `Ok(false)` if the buffer is full.
    ///
    /// # Errors
    ///
    /// See [`BufferAccess::push_front`].
    pub fn push_front<P: PacketAccess + ?Sized>(&self, packet: &P) -> Result<bool> {
        self.access()?.push_front(packet)
    }

    /// Insert a copy of `packet` at `index`. `Ok(false)` if the buffer is full.
    ///
    /// # Errors
    ///
    /// See [`BufferAccess::insert_at`].
    pub fn insert_at<P: PacketAccess + ?Sized>(&self, index: usize, packet: &P) -> Result<bool> {
        self.access()?.insert_at(index, packet)
    }

    /// Number of occupied slots.
    pub fn count(&self) -> Result<usize> {
        Ok(self.access()?.count())
    }

    /// Number of slots.
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.access()?.capacity())
    }

    /// Drop every packet, keeping the slots.
    pub fn clear(&self) -> Result<()> {
        self.access()?.clear();
        Ok(())
    }

    /// Release the slot storage. The buffer becomes [`LockState::Destroyed`].
    ///
    /// # Errors
    ///
    /// - [`RawcapError::InUse`] while locked by a pipeline or accessed
    /// - [`RawcapError::Freed`] if already freed
    pub fn free(&self) -> Result<()> {
        status::record(self.try_free())
    }

    fn try_free(&self) -> Result<()> {
        let mut state = self.shared.try_lock()?;
        match state.lock {
            LockState::Unlocked => {
                state.storage = Storage::released();
                self.shared.set_lock(&mut state, LockState::Destroyed, 0);
                log::trace!(target: "safer_rawcap::buffer", "buffer {} freed", self.shared.id);
                Ok(())
            }
            LockState::Destroyed => Err(RawcapError::Freed),
            LockState::LockedForReceive | LockState::LockedForTransmit => Err(RawcapError::InUse),
        }
    }

    /// Hand the buffer to a pipeline. Returns the generation of the lock.
    pub(crate) fn lock_for(&self, lock: LockState, owner: u64) -> Result<u64> {
        debug_assert!(lock.is_locked());
        let mut state = self.shared.try_lock()?;
        match state.lock {
            LockState::Unlocked => Ok(self.shared.set_lock(&mut state, lock, owner)),
            LockState::Destroyed => Err(RawcapError::Freed),
            LockState::LockedForReceive | LockState::LockedForTransmit => Err(RawcapError::InUse),
        }
    }

    /// Return the buffer to the application if `owner` still holds the lock
    /// taken at `generation`. Returns whether it was unlocked.
    pub(crate) fn unlock_from(&self, lock: LockState, owner: u64, generation: u64) -> Result<bool> {
        let mut state = self.shared.lock()?;
        if !self.is_held(&state, lock, owner, generation) {
            return Ok(false);
        }
        self.shared.set_lock(&mut state, LockState::Unlocked, 0);
        Ok(true)
    }

    /// Run `f` on the slots while `owner` still holds the lock taken at
    /// `generation`. `None` if the lock was lost in the meantime.
    pub(crate) fn with_locked_storage<R>(
        &self,
        lock: LockState,
        owner: u64,
        generation: u64,
        f: impl FnOnce(&mut Storage) -> R,
    ) -> Result<Option<R>> {
        let mut state = self.shared.lock()?;
        if !self.is_held(&state, lock, owner, generation) {
            return Ok(None);
        }
        Ok(Some(f(&mut state.storage)))
    }

    fn is_held(&self, state: &BufferState, lock: LockState, owner: u64, generation: u64) -> bool {
        state.lock == lock && state.owner == owner && self.shared.generation.get() == generation
    }

    /// Mark the buffer as a member of a pipeline until the hold drops.
    pub(crate) fn hold(&self) -> PipelineHold {
        self.shared.holds.fetch_add(1, Ordering::AcqRel);
        PipelineHold {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether a pipeline still counts the buffer as its own, even while
    /// it is unlocked for a callback.
    pub(crate) fn in_pipeline(&self) -> bool {
        self.shared.holds.load(Ordering::Acquire) > 0
    }
}

/// Pipeline membership of a buffer.
///
/// Receivers keep one per attached buffer and transmitters one per queued
/// buffer until its callback returns. Pools skip buffers with live holds.
pub(crate) struct PipelineHold {
    shared: Arc<BufferShared>,
}

impl Drop for PipelineHold {
    fn drop(&mut self) {
        self.shared.holds.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.shared.id)
            .field("max_payload_size", &self.shared.max_payload_size)
            .field("lock_state", &self.lock_state())
            .field("generation", &self.generation())
            .finish()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Buffer {}

/// Exclusive application access to an unlocked buffer.
///
/// While the guard lives no pipeline can lock the buffer; attach and send
/// calls fail with [`RawcapError::InUse`].
pub struct BufferAccess<'a> {
    state: MutexGuard<'a, BufferState>,
    shared: &'a BufferShared,
}

impl<'a> BufferAccess<'a> {
    /// Number of occupied slots.
    pub fn count(&self) -> usize {
        self.state.storage.count()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.state.storage.capacity()
    }

    /// `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// `true` if every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.count() == self.capacity()
    }

    /// Payload capacity of every slot.
    pub fn max_payload_size(&self) -> u16 {
        self.shared.max_payload_size
    }

    /// Generation the guard observes.
    pub fn generation(&self) -> u64 {
        self.shared.generation.get()
    }

    /// Packet at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::InvalidParam`] if `index >= count`.
    pub fn at(&self, index: usize) -> Result<PacketRef<'_>> {
        status::record(
            self.state
                .storage
                .get(index)
                .ok_or(RawcapError::InvalidParam("packet index beyond packet count")),
        )
    }

    /// Mutable packet at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::InvalidParam`] if `index >= count`.
    pub fn at_mut(&mut self, index: usize) -> Result<PacketMut<'_>> {
        status::record(
            self.state
                .storage
                .get_mut(index)
                .ok_or(RawcapError::InvalidParam("packet index beyond packet count")),
        )
    }

    /// First packet.
    pub fn front(&self) -> Option<PacketRef<'_>> {
        self.state.storage.get(0)
    }

    /// Last packet.
    pub fn back(&self) -> Option<PacketRef<'_>> {
        self.count()
            .checked_sub(1)
            .and_then(|last| self.state.storage.get(last))
    }

    /// Append a copy of `packet`.
    ///
    /// Returns `Ok(false)` without changing anything if the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if the payload is longer than a
    /// slot.
    pub fn push_back<P: PacketAccess + ?Sized>(&mut self, packet: &P) -> Result<bool> {
        let end = self.count();
        self.insert_at(end, packet)
    }

    /// Prepend a copy of `packet`.
    ///
    /// Returns `Ok(false)` without changing anything if the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if the payload is longer than a
    /// slot.
    pub fn push_front<P: PacketAccess + ?Sized>(&mut self, packet: &P) -> Result<bool> {
        self.insert_at(0, packet)
    }

    /// Insert a copy of `packet` before position `index`.
    ///
    /// Returns `Ok(false)` without changing anything if the buffer is full.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::InvalidParam`] if `index > count`
    /// - [`RawcapError::OutOfRange`] if the payload is longer than a slot
    pub fn insert_at<P: PacketAccess + ?Sized>(&mut self, index: usize, packet: &P) -> Result<bool> {
        status::record(self.state.storage.insert(index, packet))
    }

    /// Drop every packet, keeping the slots.
    pub fn clear(&mut self) {
        self.state.storage.clear();
        self.shared.generation.increment();
    }

    /// Cursor at `start`; `start == count` gives the end sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::InvalidParam`] if `start > count`.
    pub fn iter_at(&self, start: usize) -> Result<BufferIterator<'_>> {
        status::record(BufferIterator::new(
            &self.state.storage,
            self.shared.id,
            self.generation(),
            start,
        ))
    }

    /// Cursor at the first packet (the end sentinel when empty).
    pub fn begin(&self) -> BufferIterator<'_> {
        BufferIterator::at_position(&self.state.storage, self.shared.id, self.generation(), 0)
    }

    /// End sentinel cursor.
    pub fn end(&self) -> BufferIterator<'_> {
        BufferIterator::at_position(
            &self.state.storage,
            self.shared.id,
            self.generation(),
            self.count(),
        )
    }

    /// Iterator over the occupied slots in order.
    pub fn iter(&self) -> Packets<'_> {
        Packets::new(&self.state.storage)
    }
}

impl<'g> IntoIterator for &'g BufferAccess<'_> {
    type Item = PacketRef<'g>;
    type IntoIter = Packets<'g>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for BufferAccess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferAccess")
            .field("buffer", &self.shared.id)
            .field("count", &self.count())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests;
