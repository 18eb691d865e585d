//! Cursors and iterators over a buffer's occupied slots.

use std::fmt;
use std::iter::FusedIterator;

use super::Storage;
use crate::error::{RawcapError, Result};
use crate::packet::PacketRef;

/// Bidirectional cursor over the occupied slots of a buffer.
///
/// Positions run from `0` to `count`; `count` is the end sentinel, which
/// [`eval`](Self::eval) turns into `None`. Stepping past either boundary
/// lands on the sentinel, and advancing from the sentinel stays there:
///
/// ```rust
/// use safer_rawcap::{Buffer, Packet};
///
/// let buffer = Buffer::new(64, 8)?;
/// let packet = Packet::new(64)?;
/// for _ in 0..3 {
///     buffer.push_back(&packet)?;
/// }
///
/// let access = buffer.access()?;
/// let mut it = access.begin();
/// let mut seen = 0;
/// while it != access.end() {
///     assert!(it.eval().is_some());
///     seen += 1;
///     it.advance();
/// }
/// assert_eq!(seen, 3);
///
/// it.retreat();
/// assert_eq!(it.position(), Some(2));
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
///
/// The cursor borrows the [`BufferAccess`](crate::BufferAccess) guard and
/// records the packet count at creation. Two cursors are equal when they
/// belong to the same buffer generation and resolve to the same slot, so two
/// independently built end cursors compare equal.
#[derive(Clone)]
pub struct BufferIterator<'a> {
    storage: &'a Storage,
    buffer_id: u64,
    generation: u64,
    position: usize,
    count: usize,
}

impl<'a> BufferIterator<'a> {
    pub(crate) fn new(
        storage: &'a Storage,
        buffer_id: u64,
        generation: u64,
        start: usize,
    ) -> Result<Self> {
        if start > storage.count() {
            return Err(RawcapError::InvalidParam("iterator start beyond packet count"));
        }
        Ok(Self::at_position(storage, buffer_id, generation, start))
    }

    pub(crate) fn at_position(
        storage: &'a Storage,
        buffer_id: u64,
        generation: u64,
        position: usize,
    ) -> Self {
        let count = storage.count();
        Self {
            storage,
            buffer_id,
            generation,
            position: position.min(count),
            count,
        }
    }

    /// Current position, `None` at the end sentinel.
    pub fn position(&self) -> Option<usize> {
        (self.position < self.count).then_some(self.position)
    }

    /// `true` at the end sentinel.
    pub fn is_end(&self) -> bool {
        self.position >= self.count
    }

    /// Step forward. A no-op at the sentinel.
    pub fn advance(&mut self) {
        if self.position < self.count {
            self.position += 1;
        }
    }

    /// Step backward. From the sentinel this reaches the last packet; from
    /// the first packet it reaches the sentinel.
    pub fn retreat(&mut self) {
        self.position = if self.position == 0 || self.count == 0 {
            self.count
        } else {
            self.position - 1
        };
    }

    /// Packet at the current position, `None` at the sentinel.
    pub fn eval(&self) -> Option<PacketRef<'a>> {
        if self.is_end() {
            return None;
        }
        self.storage.get(self.position)
    }

    fn resolved_slot(&self) -> Option<usize> {
        if self.is_end() {
            None
        } else {
            self.storage.physical(self.position)
        }
    }
}

impl PartialEq for BufferIterator<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.buffer_id == other.buffer_id
            && self.generation == other.generation
            && self.resolved_slot() == other.resolved_slot()
    }
}

impl Eq for BufferIterator<'_> {}

impl fmt::Debug for BufferIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferIterator")
            .field("buffer", &self.buffer_id)
            .field("generation", &self.generation)
            .field("position", &self.position())
            .finish()
    }
}

/// Double-ended iterator over a buffer's packets.
#[derive(Clone)]
pub struct Packets<'a> {
    storage: &'a Storage,
    front: usize,
    back: usize,
}

impl<'a> Packets<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            front: 0,
            back: storage.count(),
        }
    }
}

impl<'a> Iterator for Packets<'a> {
    type Item = PacketRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let packet = self.storage.get(self.front);
        self.front += 1;
        packet
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for Packets<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.storage.get(self.back)
    }
}

impl ExactSizeIterator for Packets<'_> {}

impl FusedIterator for Packets<'_> {}

impl fmt::Debug for Packets<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packets")
            .field("remaining", &(self.back - self.front))
            .finish()
    }
}
