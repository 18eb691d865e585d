//! Byte-mask capture filters.
//!
//! A [`Filter`] is plain data. Applying it to a [`Handle`](crate::Handle)
//! stores a copy; later edits to the filter only take effect when it is
//! applied again.

use crate::error::{RawcapError, Result};
use crate::packet::PACKET_SIZE_MAX;
use crate::status;

/// Largest span a byte mask may cover, counted from payload start.
pub const FILTER_MASK_MAX_LENGTH: usize = 64;

/// Filter flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    /// Fixed-offset byte mask.
    #[default]
    ByteMask,
    /// Berkeley packet filter program. Not supported.
    Bpf,
}

/// Fixed-offset byte-mask match rule plus capture window.
///
/// A set bit in `ignore_bits[i]` excludes the matching bit of `mask[i]` from
/// the comparison.
///
/// # Example
///
/// ```rust
/// use safer_rawcap::{Filter, FilterType};
///
/// // UDP (IPv4 protocol 17) to destination port 1900.
/// let mut mask = [0u8; 14];
/// let mut ignore = [0u8; 14];
/// mask[0] = 0x11;
/// mask[12] = 0x07;
/// mask[13] = 0x6C;
/// ignore[1..12].fill(0xFF);
///
/// let mut filter = Filter::new(FilterType::ByteMask)?;
/// filter.mask_set(23, &mask, &ignore)?;
/// filter.activate();
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    filter_type: FilterType,
    offset: usize,
    length: usize,
    mask: [u8; FILTER_MASK_MAX_LENGTH],
    ignore_bits: [u8; FILTER_MASK_MAX_LENGTH],
    capture_offset: usize,
    capture_length: usize,
    active: bool,
    indicate: bool,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            filter_type: FilterType::ByteMask,
            offset: 0,
            length: 0,
            mask: [0; FILTER_MASK_MAX_LENGTH],
            ignore_bits: [0; FILTER_MASK_MAX_LENGTH],
            capture_offset: 0,
            capture_length: 0,
            active: false,
            indicate: true,
        }
    }
}

impl Filter {
    /// Create an inactive filter that matches everything.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::NotAvailable`] for [`FilterType::Bpf`].
    pub fn new(filter_type: FilterType) -> Result<Self> {
        status::record(match filter_type {
            FilterType::ByteMask => Ok(Self::default()),
            FilterType::Bpf => Err(RawcapError::NotAvailable("bpf filters")),
        })
    }

    /// Filter flavour.
    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Set the match rule: `mask.len()` bytes starting at `offset`.
    ///
    /// `ignore_bits` must be as long as `mask`.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::OutOfRange`] if `offset + mask.len()` exceeds
    ///   [`FILTER_MASK_MAX_LENGTH`]
    /// - [`RawcapError::InvalidParam`] if the two slices differ in length
    ///
    /// The previous rule is kept on failure.
    pub fn mask_set(&mut self, offset: usize, mask: &[u8], ignore_bits: &[u8]) -> Result<()> {
        status::record(self.try_mask_set(offset, mask, ignore_bits))
    }

    fn try_mask_set(&mut self, offset: usize, mask: &[u8], ignore_bits: &[u8]) -> Result<()> {
        if mask.len() != ignore_bits.len() {
            return Err(RawcapError::InvalidParam(
                "mask and ignore bits differ in length",
            ));
        }
        let span = offset.saturating_add(mask.len());
        if span > FILTER_MASK_MAX_LENGTH {
            return Err(RawcapError::out_of_range(
                "mask span",
                span as u64,
                0,
                FILTER_MASK_MAX_LENGTH as u64,
            ));
        }

        self.offset = offset;
        self.length = mask.len();
        self.mask = [0; FILTER_MASK_MAX_LENGTH];
        self.ignore_bits = [0; FILTER_MASK_MAX_LENGTH];
        self.mask[..mask.len()].copy_from_slice(mask);
        self.ignore_bits[..ignore_bits.len()].copy_from_slice(ignore_bits);
        Ok(())
    }

    /// `(offset, length, mask, ignore_bits)` of the match rule.
    pub fn mask(&self) -> (usize, usize, &[u8], &[u8]) {
        (
            self.offset,
            self.length,
            &self.mask[..self.length],
            &self.ignore_bits[..self.length],
        )
    }

    /// Bytes of a matching frame to keep: `length` bytes from `offset`.
    ///
    /// A `length` of zero keeps everything from `offset` on.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if `offset + length` exceeds
    /// [`PACKET_SIZE_MAX`].
    pub fn capture_window_set(&mut self, offset: usize, length: usize) -> Result<()> {
        let end = offset.saturating_add(length);
        if end > usize::from(PACKET_SIZE_MAX) {
            return status::record(Err(RawcapError::out_of_range(
                "capture window",
                end as u64,
                0,
                u64::from(PACKET_SIZE_MAX),
            )));
        }
        self.capture_offset = offset;
        self.capture_length = length;
        status::record(Ok(()))
    }

    /// `(offset, length)` of the capture window.
    pub fn capture_window(&self) -> (usize, usize) {
        (self.capture_offset, self.capture_length)
    }

    /// Evaluate the filter on captured frames.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Stop evaluating; every frame passes.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Whether the filter is evaluated.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether matching frames are still forwarded to the network stack.
    pub fn indicate_set(&mut self, indicate: bool) {
        self.indicate = indicate;
    }

    /// See [`Filter::indicate_set`].
    pub fn indicate(&self) -> bool {
        self.indicate
    }

    /// Evaluate the match rule on a frame.
    ///
    /// An inactive filter matches everything. A frame too short to cover the
    /// mask span never matches.
    pub fn matches(&self, frame: &[u8]) -> bool {
        if !self.active {
            return true;
        }
        let Some(window) = frame.get(self.offset..self.offset + self.length) else {
            return false;
        };
        window
            .iter()
            .zip(&self.mask[..self.length])
            .zip(&self.ignore_bits[..self.length])
            .all(|((byte, mask), ignore)| (byte ^ mask) & !ignore == 0)
    }

    /// Slice of `frame` retained by the capture window.
    pub fn apply_capture_window<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let start = self.capture_offset.min(frame.len());
        let end = if self.capture_length == 0 {
            frame.len()
        } else {
            (start + self.capture_length).min(frame.len())
        };
        &frame[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(offset: usize, bytes: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 64];
        frame[offset..offset + bytes.len()].copy_from_slice(bytes);
        frame
    }

    #[test]
    fn bpf_is_not_available() {
        assert!(matches!(
            Filter::new(FilterType::Bpf),
            Err(RawcapError::NotAvailable(_))
        ));
    }

    #[test]
    fn inactive_filter_passes_everything() {
        let mut filter = Filter::new(FilterType::ByteMask).unwrap();
        filter.mask_set(0, &[0xAA], &[0x00]).unwrap();
        assert!(filter.matches(&[0x55]));
        assert!(filter.matches(&[]));
    }

    #[test]
    fn mask_matches_with_ignore_bits() {
        let mut filter = Filter::default();
        filter.mask_set(12, &[0x08, 0x00], &[0x00, 0xFF]).unwrap();
        filter.activate();

        assert!(filter.matches(&frame_with(12, &[0x08, 0x00])));
        assert!(filter.matches(&frame_with(12, &[0x08, 0x06])));
        assert!(!filter.matches(&frame_with(12, &[0x86, 0xDD])));
        assert!(!filter.matches(&[0u8; 13]));
    }

    #[test]
    fn mask_span_bound_keeps_previous_rule() {
        let mut filter = Filter::default();
        filter.mask_set(10, &[1, 2, 3], &[0, 0, 0]).unwrap();

        let result = filter.mask_set(60, &[0; 5], &[0; 5]);
        assert!(matches!(result, Err(RawcapError::OutOfRange { .. })));

        let (offset, length, mask, ignore) = filter.mask();
        assert_eq!((offset, length), (10, 3));
        assert_eq!(mask, &[1, 2, 3]);
        assert_eq!(ignore, &[0, 0, 0]);
    }

    #[test]
    fn mask_span_may_reach_limit() {
        let mut filter = Filter::default();
        assert!(filter.mask_set(0, &[0; 64], &[0; 64]).is_ok());
        assert!(filter.mask_set(63, &[0], &[0]).is_ok());
    }

    #[test]
    fn mismatched_ignore_length_is_invalid() {
        let mut filter = Filter::default();
        assert!(matches!(
            filter.mask_set(0, &[1, 2], &[0]),
            Err(RawcapError::InvalidParam(_))
        ));
    }

    #[test]
    fn capture_window() {
        let mut filter = Filter::default();
        let frame: Vec<u8> = (0..100).collect();

        assert_eq!(filter.apply_capture_window(&frame).len(), 100);

        filter.capture_window_set(10, 20).unwrap();
        assert_eq!(filter.apply_capture_window(&frame), &frame[10..30]);

        filter.capture_window_set(90, 20).unwrap();
        assert_eq!(filter.apply_capture_window(&frame), &frame[90..]);

        filter.capture_window_set(14, 0).unwrap();
        assert_eq!(filter.apply_capture_window(&frame), &frame[14..]);

        assert!(filter.capture_window_set(9000, 19).is_err());
        assert_eq!(filter.capture_window(), (14, 0));
    }

    #[test]
    fn indicate_defaults_to_forwarding() {
        let mut filter = Filter::default();
        assert!(filter.indicate());
        filter.indicate_set(false);
        assert!(!filter.indicate());
    }
}
