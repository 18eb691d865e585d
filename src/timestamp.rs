//! Packet timestamps and timestamp capabilities.
//!
//! A [`Timestamp`] has no life of its own: it lives inside a packet slot and
//! is reached through `timestamp()` / `timestamp_mut()` on a packet. It can be
//! copied out by value when the caller needs to keep it past a transmit, which
//! overwrites it.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{RawcapError, Result};

/// Nanoseconds per second.
pub const NS_PER_SEC: u32 = 1_000_000_000;
/// Microseconds per second.
pub const US_PER_SEC: u32 = 1_000_000;
/// Milliseconds per second.
pub const MS_PER_SEC: u32 = 1_000;

/// Source a timestamp was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TimestampMode {
    /// No timestamp is taken.
    #[default]
    None = 0x00,
    /// Low precision system clock.
    SystemLowPrec = 0x01,
    /// High precision system clock.
    SystemHighPrec = 0x02,
    /// Software timestamp taken by the engine.
    Software = 0x04,
    /// Adapter supplied system clock.
    AdapterSystem = 0x08,
    /// Adapter supplied software timestamp.
    AdapterSoftware = 0x10,
    /// Adapter hardware clock.
    AdapterHardware = 0x20,
}

impl TimestampMode {
    /// Every mode, in bit order.
    pub const ALL: [TimestampMode; 7] = [
        TimestampMode::None,
        TimestampMode::SystemLowPrec,
        TimestampMode::SystemHighPrec,
        TimestampMode::Software,
        TimestampMode::AdapterSystem,
        TimestampMode::AdapterSoftware,
        TimestampMode::AdapterHardware,
    ];

    /// Capability bit of this mode.
    #[inline]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Look up a mode by its capability bit.
    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|mode| mode.bits() == bits)
    }

    /// Whether the mode depends on adapter support.
    pub const fn is_adapter_mode(self) -> bool {
        matches!(
            self,
            TimestampMode::AdapterSystem
                | TimestampMode::AdapterSoftware
                | TimestampMode::AdapterHardware
        )
    }
}

/// Bitmask of timestamp modes a handle can use.
///
/// [`TimestampMode::None`] has no bit and is always contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimestampCapabilities(u8);

impl TimestampCapabilities {
    const MASK: u8 = 0x3F;

    /// No capabilities beyond [`TimestampMode::None`].
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every mode.
    pub const fn all() -> Self {
        Self(Self::MASK)
    }

    /// The system clock modes every backend can provide.
    pub const fn system() -> Self {
        Self(
            TimestampMode::SystemLowPrec.bits()
                | TimestampMode::SystemHighPrec.bits()
                | TimestampMode::Software.bits(),
        )
    }

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether `mode` is available.
    pub const fn contains(self, mode: TimestampMode) -> bool {
        self.0 & mode.bits() == mode.bits()
    }

    /// Add a mode.
    pub fn insert(&mut self, mode: TimestampMode) {
        self.0 |= mode.bits();
    }

    /// Remove a mode.
    pub fn remove(&mut self, mode: TimestampMode) {
        self.0 &= !mode.bits();
    }

    /// Iterate over the available modes that carry a bit.
    pub fn iter(self) -> impl Iterator<Item = TimestampMode> {
        TimestampMode::ALL
            .into_iter()
            .filter(move |mode| *mode != TimestampMode::None && self.contains(*mode))
    }
}

impl FromIterator<TimestampMode> for TimestampCapabilities {
    fn from_iter<I: IntoIterator<Item = TimestampMode>>(iter: I) -> Self {
        let mut caps = Self::empty();
        for mode in iter {
            caps.insert(mode);
        }
        caps
    }
}

/// Capture or send time of a packet.
///
/// Held as whole seconds since the Unix epoch plus a nanosecond fraction.
/// Getters at a coarser granularity truncate the fraction. When the
/// resolution is known and coarser than one nanosecond, setters truncate the
/// stored fraction down to a multiple of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    mode: TimestampMode,
    resolution_ns: u32,
    seconds: u64,
    nanos: u32,
}

impl Timestamp {
    pub(crate) const fn new(mode: TimestampMode, resolution_ns: u32) -> Self {
        Self {
            mode,
            resolution_ns,
            seconds: 0,
            nanos: 0,
        }
    }

    /// Source the value was taken from.
    #[inline]
    pub fn mode(&self) -> TimestampMode {
        self.mode
    }

    /// Resolution in nanoseconds, `0` when unknown.
    #[inline]
    pub fn resolution_ns(&self) -> u32 {
        self.resolution_ns
    }

    /// `(seconds, nanoseconds)`.
    pub fn get_ns(&self) -> (u64, u32) {
        (self.seconds, self.nanos)
    }

    /// `(seconds, microseconds)`.
    pub fn get_us(&self) -> (u64, u32) {
        (self.seconds, self.nanos / (NS_PER_SEC / US_PER_SEC))
    }

    /// `(seconds, milliseconds)`.
    pub fn get_ms(&self) -> (u64, u32) {
        (self.seconds, self.nanos / (NS_PER_SEC / MS_PER_SEC))
    }

    /// Set from seconds and nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if `nanos` is one second or more.
    pub fn set_ns(&mut self, seconds: u64, nanos: u32) -> Result<()> {
        self.set_fraction(seconds, nanos, NS_PER_SEC, "nanoseconds")
    }

    /// Set from seconds and microseconds.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if `micros` is one second or more.
    pub fn set_us(&mut self, seconds: u64, micros: u32) -> Result<()> {
        self.set_fraction(seconds, micros, US_PER_SEC, "microseconds")
    }

    /// Set from seconds and milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] if `millis` is one second or more.
    pub fn set_ms(&mut self, seconds: u64, millis: u32) -> Result<()> {
        self.set_fraction(seconds, millis, MS_PER_SEC, "milliseconds")
    }

    /// Time since the Unix epoch.
    pub fn since_epoch(&self) -> Duration {
        Duration::new(self.seconds, self.nanos)
    }

    /// `true` if no time has been recorded.
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }

    fn set_fraction(
        &mut self,
        seconds: u64,
        fraction: u32,
        units_per_sec: u32,
        what: &'static str,
    ) -> Result<()> {
        if fraction >= units_per_sec {
            return Err(RawcapError::out_of_range(
                what,
                u64::from(fraction),
                0,
                u64::from(units_per_sec - 1),
            ));
        }
        self.seconds = seconds;
        self.nanos = self.truncate(fraction * (NS_PER_SEC / units_per_sec));
        Ok(())
    }

    fn truncate(&self, nanos: u32) -> u32 {
        if self.resolution_ns > 1 {
            nanos - nanos % self.resolution_ns
        } else {
            nanos
        }
    }

    /// Overwrite with `at`, taken from `mode` at `resolution_ns`.
    ///
    /// [`TimestampMode::None`] clears the value.
    pub(crate) fn stamp(&mut self, mode: TimestampMode, resolution_ns: u32, at: SystemTime) {
        self.mode = mode;
        self.resolution_ns = resolution_ns;
        if mode == TimestampMode::None {
            self.seconds = 0;
            self.nanos = 0;
            return;
        }
        let since = at.duration_since(UNIX_EPOCH).unwrap_or_default();
        self.seconds = since.as_secs();
        self.nanos = self.truncate(since.subsec_nanos());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_at_each_granularity() {
        let mut ts = Timestamp::default();
        ts.set_ns(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(ts.get_ns(), (1_700_000_000, 123_456_789));

        ts.set_us(12, 999_999).unwrap();
        assert_eq!(ts.get_us(), (12, 999_999));

        ts.set_ms(7, 250).unwrap();
        assert_eq!(ts.get_ms(), (7, 250));
        assert_eq!(ts.get_ns(), (7, 250_000_000));
    }

    #[test]
    fn coarse_reads_truncate() {
        let mut ts = Timestamp::default();
        ts.set_ns(1, 1_999_999).unwrap();
        assert_eq!(ts.get_us(), (1, 1_999));
        assert_eq!(ts.get_ms(), (1, 1));
    }

    #[test]
    fn full_unit_fraction_is_rejected() {
        let mut ts = Timestamp::default();
        ts.set_ns(3, 10).unwrap();

        assert!(matches!(
            ts.set_ns(4, NS_PER_SEC),
            Err(RawcapError::OutOfRange { .. })
        ));
        assert!(ts.set_us(4, US_PER_SEC).is_err());
        assert!(ts.set_ms(4, MS_PER_SEC).is_err());
        assert_eq!(ts.get_ns(), (3, 10));
    }

    #[test]
    fn known_resolution_truncates_on_set() {
        let mut ts = Timestamp::new(TimestampMode::SystemLowPrec, 100);
        ts.set_ns(0, 1_234).unwrap();
        assert_eq!(ts.get_ns(), (0, 1_200));
    }

    #[test]
    fn stamp_with_no_timestamp_mode_clears() {
        let mut ts = Timestamp::default();
        ts.set_ms(10, 5).unwrap();
        ts.stamp(TimestampMode::None, 0, SystemTime::now());
        assert!(ts.is_zero());
        assert_eq!(ts.mode(), TimestampMode::None);
    }

    #[test]
    fn stamp_records_time() {
        let at = UNIX_EPOCH + Duration::new(42, 500);
        let mut ts = Timestamp::default();
        ts.stamp(TimestampMode::SystemHighPrec, 1, at);
        assert_eq!(ts.get_ns(), (42, 500));
        assert_eq!(ts.mode(), TimestampMode::SystemHighPrec);
        assert_eq!(ts.since_epoch(), Duration::new(42, 500));
    }

    #[test]
    fn capabilities() {
        let caps = TimestampCapabilities::system();
        assert!(caps.contains(TimestampMode::None));
        assert!(caps.contains(TimestampMode::SystemHighPrec));
        assert!(!caps.contains(TimestampMode::AdapterHardware));

        let mut caps = TimestampCapabilities::empty();
        caps.insert(TimestampMode::AdapterHardware);
        assert_eq!(caps.bits(), 0x20);
        assert_eq!(caps.iter().collect::<Vec<_>>(), [TimestampMode::AdapterHardware]);
        caps.remove(TimestampMode::AdapterHardware);
        assert_eq!(caps, TimestampCapabilities::empty());

        assert_eq!(TimestampCapabilities::from_bits_truncate(0xFF), TimestampCapabilities::all());
    }

    #[test]
    fn mode_bits_round_trip() {
        for mode in TimestampMode::ALL {
            assert_eq!(TimestampMode::from_bits(mode.bits()), Some(mode));
        }
        assert_eq!(TimestampMode::from_bits(0x40), None);
        assert!(TimestampMode::AdapterSoftware.is_adapter_mode());
    }
}
