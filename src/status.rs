//! Numeric status codes and the per-thread last-status query.
//!
//! Codes are grouped into four bands:
//!
//! | Band    | Range          |
//! |---------|----------------|
//! | success | `0`            |
//! | error   | `< 0`          |
//! | warning | `1..=1999`     |
//! | info    | `2000..=3999`  |

use std::cell::Cell;
use std::fmt;

use crate::error::Result;

/// Status band a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBand {
    /// Operation succeeded.
    Success,
    /// Caller-correctable failure.
    Error,
    /// Recoverable, operation specific condition.
    Warning,
    /// Benign outcome that is part of normal control flow.
    Info,
}

/// Status code reported by core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Status {
    /// Success.
    #[default]
    Success = 0,

    /// Unspecified failure.
    Failed = -1,
    /// Feature not available.
    NotAvailable = -2,
    /// Invalid handle or reference.
    InvalidPointer = -3,
    /// Invalid parameter.
    InvalidParam = -4,
    /// Parameter out of range.
    ParamOutOfRange = -5,
    /// Object not found.
    NotFound = -6,
    /// Object in use.
    InUse = -7,
    /// Frame larger than the link MTU.
    BeyondMtu = -8,
    /// Engine communication failed.
    DriverIoFailed = -9,
    /// Engine not available.
    DriverNotAvailable = -10,
    /// Destination too small.
    Overrun = -11,

    /// Running in demo mode.
    DemoMode = 1,
    /// Operation already pending.
    Pending = 2,
    /// Limit reached.
    LimitReached = 3,
    /// Operation canceled.
    Canceled = 4,
    /// Not every element could be processed.
    NotAllProcessed = 5,
    /// Link has no uplink.
    NoUplink = 6,

    /// Pipeline not running.
    NotRunning = 2000,
    /// Buffer not attached.
    NotAttached = 2001,
    /// Callback not registered.
    NotRegistered = 2002,
    /// Callback already registered.
    AlreadyRegistered = 2003,
    /// No data available.
    NoData = 2004,
    /// Wait timed out.
    Timeout = 2005,
}

impl Status {
    const ALL: [Status; 24] = [
        Status::Success,
        Status::Failed,
        Status::NotAvailable,
        Status::InvalidPointer,
        Status::InvalidParam,
        Status::ParamOutOfRange,
        Status::NotFound,
        Status::InUse,
        Status::BeyondMtu,
        Status::DriverIoFailed,
        Status::DriverNotAvailable,
        Status::Overrun,
        Status::DemoMode,
        Status::Pending,
        Status::LimitReached,
        Status::Canceled,
        Status::NotAllProcessed,
        Status::NoUplink,
        Status::NotRunning,
        Status::NotAttached,
        Status::NotRegistered,
        Status::AlreadyRegistered,
        Status::NoData,
        Status::Timeout,
    ];

    /// Numeric code.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Look up a status by its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.code() == code)
    }

    /// Band this status belongs to.
    pub const fn band(self) -> StatusBand {
        match self.code() {
            0 => StatusBand::Success,
            c if c < 0 => StatusBand::Error,
            c if c < 2000 => StatusBand::Warning,
            _ => StatusBand::Info,
        }
    }

    /// `true` for [`Status::Success`].
    pub const fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }

    /// `true` for negative codes.
    pub const fn is_error(self) -> bool {
        matches!(self.band(), StatusBand::Error)
    }

    /// `true` for warning codes.
    pub const fn is_warning(self) -> bool {
        matches!(self.band(), StatusBand::Warning)
    }

    /// `true` for informational codes.
    pub const fn is_info(self) -> bool {
        matches!(self.band(), StatusBand::Info)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

thread_local! {
    static LAST_STATUS: Cell<Status> = const { Cell::new(Status::Success) };
}

/// Status of the most recent core operation on the calling thread.
///
/// Diagnostics only. The value returned by the operation itself is
/// authoritative; this one is overwritten by every later call.
pub fn last_status() -> Status {
    LAST_STATUS.with(Cell::get)
}

pub(crate) fn set_last_status(status: Status) {
    LAST_STATUS.with(|cell| cell.set(status));
}

/// Record the outcome of an operation returning a plain value.
pub(crate) fn record<T>(result: Result<T>) -> Result<T> {
    set_last_status(match &result {
        Ok(_) => Status::Success,
        Err(error) => error.status(),
    });
    result
}

/// Record the outcome of an operation that reports its own status.
pub(crate) fn record_status(result: Result<Status>) -> Result<Status> {
    set_last_status(match &result {
        Ok(status) => *status,
        Err(error) => error.status(),
    });
    result
}
