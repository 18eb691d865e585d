//! Error types and handling for safer-rawcap operations.
//!
//! Every fallible operation in the crate returns [`Result`]. Hard failures and
//! the recoverable warnings that abort an operation (`Pending`, `LimitReached`)
//! are variants of [`RawcapError`]; each variant maps onto the numeric
//! [`Status`] band it belongs to through [`RawcapError::status`].
//!
//! Informational outcomes such as "no data" or "not running" are *not* errors.
//! Operations that can end benignly return `Ok(Status)` instead.

use thiserror::Error;

use crate::status::Status;

/// Result type alias for safer-rawcap operations.
pub type Result<T> = std::result::Result<T, RawcapError>;

/// Error type for safer-rawcap operations.
///
/// Variants fall into three groups:
///
/// - caller errors (`InvalidParam`, `OutOfRange`, `Overrun`, `BeyondMtu`),
///   detected locally and never retried
/// - resource-state errors (`InUse`, `Pending`, `LimitReached`), expected and
///   recoverable by retrying or picking another buffer or handle
/// - engine errors (`DriverIo`, `DriverNotAvailable`, `Io`), surfaced verbatim
#[derive(Debug, Error)]
pub enum RawcapError {
    /// Unspecified failure.
    #[error("Operation failed")]
    Failed,

    /// The requested feature or mode is not supported.
    #[error("Not available: {0}")]
    NotAvailable(&'static str),

    /// A parameter was invalid for the current object state.
    #[error("Invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// A value fell outside its permitted range.
    ///
    /// The target object is left unchanged.
    #[error("{what} out of range: {value} not in {min}..={max}")]
    OutOfRange {
        /// Name of the offending value
        what: &'static str,
        /// Value that was supplied
        value: u64,
        /// Smallest accepted value
        min: u64,
        /// Largest accepted value
        max: u64,
    },

    /// The requested object could not be found.
    #[error("Not found")]
    NotFound,

    /// The buffer is locked by a pipeline or accessed elsewhere.
    #[error("Buffer is in use")]
    InUse,

    /// The buffer was freed and its storage released.
    #[error("Buffer has been freed")]
    Freed,

    /// A frame is larger than the link can carry.
    #[error("Frame of {length} bytes exceeds link limit of {limit} bytes")]
    BeyondMtu {
        /// Frame length in bytes
        length: usize,
        /// Largest frame the link accepts
        limit: usize,
    },

    /// A caller supplied destination is too small.
    ///
    /// Nothing was written; `required` is the length that would fit.
    #[error("Destination too small: {required} bytes required")]
    Overrun {
        /// Number of bytes needed
        required: usize,
    },

    /// An exclusive operation is already in progress on the handle.
    #[error("Operation already pending")]
    Pending,

    /// A fixed per-object limit was reached.
    #[error("Limit of {limit} reached")]
    LimitReached {
        /// The limit that was hit
        limit: usize,
    },

    /// Communication with the capture engine failed.
    #[error("Driver I/O failed: {0}")]
    DriverIo(String),

    /// The capture engine is not available.
    #[error("Driver not available")]
    DriverNotAvailable,

    /// An internal mutex was poisoned by a panicking thread.
    #[error("Internal lock poisoned")]
    LockPoisoned,

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RawcapError {
    /// Map the error onto its numeric status code.
    pub fn status(&self) -> Status {
        match self {
            RawcapError::Failed | RawcapError::LockPoisoned => Status::Failed,
            RawcapError::NotAvailable(_) => Status::NotAvailable,
            RawcapError::InvalidParam(_) => Status::InvalidParam,
            RawcapError::OutOfRange { .. } => Status::ParamOutOfRange,
            RawcapError::NotFound => Status::NotFound,
            RawcapError::InUse => Status::InUse,
            RawcapError::Freed => Status::InvalidPointer,
            RawcapError::BeyondMtu { .. } => Status::BeyondMtu,
            RawcapError::Overrun { .. } => Status::Overrun,
            RawcapError::Pending => Status::Pending,
            RawcapError::LimitReached { .. } => Status::LimitReached,
            RawcapError::DriverIo(_) | RawcapError::Io(_) => Status::DriverIoFailed,
            RawcapError::DriverNotAvailable => Status::DriverNotAvailable,
        }
    }

    /// Whether the caller may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RawcapError::InUse | RawcapError::Pending | RawcapError::LimitReached { .. }
        )
    }

    pub(crate) fn out_of_range(what: &'static str, value: u64, min: u64, max: u64) -> Self {
        RawcapError::OutOfRange {
            what,
            value,
            min,
            max,
        }
    }
}

// Errors cross the engine and dispatch threads.
static_assertions::assert_impl_all!(RawcapError: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    mod error_messages {
        use super::*;

        #[test]
        fn in_use() {
            assert_eq!(RawcapError::InUse.to_string(), "Buffer is in use");
        }

        #[test]
        fn out_of_range() {
            let error = RawcapError::out_of_range("payload length", 20, 0, 14);
            assert_eq!(
                error.to_string(),
                "payload length out of range: 20 not in 0..=14"
            );
        }

        #[test]
        fn freed() {
            assert_eq!(RawcapError::Freed.to_string(), "Buffer has been freed");
            assert_eq!(RawcapError::Freed.status(), Status::InvalidPointer);
        }

        #[test]
        fn overrun() {
            let error = RawcapError::Overrun { required: 60 };
            assert_eq!(error.to_string(), "Destination too small: 60 bytes required");
        }

        #[test]
        fn limit_reached() {
            let error = RawcapError::LimitReached { limit: 2 };
            assert_eq!(error.to_string(), "Limit of 2 reached");
        }

        #[test]
        fn beyond_mtu() {
            let error = RawcapError::BeyondMtu {
                length: 2000,
                limit: 1518,
            };
            assert_eq!(
                error.to_string(),
                "Frame of 2000 bytes exceeds link limit of 1518 bytes"
            );
        }
    }

    mod status_mapping {
        use super::*;

        #[test]
        fn errors_map_to_error_band() {
            let errors = [
                RawcapError::Failed,
                RawcapError::NotAvailable("bpf"),
                RawcapError::InvalidParam("index"),
                RawcapError::out_of_range("x", 1, 2, 3),
                RawcapError::InUse,
                RawcapError::Overrun { required: 1 },
                RawcapError::DriverNotAvailable,
                RawcapError::LockPoisoned,
            ];
            for error in &errors {
                assert!(error.status().is_error(), "{error:?}");
            }
        }

        #[test]
        fn recoverable_conditions_map_to_warning_band() {
            assert_eq!(RawcapError::Pending.status(), Status::Pending);
            assert!(RawcapError::Pending.status().is_warning());
            assert!(RawcapError::LimitReached { limit: 5 }.status().is_warning());
        }

        #[test]
        fn retryable() {
            assert!(RawcapError::InUse.is_retryable());
            assert!(RawcapError::Pending.is_retryable());
            assert!(!RawcapError::InvalidParam("x").is_retryable());
        }
    }

    mod error_conversion {
        use super::*;

        #[test]
        fn from_io_error() {
            let io_error = IoError::new(ErrorKind::BrokenPipe, "link down");
            let error: RawcapError = io_error.into();
            assert!(matches!(error, RawcapError::Io(_)));
            assert_eq!(error.status(), Status::DriverIoFailed);
            assert!(error.source().is_some());
        }
    }

    mod result_alias {
        use super::*;

        fn returns_error() -> Result<u32> {
            Err(RawcapError::InUse)
        }

        #[test]
        fn alias_carries_error() {
            assert!(matches!(returns_error(), Err(RawcapError::InUse)));
        }
    }
}
