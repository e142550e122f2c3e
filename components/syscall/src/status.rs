//! Status codes returned by every Helion syscall.
//!
//! Errors are returned as negative values in the return register; the
//! kernel dispatcher converts `Status` to an i64 stored as u64. `Ok` is
//! represented by the absence of an error (`Result<T, Status>`), raw value
//! zero.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Raw value reported for success.
pub const NO_ERROR: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, thiserror::Error)]
#[must_use]
#[repr(i32)]
pub enum Status {
    #[error("internal kernel error")]
    Internal = -1,
    #[error("operation not supported")]
    NotSupported = -2,
    #[error("not found")]
    NotFound = -3,
    #[error("cannot allocate memory")]
    NoMemory = -4,
    #[error("resource exhausted")]
    NoResources = -5,

    #[error("invalid argument")]
    InvalidArgs = -10,
    #[error("bad handle")]
    BadHandle = -11,
    #[error("wrong object type")]
    WrongType = -12,
    #[error("access denied")]
    AccessDenied = -13,
    #[error("out of range")]
    OutOfRange = -14,
    #[error("buffer too small")]
    BufferTooSmall = -15,
    #[error("bad address")]
    Fault = -16,

    #[error("bad state")]
    BadState = -20,
    #[error("not ready, wait and retry")]
    ShouldWait = -21,
    #[error("timed out")]
    TimedOut = -22,
    #[error("busy")]
    Busy = -23,
    #[error("already exists")]
    AlreadyExists = -25,
    #[error("already bound")]
    AlreadyBound = -26,

    #[error("handle closed while waiting")]
    Cancelled = -30,
    #[error("interrupted")]
    Interrupted = -33,
    #[error("channel closed")]
    ChannelClosed = -34,
    #[error("unavailable")]
    Unavailable = -35,
}

impl Status {
    /// Value to place in the syscall return register.
    #[inline]
    pub fn to_raw(self) -> u64 {
        (self as i32) as i64 as u64
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decode a raw register value; unknown codes collapse to `Internal`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw == NO_ERROR {
            return None;
        }
        Some(Self::try_from(raw).unwrap_or(Status::Internal))
    }

    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, Status::Interrupted | Status::ShouldWait)
    }
}

/// Convert a `Result` into the raw syscall return value, with `map` applied
/// to the success payload.
#[inline]
pub fn into_raw<T, F: FnOnce(T) -> u64>(r: Result<T, Status>, map: F) -> u64 {
    match r {
        Ok(v) => map(v),
        Err(e) => e.to_raw(),
    }
}
