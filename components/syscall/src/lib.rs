//! Helion-OS syscall ABI.
//!
//! Shared between the kernel and userspace components: syscall numbers,
//! status codes, rights and signal masks, and the wire records that cross
//! the user/kernel boundary by copy. Everything here is `no_std` and
//! allocation-free.

#![no_std]

pub mod data;
pub mod number;
pub mod rights;
pub mod signals;
pub mod status;

pub use rights::Rights;
pub use signals::{Signals, SignalsState};
pub use status::Status;

/// Global kernel object id. Monotonic, never reused, never zero for a live
/// object.
pub type Koid = u64;

/// The invalid koid.
pub const KOID_INVALID: Koid = 0;

/// A user-visible handle value.
///
/// Non-negative, bottom bit set, zero never valid. Callers treat the value
/// as opaque; the encoding is a per-process secret.
pub type HandleValue = i32;

/// The invalid handle value.
pub const HANDLE_INVALID: HandleValue = 0;

/// Time in nanoseconds.
pub type Time = u64;

/// Deadline meaning "block forever".
pub const TIME_INFINITE: Time = u64::MAX;

/// Maximum length for kernel object names (process name, thread name).
pub const MAX_NAME_LEN: usize = 32;
