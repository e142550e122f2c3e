//! The syscall layer.
//!
//! Every entry point follows the same pipeline: decode the number, look up
//! the current process, validate each user pointer against its address
//! space, look up each handle under the table lock and check the required
//! rights, invoke the typed dispatcher operation, and finally let pending
//! thread signals run.
//!
//! Syscall numbers are organized in blocks of 100 (see
//! `helion_syscall::number`):
//!
//! - 000-099 : handles and generic object operations
//! - 100-199 : memory (VMOs and process mappings)
//! - 200-299 : IPC (message pipes, data pipes, sockets, ports, wait sets)
//! - 300-399 : tasks and futexes
//! - 400-499 : events, time, randomness, kernel log

pub mod dispatcher;
pub mod datapipe;
pub mod futex;
pub mod handle_ops;
pub mod log;
pub mod object_ops;
pub mod pipe;
pub mod port;
pub mod rng;
pub mod socket;
pub mod task;
pub mod time;
pub mod vmo;
pub mod wait;
pub mod waitset;

use helion_syscall::{Rights, Status, Time};

pub use dispatcher::{dispatch, SyscallFrame};

/// Decode a raw rights argument. `SAME_RIGHTS` may only appear alone.
pub(crate) fn decode_rights(raw: u32) -> Result<Rights, Status> {
    let rights = Rights::from_bits(raw).ok_or(Status::InvalidArgs)?;
    if rights.contains(Rights::SAME_RIGHTS) && rights != Rights::SAME_RIGHTS {
        return Err(Status::InvalidArgs);
    }
    Ok(rights)
}

/// Convert a relative timeout to a park deadline. A zero timeout means
/// "try without blocking": the deadline is already in the past, so the
/// first park reports `TimedOut` after one condition check.
pub(crate) fn timeout_to_deadline(timeout: Time) -> Option<Time> {
    crate::sched::deadline_after(timeout)
}
