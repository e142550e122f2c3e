//! Time syscalls: current_time, nanosleep.

use helion_syscall::{Status, Time};

use crate::sched::{self, ParkResult};

/// Monotonic nanoseconds since boot.
pub fn sys_current_time() -> Time {
    sched::now()
}

/// Interruptible sleep. Unparks without a pending interrupt (spurious
/// wakes) go back to sleep until the deadline.
pub fn sys_nanosleep(nanoseconds: Time) -> Result<(), Status> {
    let Some(deadline) = sched::deadline_after(nanoseconds) else {
        // Sleeping forever only ends by interruption.
        loop {
            sched::park_current(None);
            if sched::current_interrupted() {
                return Err(Status::Interrupted);
            }
        }
    };

    loop {
        if sched::current_interrupted() {
            return Err(Status::Interrupted);
        }
        match sched::park_current(Some(deadline)) {
            ParkResult::TimedOut => return Ok(()),
            ParkResult::Woken => continue,
        }
    }
}
