//! Futex syscall handlers. The queues live in the calling process's
//! futex context; see [`crate::process::futex`].

use alloc::sync::Arc;

use helion_syscall::{Status, Time};

use crate::process::ProcessDispatcher;
use crate::syscall::timeout_to_deadline;

pub fn sys_futex_wait(
    up: &Arc<ProcessDispatcher>,
    addr: u64,
    expected: u32,
    timeout: Time,
) -> Result<(), Status> {
    up.futex_context()
        .wait(up.aspace(), addr, expected, timeout_to_deadline(timeout))
}

pub fn sys_futex_wake(
    up: &Arc<ProcessDispatcher>,
    addr: u64,
    count: usize,
) -> Result<usize, Status> {
    up.futex_context().wake(addr, count)
}

pub fn sys_futex_requeue(
    up: &Arc<ProcessDispatcher>,
    wake_addr: u64,
    wake_count: usize,
    expected: u32,
    requeue_addr: u64,
    requeue_count: usize,
) -> Result<usize, Status> {
    up.futex_context().requeue(
        up.aspace(),
        wake_addr,
        wake_count,
        expected,
        requeue_addr,
        requeue_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use helion_syscall::TIME_INFINITE;

    /// A parked waiter is released by a wake after the value changes; a
    /// stale value refuses to park at all.
    #[test]
    fn park_wake_and_stale_value() {
        let (up, base) = testutil::new_process_with_mem("futex-sys", 1);
        testutil::poke_u32(&up, base, 7);

        let waiter = {
            let up = up.clone();
            std::thread::spawn(move || sys_futex_wait(&up, base, 7, TIME_INFINITE))
        };
        while up.futex_context().waiter_count(base) == 0 {
            std::thread::yield_now();
        }

        testutil::poke_u32(&up, base, 8);
        assert_eq!(sys_futex_wake(&up, base, 1).unwrap(), 1);
        waiter.join().unwrap().unwrap();

        // With the value already changed, wait refuses immediately.
        assert_eq!(
            sys_futex_wait(&up, base, 7, TIME_INFINITE),
            Err(Status::AlreadyBound)
        );
    }

    #[test]
    fn misaligned_address_is_invalid() {
        let (up, base) = testutil::new_process_with_mem("futex-align", 1);
        assert_eq!(
            sys_futex_wait(&up, base + 2, 0, 0),
            Err(Status::InvalidArgs)
        );
        assert_eq!(sys_futex_wake(&up, base + 2, 1), Err(Status::InvalidArgs));
    }
}
