//! The numeric syscall dispatcher.
//!
//! Routes syscall numbers to typed handlers and converts results to the
//! raw return-register value (non-negative payload, negative status). The
//! architecture's trap entry re-enables interrupts, packs the argument
//! registers into a [`SyscallFrame`] and calls [`dispatch`]; on the way
//! out, pending thread signals run (a kill observed mid-syscall makes the
//! thread unwind on return to user mode).

use alloc::sync::Arc;

use helion_syscall::number::*;
use helion_syscall::status::into_raw;
use helion_syscall::{HandleValue, Status, Time};

use crate::memory::UserSliceWrite;
use crate::object::event::{EventDispatcher, EventPairDispatcher};
use crate::object::handle;
use crate::process::{self, thread::ThreadState, ProcessDispatcher};
use crate::syscall::log as log_ops;
use crate::syscall::{
    datapipe, futex, handle_ops, object_ops, pipe, port, rng, socket, task, time, vmo, wait,
    waitset,
};

/// Argument registers as the trap entry captured them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallFrame {
    pub num: u32,
    pub args: [u64; 6],
}

impl SyscallFrame {
    pub fn new(num: u32, args: [u64; 6]) -> Self {
        SyscallFrame { num, args }
    }
}

/// Dispatch one syscall for the calling thread.
pub fn dispatch(frame: &SyscallFrame) -> u64 {
    let up = match process::current_process() {
        Ok(up) => up,
        Err(e) => return e.to_raw(),
    };

    let [a1, a2, a3, a4, a5, a6] = frame.args;

    let result: u64 = match frame.num {
        SYS_NULL => 0,
        SYS_HANDLE_CLOSE => into_raw(handle_ops::sys_handle_close(&up, a1 as i32), |_| 0),
        SYS_HANDLE_DUPLICATE => into_raw(
            handle_ops::sys_handle_duplicate(&up, a1 as i32, a2 as u32),
            |h| h as u64,
        ),
        SYS_HANDLE_REPLACE => into_raw(
            handle_ops::sys_handle_replace(&up, a1 as i32, a2 as u32),
            |h| h as u64,
        ),
        SYS_HANDLE_WAIT_ONE => into_raw(
            wait::sys_handle_wait_one(&up, a1 as i32, a2 as u32, a3 as Time, a4),
            |_| 0,
        ),
        SYS_HANDLE_WAIT_MANY => into_raw(
            wait::sys_handle_wait_many(&up, a1 as usize, a2, a3, a4 as Time, a5, a6),
            |_| 0,
        ),
        SYS_OBJECT_GET_INFO => into_raw(
            object_ops::sys_object_get_info(&up, a1 as i32, a2 as u32, a3 as usize, a4, a5 as usize),
            |n| n as u64,
        ),
        SYS_OBJECT_GET_PROPERTY => into_raw(
            object_ops::sys_object_get_property(&up, a1 as i32, a2 as u32, a3, a4 as usize),
            |_| 0,
        ),
        SYS_OBJECT_SET_PROPERTY => into_raw(
            object_ops::sys_object_set_property(&up, a1 as i32, a2 as u32, a3, a4 as usize),
            |_| 0,
        ),
        SYS_OBJECT_SIGNAL => into_raw(
            object_ops::sys_object_signal(&up, a1 as i32, a2 as u32, a3 as u32),
            |_| 0,
        ),
        SYS_OBJECT_BIND_EXCEPTION_PORT => into_raw(
            object_ops::sys_object_bind_exception_port(&up, a1 as i32, a2 as i32, a3, a4 as u32),
            |_| 0,
        ),

        SYS_VMO_CREATE => into_raw(vmo::sys_vmo_create(&up, a1), |h| h as u64),
        SYS_VMO_READ => into_raw(vmo::sys_vmo_read(&up, a1 as i32, a2, a3, a4 as usize), |n| {
            n as u64
        }),
        SYS_VMO_WRITE => into_raw(vmo::sys_vmo_write(&up, a1 as i32, a2, a3, a4 as usize), |n| {
            n as u64
        }),
        SYS_VMO_GET_SIZE => into_raw(vmo::sys_vmo_get_size(&up, a1 as i32, a2), |_| 0),
        SYS_VMO_SET_SIZE => into_raw(vmo::sys_vmo_set_size(&up, a1 as i32, a2), |_| 0),
        SYS_VMO_OP_RANGE => into_raw(
            vmo::sys_vmo_op_range(&up, a1 as i32, a2 as u32, a3, a4),
            |_| 0,
        ),
        SYS_PROCESS_MAP_VM => into_raw(
            vmo::sys_process_map_vm(&up, a1 as i32, a2 as i32, a3, a4, a5, a6 as u32),
            |_| 0,
        ),
        SYS_PROCESS_UNMAP_VM => into_raw(
            vmo::sys_process_unmap_vm(&up, a1 as i32, a2, a3),
            |_| 0,
        ),
        SYS_PROCESS_PROTECT_VM => into_raw(
            vmo::sys_process_protect_vm(&up, a1 as i32, a2, a3, a4 as u32),
            |_| 0,
        ),

        SYS_MSGPIPE_CREATE => into_raw(pipe::sys_msgpipe_create(&up, a1, a2 as u32), |_| 0),
        SYS_MSGPIPE_READ => into_raw(
            pipe::sys_msgpipe_read(&up, a1 as i32, a2, a3, a4, a5, a6 as u32),
            |_| 0,
        ),
        SYS_MSGPIPE_WRITE => into_raw(
            pipe::sys_msgpipe_write(&up, a1 as i32, a2, a3 as usize, a4, a5 as usize, a6 as u32),
            |_| 0,
        ),

        SYS_DATAPIPE_CREATE => into_raw(
            datapipe::sys_datapipe_create(&up, a1 as u32, a2 as usize, a3 as usize, a4),
            |h| h as u64,
        ),
        SYS_DATAPIPE_WRITE => into_raw(
            datapipe::sys_datapipe_write(&up, a1 as i32, a2 as u32, a3 as usize, a4),
            |n| n as u64,
        ),
        SYS_DATAPIPE_READ => into_raw(
            datapipe::sys_datapipe_read(&up, a1 as i32, a2 as u32, a3 as usize, a4),
            |n| n as u64,
        ),
        SYS_DATAPIPE_BEGIN_WRITE => into_raw(
            datapipe::sys_datapipe_begin_write(&up, a1 as i32, a2 as u32, a3),
            |n| n as u64,
        ),
        SYS_DATAPIPE_END_WRITE => into_raw(
            datapipe::sys_datapipe_end_write(&up, a1 as i32, a2 as usize),
            |_| 0,
        ),
        SYS_DATAPIPE_BEGIN_READ => into_raw(
            datapipe::sys_datapipe_begin_read(&up, a1 as i32, a2 as u32, a3),
            |n| n as u64,
        ),
        SYS_DATAPIPE_END_READ => into_raw(
            datapipe::sys_datapipe_end_read(&up, a1 as i32, a2 as usize),
            |_| 0,
        ),

        SYS_SOCKET_CREATE => into_raw(socket::sys_socket_create(&up, a1, a2 as u32), |_| 0),
        SYS_SOCKET_WRITE => into_raw(
            socket::sys_socket_write(&up, a1 as i32, a2 as u32, a3, a4 as usize),
            |n| n as u64,
        ),
        SYS_SOCKET_READ => into_raw(
            socket::sys_socket_read(&up, a1 as i32, a2 as u32, a3, a4 as usize),
            |n| n as u64,
        ),

        SYS_PORT_CREATE => into_raw(port::sys_port_create(&up, a1 as u32), |h| h as u64),
        SYS_PORT_QUEUE => into_raw(
            port::sys_port_queue(&up, a1 as i32, a2, a3 as usize),
            |_| 0,
        ),
        SYS_PORT_WAIT => into_raw(port::sys_port_wait(&up, a1 as i32, a2, a3 as usize), |_| 0),
        SYS_PORT_BIND => into_raw(
            port::sys_port_bind(&up, a1 as i32, a2, a3 as i32, a4 as u32),
            |_| 0,
        ),

        SYS_WAITSET_CREATE => into_raw(waitset::sys_waitset_create(&up), |h| h as u64),
        SYS_WAITSET_ADD => into_raw(
            waitset::sys_waitset_add(&up, a1 as i32, a2, a3 as i32, a4 as u32),
            |_| 0,
        ),
        SYS_WAITSET_REMOVE => into_raw(waitset::sys_waitset_remove(&up, a1 as i32, a2), |_| 0),
        SYS_WAITSET_WAIT => into_raw(
            waitset::sys_waitset_wait(&up, a1 as i32, a2 as Time, a3, a4, a5),
            |_| 0,
        ),

        SYS_PROCESS_CREATE => into_raw(
            task::sys_process_create(&up, a1, a2 as usize, a3 as u32),
            |h| h as u64,
        ),
        SYS_PROCESS_START => into_raw(
            task::sys_process_start(&up, a1 as i32, a2 as i32, a3, a4, a5 as i32, a6),
            |_| 0,
        ),
        SYS_THREAD_CREATE => into_raw(
            task::sys_thread_create(&up, a1 as i32, a2, a3 as usize, a4 as u32),
            |h| h as u64,
        ),
        SYS_THREAD_START => into_raw(
            task::sys_thread_start(&up, a1 as i32, a2, a3, a4, a5),
            |_| 0,
        ),
        SYS_THREAD_EXIT => into_raw(task::sys_thread_exit(), |_| 0),
        SYS_TASK_KILL => into_raw(task::sys_task_kill(&up, a1 as i32), |_| 0),
        SYS_TASK_RESUME => into_raw(task::sys_task_resume(&up, a1 as i32, a2 as u32), |_| 0),
        SYS_EXIT => into_raw(task::sys_exit(a1 as i32), |_| 0),

        SYS_FUTEX_WAIT => into_raw(
            futex::sys_futex_wait(&up, a1, a2 as u32, a3 as Time),
            |_| 0,
        ),
        SYS_FUTEX_WAKE => into_raw(futex::sys_futex_wake(&up, a1, a2 as usize), |n| n as u64),
        SYS_FUTEX_REQUEUE => into_raw(
            futex::sys_futex_requeue(&up, a1, a2 as usize, a3 as u32, a4, a5 as usize),
            |n| n as u64,
        ),

        SYS_NANOSLEEP => into_raw(time::sys_nanosleep(a1 as Time), |_| 0),
        SYS_CURRENT_TIME => time::sys_current_time(),
        SYS_CPRNG_DRAW => into_raw(rng::sys_cprng_draw(&up, a1, a2 as usize), |n| n as u64),
        SYS_CPRNG_ADD_ENTROPY => into_raw(rng::sys_cprng_add_entropy(&up, a1, a2 as usize), |_| 0),

        SYS_EVENT_CREATE => into_raw(sys_event_create(&up, a1 as u32), |h| h as u64),
        SYS_EVENTPAIR_CREATE => into_raw(sys_eventpair_create(&up, a1), |_| 0),

        SYS_LOG_CREATE => into_raw(log_ops::sys_log_create(&up, a1 as u32), |h| h as u64),
        SYS_LOG_WRITE => into_raw(
            log_ops::sys_log_write(&up, a1 as i32, a2 as usize, a3, a4 as u32),
            |_| 0,
        ),
        SYS_LOG_READ => into_raw(
            log_ops::sys_log_read(&up, a1 as i32, a2 as usize, a3, a4 as u32),
            |n| n as u64,
        ),

        _ => {
            log::warn!("unknown syscall {} ({:#x})", frame.num, frame.num);
            Status::NotSupported.to_raw()
        }
    };

    // Pending thread signals: a kill observed mid-syscall means the thread
    // must unwind instead of running more user code.
    if let Some(thread) = process::current_thread() {
        if matches!(thread.state(), ThreadState::Dying) {
            crate::sched::yield_now();
        }
    }

    result
}

fn sys_event_create(up: &Arc<ProcessDispatcher>, options: u32) -> Result<HandleValue, Status> {
    let (dispatcher, rights) = EventDispatcher::create(options);
    let h = handle::make_handle(dispatcher, rights)?;
    Ok(up.add_handle(h))
}

fn sys_eventpair_create(up: &Arc<ProcessDispatcher>, out_handles_ptr: u64) -> Result<(), Status> {
    if out_handles_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let (d0, d1, rights) = EventPairDispatcher::create();
    let h0 = handle::make_handle(d0, rights)?;
    let h1 = handle::make_handle(d1, rights)?;

    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&up.map_handle_to_value(h0.id()).to_le_bytes());
    bytes[4..].copy_from_slice(&up.map_handle_to_value(h1.id()).to_le_bytes());
    UserSliceWrite::new(up.aspace(), out_handles_ptr, 8)?.copy_from(&bytes)?;

    up.add_handle(h0);
    up.add_handle(h1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    /// Drive a couple of calls through the numeric surface from inside a
    /// real program, the way the trap glue would.
    #[test]
    fn numeric_dispatch_end_to_end() {
        use std::sync::atomic::{AtomicU64, Ordering};
        static EVENT_RAW: AtomicU64 = AtomicU64::new(u64::MAX);

        let (up, base) = testutil::new_process_with_mem("abi", 2);

        const PC: u64 = 0x21_0000;
        crate::sched::host::register_program(PC, |_| {
            let raw = dispatch(&SyscallFrame::new(SYS_EVENT_CREATE, [0; 6]));
            EVENT_RAW.store(raw, Ordering::SeqCst);
            // Unknown syscalls are rejected, not fatal.
            let bad = dispatch(&SyscallFrame::new(9999, [0; 6]));
            assert_eq!(bad as i64, Status::NotSupported.as_i32() as i64);
            // current_time flows through.
            assert!(dispatch(&SyscallFrame::new(SYS_CURRENT_TIME, [0; 6])) > 0);
        });

        testutil::poke(&up, base, b"abi");
        let proc_hv = crate::syscall::task::sys_process_create(&up, base, 3, 0).unwrap();
        let thread_hv =
            crate::syscall::task::sys_thread_create(&up, proc_hv, base, 3, 0).unwrap();
        let (event, rights) = EventDispatcher::create(0);
        let arg = up.add_handle(handle::make_handle(event, rights).unwrap());
        crate::syscall::task::sys_process_start(&up, proc_hv, thread_hv, PC, 0, arg, 0).unwrap();

        let (child, _) = up.get_dispatcher(proc_hv).unwrap();
        let child = child.as_process().unwrap().clone();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while child.state() != crate::process::process::ProcessState::Dead {
            assert!(std::time::Instant::now() < deadline);
            std::thread::yield_now();
        }

        let raw = EVENT_RAW.load(Ordering::SeqCst);
        // A handle value: positive, odd encoding bit set.
        assert!((raw as i64) > 0);
    }
}
