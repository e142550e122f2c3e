//! Kernel log syscalls.

use alloc::sync::Arc;

use helion_syscall::data::{LOG_FLAG_WAIT, LOG_RECORD_MAX};
use helion_syscall::{HandleValue, Rights, Status};

use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::object::log::LogDispatcher;
use crate::process::ProcessDispatcher;

pub fn sys_log_create(up: &Arc<ProcessDispatcher>, flags: u32) -> Result<HandleValue, Status> {
    let (dispatcher, rights) = LogDispatcher::create(flags);
    let h = handle::make_handle(dispatcher, rights)?;
    Ok(up.add_handle(h))
}

pub fn sys_log_write(
    up: &Arc<ProcessDispatcher>,
    log: HandleValue,
    len: usize,
    ptr: u64,
    flags: u32,
) -> Result<(), Status> {
    if len > LOG_RECORD_MAX {
        return Err(Status::OutOfRange);
    }
    let dispatcher = up.get_dispatcher_with_rights(log, Rights::WRITE)?;
    let data = UserSliceRead::new(up.aspace(), ptr, len)?.read_to_vec()?;
    dispatcher.as_log()?.write(&data, flags)
}

pub fn sys_log_read(
    up: &Arc<ProcessDispatcher>,
    log: HandleValue,
    len: usize,
    ptr: u64,
    flags: u32,
) -> Result<usize, Status> {
    let dispatcher = up.get_dispatcher_with_rights(log, Rights::READ)?;
    let log = dispatcher.as_log()?;

    loop {
        match log.read(len) {
            Ok(record) => {
                UserSliceWrite::new(up.aspace(), ptr, record.len())?.copy_from(&record)?;
                return Ok(record.len());
            }
            Err(Status::ShouldWait) if flags & LOG_FLAG_WAIT != 0 => {
                log.wait_readable()?;
            }
            Err(e) => return Err(e),
        }
    }
}
