//! Task syscalls: process/thread creation and lifecycle, kill, resume.

use alloc::string::String;
use alloc::sync::Arc;

use helion_syscall::data::{
    EXCEPTION_STATUS_NOT_HANDLED, EXCEPTION_STATUS_RESUME, RESUME_EXCEPTION, RESUME_NOT_HANDLED,
};
use helion_syscall::{HandleValue, Rights, Status, MAX_NAME_LEN};

use crate::memory::UserSliceRead;
use crate::object::handle;
use crate::object::DispatcherKind;
use crate::process::thread::{ThreadDispatcher, UserThread};
use crate::process::ProcessDispatcher;

fn read_name(up: &Arc<ProcessDispatcher>, ptr: u64, len: usize) -> Result<String, Status> {
    if len > MAX_NAME_LEN {
        return Err(Status::InvalidArgs);
    }
    if len == 0 {
        return Ok(String::new());
    }
    let bytes = UserSliceRead::new(up.aspace(), ptr, len)?.read_to_vec()?;
    String::from_utf8(bytes).map_err(|_| Status::InvalidArgs)
}

pub fn sys_process_create(
    up: &Arc<ProcessDispatcher>,
    name_ptr: u64,
    name_len: usize,
    flags: u32,
) -> Result<HandleValue, Status> {
    let name = read_name(up, name_ptr, name_len)?;
    let (dispatcher, rights) = ProcessDispatcher::create(&name, flags)?;
    let handle = handle::make_handle(dispatcher, rights)?;
    Ok(up.add_handle(handle))
}

/// Start `process`'s initial thread. The argument handle is moved into
/// the target process and its value there lands in the thread's first
/// argument register.
pub fn sys_process_start(
    up: &Arc<ProcessDispatcher>,
    process_value: HandleValue,
    thread_value: HandleValue,
    pc: u64,
    sp: u64,
    arg_handle: HandleValue,
    arg2: u64,
) -> Result<(), Status> {
    let process_dispatcher = up.get_dispatcher_with_rights(process_value, Rights::WRITE)?;
    let process = process_dispatcher.as_process()?.clone();

    let thread_dispatcher = up.get_dispatcher_with_rights(thread_value, Rights::WRITE)?;
    let thread = thread_dispatcher.as_thread()?.thread().clone();

    if !Arc::ptr_eq(thread.process(), &process) {
        return Err(Status::AccessDenied);
    }

    // Move the argument handle into the target process.
    let arg_owner = up
        .with_table_locked(|t| {
            let id = t.lookup(arg_handle)?;
            let rights = handle::with_handle(id, |h| h.rights()).expect("looked-up handle");
            if !rights.covers(Rights::TRANSFER) {
                return Err(Status::AccessDenied);
            }
            t.remove_handle(arg_handle)
        })
        .map_err(|e| up.bad_handle(arg_handle, e))?;
    let arg_value = process.add_handle_checked(arg_owner)?;

    process.start(&thread, pc, sp, arg_value as u64, arg2)
}

pub fn sys_thread_create(
    up: &Arc<ProcessDispatcher>,
    process_value: HandleValue,
    name_ptr: u64,
    name_len: usize,
    _flags: u32,
) -> Result<HandleValue, Status> {
    let process_dispatcher = up.get_dispatcher_with_rights(process_value, Rights::WRITE)?;
    let process = process_dispatcher.as_process()?.clone();
    let name = read_name(up, name_ptr, name_len)?;

    let thread = UserThread::create(process, &name);
    let (dispatcher, rights) = ThreadDispatcher::create(thread);
    let handle = handle::make_handle(dispatcher, rights)?;
    Ok(up.add_handle(handle))
}

pub fn sys_thread_start(
    up: &Arc<ProcessDispatcher>,
    thread_value: HandleValue,
    pc: u64,
    sp: u64,
    arg1: u64,
    arg2: u64,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(thread_value, Rights::WRITE)?;
    let thread = dispatcher.as_thread()?;
    // Starting a bare thread in an INITIAL process is a caller bug;
    // process_start is the front door for the first thread.
    if thread.thread().process().state() == crate::process::process::ProcessState::Initial {
        return Err(Status::BadState);
    }
    thread.start(pc, sp, arg1, arg2)
}

/// Voluntary exit of the calling thread. The caller must unwind to the
/// thread wrapper right after this returns.
pub fn sys_thread_exit() -> Result<(), Status> {
    let thread = crate::process::current_thread().ok_or(Status::BadState)?;
    thread.begin_exit();
    Ok(())
}

/// Voluntary exit of the calling process.
pub fn sys_exit(retcode: i32) -> Result<(), Status> {
    let process = crate::process::current_process()?;
    process.exit(retcode);
    if let Some(thread) = crate::process::current_thread() {
        thread.begin_exit();
    }
    Ok(())
}

pub fn sys_task_kill(up: &Arc<ProcessDispatcher>, task: HandleValue) -> Result<(), Status> {
    let (dispatcher, rights) = up.get_dispatcher(task).map_err(|e| up.bad_handle(task, e))?;
    if !rights.covers(Rights::WRITE) {
        return Err(Status::AccessDenied);
    }
    match dispatcher.kind() {
        DispatcherKind::Process(p) => {
            p.kill();
            Ok(())
        }
        DispatcherKind::Thread(t) => {
            t.kill();
            Ok(())
        }
        _ => Err(Status::WrongType),
    }
}

/// Resume a thread stopped in an exception, marking the fault handled or
/// passing it to the next scope.
pub fn sys_task_resume(
    up: &Arc<ProcessDispatcher>,
    task: HandleValue,
    options: u32,
) -> Result<(), Status> {
    if options & !(RESUME_EXCEPTION | RESUME_NOT_HANDLED) != 0 {
        return Err(Status::InvalidArgs);
    }
    let (dispatcher, _) = up.get_dispatcher(task).map_err(|e| up.bad_handle(task, e))?;
    let thread = dispatcher.as_thread()?;

    if options & RESUME_EXCEPTION != 0 {
        let status = if options & RESUME_NOT_HANDLED != 0 {
            EXCEPTION_STATUS_NOT_HANDLED
        } else {
            EXCEPTION_STATUS_RESUME
        };
        return thread.thread().mark_exception_handled(status);
    }

    // Generic suspend/resume is not part of the core.
    Err(Status::NotSupported)
}
