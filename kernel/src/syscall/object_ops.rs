//! Generic object operations: info, properties, user signals, exception
//! port binding.

use alloc::sync::Arc;

use helion_syscall::data::{
    HandleBasicRecord, InfoHeader, ProcessRecord, INFO_TOPIC_HANDLE_BASIC,
    INFO_TOPIC_HANDLE_VALID, INFO_TOPIC_PROCESS, OBJ_PROP_WAITABLE, PROP_BAD_HANDLE_POLICY,
    PROP_DATAPIPE_READ_THRESHOLD, PROP_DATAPIPE_WRITE_THRESHOLD,
};
use helion_syscall::{HandleValue, Rights, Signals, Status, HANDLE_INVALID};
use zerocopy::AsBytes;

use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::DispatcherKind;
use crate::process::exception::{
    self, ExceptionPort,
};
use crate::process::ProcessDispatcher;

pub fn sys_object_get_info(
    up: &Arc<ProcessDispatcher>,
    value: HandleValue,
    topic: u32,
    topic_size: usize,
    buffer_ptr: u64,
    buffer_len: usize,
) -> Result<usize, Status> {
    match topic {
        INFO_TOPIC_HANDLE_VALID => {
            // Validity probe only; no policy routing, no output.
            up.get_dispatcher(value).map(|_| 0)
        }
        INFO_TOPIC_HANDLE_BASIC => {
            let (dispatcher, rights) = up
                .get_dispatcher(value)
                .map_err(|e| up.bad_handle(value, e))?;

            if topic_size != 0 && topic_size != core::mem::size_of::<HandleBasicRecord>() {
                return Err(Status::InvalidArgs);
            }
            if buffer_ptr == 0 {
                return Err(Status::InvalidArgs);
            }
            if buffer_len < core::mem::size_of::<InfoHeader>() + topic_size {
                return Err(Status::BufferTooSmall);
            }

            let header = InfoHeader {
                topic,
                avail_topic_size: core::mem::size_of::<HandleBasicRecord>() as u16,
                topic_size: topic_size as u16,
                avail_count: 1,
                count: 1,
            };

            let mut out = alloc::vec::Vec::new();
            out.extend_from_slice(header.as_bytes());
            if topic_size != 0 {
                let record = HandleBasicRecord {
                    koid: dispatcher.koid(),
                    rights: rights.bits(),
                    obj_type: dispatcher.object_type() as u32,
                    props: if dispatcher.is_waitable() {
                        OBJ_PROP_WAITABLE
                    } else {
                        0
                    },
                    reserved: 0,
                };
                out.extend_from_slice(record.as_bytes());
            }
            UserSliceWrite::new(up.aspace(), buffer_ptr, out.len())?.copy_from(&out)?;
            Ok(out.len())
        }
        INFO_TOPIC_PROCESS => {
            let dispatcher = up.get_dispatcher_with_rights(value, Rights::READ)?;
            let process = dispatcher.as_process()?;

            if topic_size != 0 && topic_size != core::mem::size_of::<ProcessRecord>() {
                return Err(Status::InvalidArgs);
            }
            if buffer_ptr == 0 {
                return Err(Status::InvalidArgs);
            }
            if buffer_len < core::mem::size_of::<InfoHeader>() + topic_size {
                return Err(Status::BufferTooSmall);
            }

            let header = InfoHeader {
                topic,
                avail_topic_size: core::mem::size_of::<ProcessRecord>() as u16,
                topic_size: topic_size as u16,
                avail_count: 1,
                count: 1,
            };

            let mut out = alloc::vec::Vec::new();
            out.extend_from_slice(header.as_bytes());
            if topic_size != 0 {
                let record = ProcessRecord {
                    return_code: process.retcode(),
                };
                out.extend_from_slice(record.as_bytes());
            }
            UserSliceWrite::new(up.aspace(), buffer_ptr, out.len())?.copy_from(&out)?;
            Ok(out.len())
        }
        _ => Err(Status::NotFound),
    }
}

pub fn sys_object_get_property(
    up: &Arc<ProcessDispatcher>,
    value: HandleValue,
    property: u32,
    out_ptr: u64,
    out_len: usize,
) -> Result<(), Status> {
    if out_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(value, Rights::GET_PROPERTY)?;

    match property {
        PROP_BAD_HANDLE_POLICY => {
            if out_len < 4 {
                return Err(Status::BufferTooSmall);
            }
            let process = dispatcher.as_process()?;
            UserSliceWrite::new(up.aspace(), out_ptr, 4)?.write_u32(process.bad_handle_policy())
        }
        PROP_DATAPIPE_WRITE_THRESHOLD => {
            if out_len < 8 {
                return Err(Status::BufferTooSmall);
            }
            let producer = dispatcher.as_data_producer()?;
            let bytes = (producer.write_threshold() as u64).to_le_bytes();
            UserSliceWrite::new(up.aspace(), out_ptr, 8)?.copy_from(&bytes).map(|_| ())
        }
        PROP_DATAPIPE_READ_THRESHOLD => {
            if out_len < 8 {
                return Err(Status::BufferTooSmall);
            }
            let consumer = dispatcher.as_data_consumer()?;
            let bytes = (consumer.read_threshold() as u64).to_le_bytes();
            UserSliceWrite::new(up.aspace(), out_ptr, 8)?.copy_from(&bytes).map(|_| ())
        }
        _ => Err(Status::InvalidArgs),
    }
}

pub fn sys_object_set_property(
    up: &Arc<ProcessDispatcher>,
    value: HandleValue,
    property: u32,
    in_ptr: u64,
    in_len: usize,
) -> Result<(), Status> {
    if in_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(value, Rights::SET_PROPERTY)?;

    match property {
        PROP_BAD_HANDLE_POLICY => {
            if in_len < 4 {
                return Err(Status::BufferTooSmall);
            }
            let process = dispatcher.as_process()?;
            let raw = UserSliceRead::new(up.aspace(), in_ptr, 4)?.read_u32()?;
            process.set_bad_handle_policy(raw)
        }
        PROP_DATAPIPE_WRITE_THRESHOLD => {
            if in_len < 8 {
                return Err(Status::BufferTooSmall);
            }
            let producer = dispatcher.as_data_producer()?;
            let buf = UserSliceRead::new(up.aspace(), in_ptr, 8)?.read_to_vec()?;
            let threshold = u64::from_le_bytes(buf.try_into().unwrap());
            producer.set_write_threshold(threshold as usize)
        }
        PROP_DATAPIPE_READ_THRESHOLD => {
            if in_len < 8 {
                return Err(Status::BufferTooSmall);
            }
            let consumer = dispatcher.as_data_consumer()?;
            let buf = UserSliceRead::new(up.aspace(), in_ptr, 8)?.read_to_vec()?;
            let threshold = u64::from_le_bytes(buf.try_into().unwrap());
            consumer.set_read_threshold(threshold as usize)
        }
        _ => Err(Status::InvalidArgs),
    }
}

pub fn sys_object_signal(
    up: &Arc<ProcessDispatcher>,
    value: HandleValue,
    clear: u32,
    set: u32,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(value, Rights::WRITE)?;
    dispatcher.user_signal(
        Signals::from_bits(clear).ok_or(Status::InvalidArgs)?,
        Signals::from_bits(set).ok_or(Status::InvalidArgs)?,
    )
}

/// Bind (or, with an invalid eport handle, unbind) an exception port at
/// thread, process or system scope. An invalid object handle addresses
/// the system scope.
pub fn sys_object_bind_exception_port(
    up: &Arc<ProcessDispatcher>,
    obj: HandleValue,
    eport: HandleValue,
    key: u64,
    options: u32,
) -> Result<(), Status> {
    if options != 0 {
        return Err(Status::InvalidArgs);
    }

    if eport == HANDLE_INVALID {
        // Unbind.
        if obj == HANDLE_INVALID {
            exception::reset_system_exception_port();
            return Ok(());
        }
        let (dispatcher, _) = up.get_dispatcher(obj).map_err(|e| up.bad_handle(obj, e))?;
        return match dispatcher.kind() {
            DispatcherKind::Process(p) => {
                p.reset_exception_port();
                Ok(())
            }
            DispatcherKind::Thread(t) => {
                t.reset_exception_port();
                Ok(())
            }
            _ => Err(Status::WrongType),
        };
    }

    let (pipe, _) = up
        .get_dispatcher(eport)
        .map_err(|e| up.bad_handle(eport, e))?;
    let eport = ExceptionPort::create(pipe, key)?;

    if obj == HANDLE_INVALID {
        return exception::set_system_exception_port(eport);
    }

    let (dispatcher, _) = up.get_dispatcher(obj).map_err(|e| up.bad_handle(obj, e))?;
    match dispatcher.kind() {
        DispatcherKind::Process(p) => p.set_exception_port(eport),
        DispatcherKind::Thread(t) => t.set_exception_port(eport),
        _ => Err(Status::WrongType),
    }
}
