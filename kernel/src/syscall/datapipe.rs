//! Data-pipe syscalls: create, copy-mode read/write, two-phase begin/end.

use alloc::sync::Arc;

use helion_syscall::data::{DataPipeReadFlags, DATAPIPE_WRITE_FLAG_ALL_OR_NONE};
use helion_syscall::{HandleValue, Rights, Status};

use crate::ipc::data_pipe::{DataPipe, ReadOptions};
use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::process::ProcessDispatcher;

/// Capacity used when the caller passes zero, trimmed to a whole number
/// of elements.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Returns the producer handle; the consumer handle is written to
/// `consumer_ptr`.
pub fn sys_datapipe_create(
    up: &Arc<ProcessDispatcher>,
    _options: u32,
    element_size: usize,
    mut capacity: usize,
    consumer_ptr: u64,
) -> Result<HandleValue, Status> {
    if consumer_ptr == 0 || element_size == 0 {
        return Err(Status::InvalidArgs);
    }
    if capacity == 0 {
        capacity = DEFAULT_CAPACITY - (DEFAULT_CAPACITY % element_size);
        if capacity == 0 {
            capacity = element_size;
        }
    }

    let (producer, consumer, producer_rights, consumer_rights) =
        DataPipe::create(element_size, capacity)?;

    let producer_handle = handle::make_handle(producer, producer_rights)?;
    let consumer_handle = handle::make_handle(consumer, consumer_rights)?;

    let consumer_value = up.map_handle_to_value(consumer_handle.id());
    UserSliceWrite::new(up.aspace(), consumer_ptr, 4)?.write_u32(consumer_value as u32)?;

    let producer_value = up.add_handle(producer_handle);
    up.add_handle(consumer_handle);
    Ok(producer_value)
}

pub fn sys_datapipe_write(
    up: &Arc<ProcessDispatcher>,
    producer: HandleValue,
    flags: u32,
    requested: usize,
    buffer_ptr: u64,
) -> Result<usize, Status> {
    if flags & !DATAPIPE_WRITE_FLAG_ALL_OR_NONE != 0 {
        return Err(Status::NotSupported);
    }
    let dispatcher = up.get_dispatcher_with_rights(producer, Rights::WRITE)?;
    let producer = dispatcher.as_data_producer()?;

    let data = UserSliceRead::new(up.aspace(), buffer_ptr, requested)?.read_to_vec()?;
    producer.write(&data, flags & DATAPIPE_WRITE_FLAG_ALL_OR_NONE != 0)
}

pub fn sys_datapipe_read(
    up: &Arc<ProcessDispatcher>,
    consumer: HandleValue,
    flags: u32,
    requested: usize,
    buffer_ptr: u64,
) -> Result<usize, Status> {
    let flags = DataPipeReadFlags::from_bits(flags).ok_or(Status::NotSupported)?;
    let dispatcher = up.get_dispatcher_with_rights(consumer, Rights::READ)?;
    let consumer = dispatcher.as_data_consumer()?;

    // DISCARD, QUERY and PEEK are mutually exclusive.
    let modes = flags
        & (DataPipeReadFlags::DISCARD | DataPipeReadFlags::QUERY | DataPipeReadFlags::PEEK);
    if modes.bits().count_ones() > 1 {
        return Err(Status::InvalidArgs);
    }

    if flags.contains(DataPipeReadFlags::QUERY) {
        return Ok(consumer.query());
    }

    let opts = ReadOptions {
        all_or_none: flags.contains(DataPipeReadFlags::ALL_OR_NONE),
        discard: flags.contains(DataPipeReadFlags::DISCARD),
        peek: flags.contains(DataPipeReadFlags::PEEK),
    };

    if opts.discard {
        // No user buffer bounds a discard; cap the request at what any
        // pipe could possibly hold.
        if requested > helion_syscall::data::MAX_DATA_PIPE_CAPACITY {
            return Err(Status::InvalidArgs);
        }
        let mut sink = alloc::vec![0u8; requested];
        return consumer.read(&mut sink, opts);
    }

    let out = UserSliceWrite::new(up.aspace(), buffer_ptr, requested)?;
    let mut buf = alloc::vec![0u8; requested];
    let n = consumer.read(&mut buf, opts)?;
    out.copy_from(&buf[..n])?;
    Ok(n)
}

/// Two-phase producer: maps the ring and returns the contiguous writable
/// span; its user address is stored to `buffer_out_ptr`.
pub fn sys_datapipe_begin_write(
    up: &Arc<ProcessDispatcher>,
    producer: HandleValue,
    flags: u32,
    buffer_out_ptr: u64,
) -> Result<usize, Status> {
    if flags != 0 {
        return Err(Status::NotSupported);
    }
    if buffer_out_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(producer, Rights::WRITE)?;
    let producer = dispatcher.as_data_producer()?;

    let (addr, avail) = producer.begin_write(up.aspace())?;
    let out = UserSliceWrite::new(up.aspace(), buffer_out_ptr, 8)?;
    out.copy_from(&addr.to_le_bytes())?;
    Ok(avail)
}

pub fn sys_datapipe_end_write(
    up: &Arc<ProcessDispatcher>,
    producer: HandleValue,
    written: usize,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(producer, Rights::WRITE)?;
    dispatcher.as_data_producer()?.end_write(written)
}

pub fn sys_datapipe_begin_read(
    up: &Arc<ProcessDispatcher>,
    consumer: HandleValue,
    flags: u32,
    buffer_out_ptr: u64,
) -> Result<usize, Status> {
    if flags != 0 {
        return Err(Status::NotSupported);
    }
    if buffer_out_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(consumer, Rights::READ)?;
    let consumer = dispatcher.as_data_consumer()?;

    let (addr, avail) = consumer.begin_read(up.aspace())?;
    let out = UserSliceWrite::new(up.aspace(), buffer_out_ptr, 8)?;
    out.copy_from(&addr.to_le_bytes())?;
    Ok(avail)
}

pub fn sys_datapipe_end_read(
    up: &Arc<ProcessDispatcher>,
    consumer: HandleValue,
    read: usize,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(consumer, Rights::READ)?;
    dispatcher.as_data_consumer()?.end_read(read)
}
