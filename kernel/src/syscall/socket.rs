//! Socket syscalls.

use alloc::sync::Arc;

use helion_syscall::data::SOCKET_CONTROL;
use helion_syscall::{HandleValue, Rights, Status};

use crate::ipc::socket::SocketDispatcher;
use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::process::ProcessDispatcher;

pub fn sys_socket_create(
    up: &Arc<ProcessDispatcher>,
    out_handles_ptr: u64,
    flags: u32,
) -> Result<(), Status> {
    if out_handles_ptr == 0 || flags != 0 {
        return Err(Status::InvalidArgs);
    }
    let (s0, s1, rights) = SocketDispatcher::create(flags)?;
    let h0 = handle::make_handle(s0, rights)?;
    let h1 = handle::make_handle(s1, rights)?;

    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&up.map_handle_to_value(h0.id()).to_le_bytes());
    bytes[4..].copy_from_slice(&up.map_handle_to_value(h1.id()).to_le_bytes());
    UserSliceWrite::new(up.aspace(), out_handles_ptr, 8)?.copy_from(&bytes)?;

    up.add_handle(h0);
    up.add_handle(h1);
    Ok(())
}

pub fn sys_socket_write(
    up: &Arc<ProcessDispatcher>,
    socket: HandleValue,
    flags: u32,
    buffer_ptr: u64,
    size: usize,
) -> Result<usize, Status> {
    if flags & !SOCKET_CONTROL != 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(socket, Rights::WRITE)?;
    let socket = dispatcher.as_socket()?;

    let data = UserSliceRead::new(up.aspace(), buffer_ptr, size)?.read_to_vec()?;
    if flags & SOCKET_CONTROL != 0 {
        socket.oob_write(&data)
    } else {
        socket.write(&data)
    }
}

pub fn sys_socket_read(
    up: &Arc<ProcessDispatcher>,
    socket: HandleValue,
    flags: u32,
    buffer_ptr: u64,
    size: usize,
) -> Result<usize, Status> {
    if flags & !SOCKET_CONTROL != 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(socket, Rights::READ)?;
    let socket = dispatcher.as_socket()?;

    let out = UserSliceWrite::new(up.aspace(), buffer_ptr, size)?;
    let mut buf = alloc::vec![0u8; size];
    let n = if flags & SOCKET_CONTROL != 0 {
        socket.oob_read(&mut buf)?
    } else {
        socket.read(&mut buf)?
    };
    out.copy_from(&buf[..n])?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn stream_and_control_through_syscalls() {
        let (up, base) = testutil::new_process_with_mem("socket-sys", 2);
        sys_socket_create(&up, base, 0).unwrap();
        let h0 = testutil::peek_handle(&up, base);
        let h1 = testutil::peek_handle(&up, base + 4);

        testutil::poke(&up, base + 64, b"stream");
        assert_eq!(sys_socket_write(&up, h0, 0, base + 64, 6).unwrap(), 6);
        testutil::poke(&up, base + 128, b"oob");
        assert_eq!(
            sys_socket_write(&up, h0, SOCKET_CONTROL, base + 128, 3).unwrap(),
            3
        );

        assert_eq!(sys_socket_read(&up, h1, 0, base + 256, 16).unwrap(), 6);
        assert_eq!(testutil::peek(&up, base + 256, 6), b"stream");
        assert_eq!(
            sys_socket_read(&up, h1, SOCKET_CONTROL, base + 256, 16).unwrap(),
            3
        );
        assert_eq!(testutil::peek(&up, base + 256, 3), b"oob");
    }
}
