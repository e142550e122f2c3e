//! I/O-port syscalls: create, queue, wait, bind.

use alloc::sync::Arc;

use helion_syscall::data::{PacketHeader, PKT_TYPE_USER, PORT_MAX_PKT_SIZE};
use helion_syscall::{HandleValue, Rights, Signals, Status};
use zerocopy::{AsBytes, FromBytes};

use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::object::io_port::{IoPortClient, IoPortDispatcher};
use crate::process::ProcessDispatcher;

pub fn sys_port_create(up: &Arc<ProcessDispatcher>, options: u32) -> Result<HandleValue, Status> {
    let (port, rights) = IoPortDispatcher::create(options);
    let handle = handle::make_handle(port, rights)?;
    Ok(up.add_handle(handle))
}

pub fn sys_port_queue(
    up: &Arc<ProcessDispatcher>,
    port: HandleValue,
    packet_ptr: u64,
    size: usize,
) -> Result<(), Status> {
    if size > PORT_MAX_PKT_SIZE {
        return Err(Status::BufferTooSmall);
    }
    if size < core::mem::size_of::<PacketHeader>() {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(port, Rights::WRITE)?;
    let io_port = dispatcher.as_io_port()?;

    let mut packet = UserSliceRead::new(up.aspace(), packet_ptr, size)?.read_to_vec()?;
    // The kernel owns the packet type; user packets are always USER.
    let mut header = PacketHeader::read_from_prefix(&packet[..]).ok_or(Status::InvalidArgs)?;
    header.packet_type = PKT_TYPE_USER;
    packet[..core::mem::size_of::<PacketHeader>()].copy_from_slice(header.as_bytes());

    io_port.queue(packet)
}

pub fn sys_port_wait(
    up: &Arc<ProcessDispatcher>,
    port: HandleValue,
    packet_ptr: u64,
    size: usize,
) -> Result<(), Status> {
    if packet_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(port, Rights::READ)?;
    let io_port = dispatcher.as_io_port()?;

    let packet = io_port.wait(None)?;
    if size < packet.len() {
        return Err(Status::BufferTooSmall);
    }
    UserSliceWrite::new(up.aspace(), packet_ptr, packet.len())?.copy_from(&packet)?;
    Ok(())
}

/// Bind `source` (a message pipe end) to `port`: matching signal edges
/// enqueue IOSN packets carrying `key`.
pub fn sys_port_bind(
    up: &Arc<ProcessDispatcher>,
    port: HandleValue,
    key: u64,
    source: HandleValue,
    signals: u32,
) -> Result<(), Status> {
    let signals = Signals::from_bits(signals).ok_or(Status::InvalidArgs)?;
    if signals.is_empty() {
        return Err(Status::InvalidArgs);
    }
    if !(Signals::READABLE | Signals::PEER_CLOSED).contains(signals) {
        return Err(Status::InvalidArgs);
    }

    let port_dispatcher = up.get_dispatcher_with_rights(port, Rights::WRITE)?;
    let source_dispatcher = up.get_dispatcher_with_rights(source, Rights::READ)?;
    let pipe = source_dispatcher
        .as_message_pipe()
        .map_err(|_| Status::NotSupported)?;

    let client = IoPortClient::new(port_dispatcher, key, signals)?;
    pipe.set_io_port(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::pipe::{sys_msgpipe_create, sys_msgpipe_write};
    use crate::testutil;
    use helion_syscall::data::{IoPacket, PKT_TYPE_IOSN};

    #[test]
    fn user_packets_roundtrip_and_get_stamped() {
        let (up, base) = testutil::new_process_with_mem("port-sys", 2);
        let port = sys_port_create(&up, 0).unwrap();

        let header = PacketHeader {
            key: 0xfeed,
            packet_type: 999, // forged; the kernel overwrites it
            extra: 0,
        };
        testutil::poke(&up, base, header.as_bytes());
        sys_port_queue(&up, port, base, core::mem::size_of::<PacketHeader>()).unwrap();

        sys_port_wait(&up, port, base + 128, PORT_MAX_PKT_SIZE).unwrap();
        let got = PacketHeader::read_from_prefix(
            &testutil::peek(&up, base + 128, core::mem::size_of::<PacketHeader>())[..],
        )
        .unwrap();
        assert_eq!(got.key, 0xfeed);
        assert_eq!(got.packet_type, PKT_TYPE_USER);
    }

    #[test]
    fn bound_pipe_delivers_iosn_packets() {
        let (up, base) = testutil::new_process_with_mem("port-bind", 2);
        let port = sys_port_create(&up, 0).unwrap();
        sys_msgpipe_create(&up, base, 0).unwrap();
        let h0 = testutil::peek_handle(&up, base);
        let h1 = testutil::peek_handle(&up, base + 4);

        sys_port_bind(&up, port, 0xab, h1, Signals::READABLE.bits()).unwrap();
        // Binding twice is refused.
        assert_eq!(
            sys_port_bind(&up, port, 0xab, h1, Signals::READABLE.bits()),
            Err(Status::BadState)
        );

        testutil::poke(&up, base + 64, b"!");
        sys_msgpipe_write(&up, h0, base + 64, 1, 0, 0, 0).unwrap();

        sys_port_wait(&up, port, base + 128, PORT_MAX_PKT_SIZE).unwrap();
        let packet = IoPacket::read_from_prefix(
            &testutil::peek(&up, base + 128, core::mem::size_of::<IoPacket>())[..],
        )
        .unwrap();
        assert_eq!(packet.hdr.key, 0xab);
        assert_eq!(packet.hdr.packet_type, PKT_TYPE_IOSN);
        assert_eq!(packet.signals, Signals::READABLE.bits());
    }

    #[test]
    fn binding_rejects_non_pipe_sources_and_bad_masks() {
        let (up, base) = testutil::new_process_with_mem("port-badbind", 2);
        let port = sys_port_create(&up, 0).unwrap();
        let other_port = sys_port_create(&up, 0).unwrap();

        assert_eq!(
            sys_port_bind(&up, port, 1, other_port, Signals::READABLE.bits()),
            Err(Status::NotSupported)
        );

        sys_msgpipe_create(&up, base, 0).unwrap();
        let h1 = testutil::peek_handle(&up, base + 4);
        assert_eq!(
            sys_port_bind(&up, port, 1, h1, Signals::WRITABLE.bits()),
            Err(Status::InvalidArgs)
        );
        assert_eq!(sys_port_bind(&up, port, 1, h1, 0), Err(Status::InvalidArgs));
    }
}
