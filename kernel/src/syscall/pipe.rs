//! msgpipe_create / msgpipe_write / msgpipe_read.
//!
//! Writes are atomic with respect to handle transfer: on success every
//! listed handle has left the caller's table; on any failure the table is
//! observably unchanged (partial removals are rolled back through the
//! undo log). Reads re-home received handles into the caller's table and
//! cancel waits that were still keyed to the transferred slots.

use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::data::{MAX_MESSAGE_HANDLES, MAX_MESSAGE_SIZE};
use helion_syscall::{HandleValue, Rights, Status};

use crate::ipc::message_pipe::{MessagePacket, MessagePipeDispatcher};
use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::process::ProcessDispatcher;

pub fn sys_msgpipe_create(
    up: &Arc<ProcessDispatcher>,
    out_handles_ptr: u64,
    flags: u32,
) -> Result<(), Status> {
    if out_handles_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let (end0, end1, rights) = MessagePipeDispatcher::create(flags)?;

    let h0 = handle::make_handle(end0, rights)?;
    let h1 = handle::make_handle(end1, rights)?;

    let hv = [
        up.map_handle_to_value(h0.id()),
        up.map_handle_to_value(h1.id()),
    ];
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&hv[0].to_le_bytes());
    bytes[4..].copy_from_slice(&hv[1].to_le_bytes());
    // Copy out before committing: a faulting pointer must not leak
    // half-installed handles.
    UserSliceWrite::new(up.aspace(), out_handles_ptr, 8)?.copy_from(&bytes)?;

    up.add_handle(h0);
    up.add_handle(h1);
    Ok(())
}

pub fn sys_msgpipe_write(
    up: &Arc<ProcessDispatcher>,
    pipe_value: HandleValue,
    bytes_ptr: u64,
    num_bytes: usize,
    handles_ptr: u64,
    num_handles: usize,
    _flags: u32,
) -> Result<(), Status> {
    let pipe_dispatcher = up.get_dispatcher_with_rights(pipe_value, Rights::WRITE)?;
    let pipe = pipe_dispatcher.as_message_pipe()?;

    if num_bytes != 0 && bytes_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    if num_handles != 0 && handles_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    if num_bytes > MAX_MESSAGE_SIZE {
        return Err(Status::OutOfRange);
    }
    if num_handles > MAX_MESSAGE_HANDLES {
        return Err(Status::OutOfRange);
    }

    let data = if num_bytes != 0 {
        UserSliceRead::new(up.aspace(), bytes_ptr, num_bytes)?.read_to_vec()?
    } else {
        Vec::new()
    };

    let values: Vec<HandleValue> = if num_handles != 0 {
        UserSliceRead::new(up.aspace(), handles_ptr, num_handles * 4)?
            .read_to_vec()?
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    } else {
        Vec::new()
    };

    let is_reply_pipe = pipe.is_reply_pipe();

    // Two passes under one table lock: validate every handle, then remove
    // them. A duplicate in the array shows up as a failed second removal
    // and rolls back everything already taken.
    let collected: Result<Vec<handle::HandleOwner>, (HandleValue, Status)> =
        up.with_table_locked(|t| {
            let mut reply_pipe_at = None;
            for (ix, &value) in values.iter().enumerate() {
                let id = t.lookup(value).map_err(|e| (value, e))?;
                let (dispatcher, rights) =
                    handle::with_handle(id, |h| (h.dispatcher().clone(), h.rights()))
                        .expect("looked-up handle");

                if Arc::ptr_eq(&dispatcher, &pipe_dispatcher) {
                    // Sending a pipe's own endpoint through itself is the
                    // reply-pipe pattern, and only that.
                    if !is_reply_pipe {
                        return Err((value, Status::NotSupported));
                    }
                    reply_pipe_at = Some(ix);
                }
                if !rights.covers(Rights::TRANSFER) {
                    return Err((value, Status::AccessDenied));
                }
            }

            // A reply pipe must carry its own other end, placed last.
            if is_reply_pipe
                && (values.is_empty() || reply_pipe_at != Some(values.len() - 1))
            {
                return Err((pipe_value, Status::BadState));
            }

            let mut owners = Vec::with_capacity(values.len());
            for (ix, &value) in values.iter().enumerate() {
                match t.remove_handle(value) {
                    Ok(owner) => owners.push(owner),
                    Err(_) => {
                        for &undo in &values[..ix] {
                            t.undo_remove(undo);
                        }
                        return Err((value, Status::InvalidArgs));
                    }
                }
            }
            Ok(owners)
        });

    let owners = match collected {
        Ok(owners) => owners,
        Err((value, e)) => return Err(up.bad_handle(value, e)),
    };

    if let Err((mut msg, status)) = pipe.write(MessagePacket::new(data, owners)) {
        // Peer closed under us: every handle goes back where it was.
        let returned = msg.take_handles();
        up.with_table_locked(|t| {
            for owner in returned {
                t.add_handle(owner);
            }
        });
        return Err(status);
    }
    Ok(())
}

pub fn sys_msgpipe_read(
    up: &Arc<ProcessDispatcher>,
    pipe_value: HandleValue,
    bytes_ptr: u64,
    num_bytes_ptr: u64,
    handles_ptr: u64,
    num_handles_ptr: u64,
    _flags: u32,
) -> Result<(), Status> {
    let pipe_dispatcher = up.get_dispatcher_with_rights(pipe_value, Rights::READ)?;
    let pipe = pipe_dispatcher.as_message_pipe()?;

    if bytes_ptr != 0 && num_bytes_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    if handles_ptr != 0 && num_handles_ptr == 0 {
        return Err(Status::InvalidArgs);
    }

    let byte_capacity = if num_bytes_ptr != 0 {
        UserSliceRead::new(up.aspace(), num_bytes_ptr, 4)?.read_u32()? as usize
    } else {
        0
    };
    let handle_capacity = if num_handles_ptr != 0 {
        UserSliceRead::new(up.aspace(), num_handles_ptr, 4)?.read_u32()? as usize
    } else {
        0
    };

    let (msg_bytes, msg_handles) = pipe.begin_read()?;

    // Always report the head message's sizes so the caller can retry with
    // bigger buffers.
    if num_bytes_ptr != 0 {
        UserSliceWrite::new(up.aspace(), num_bytes_ptr, 4)?.write_u32(msg_bytes as u32)?;
    }
    if num_handles_ptr != 0 {
        UserSliceWrite::new(up.aspace(), num_handles_ptr, 4)?.write_u32(msg_handles as u32)?;
    }
    if byte_capacity < msg_bytes || handle_capacity < msg_handles {
        return Err(Status::BufferTooSmall);
    }

    let mut msg = pipe.accept_read()?;

    if bytes_ptr != 0 && !msg.data.is_empty() {
        UserSliceWrite::new(up.aspace(), bytes_ptr, msg.data.len())?.copy_from(&msg.data)?;
    }

    let owners = msg.take_handles();
    if !owners.is_empty() {
        let mut values = Vec::with_capacity(owners.len());
        up.with_table_locked(|t| {
            for owner in owners {
                let id = owner.id();
                values.push(t.add_handle(owner));
                // Waits still keyed to the transferred slot belong to the
                // sender's world; cancel them.
                if let Some(dispatcher) =
                    handle::with_handle(id, |h| h.dispatcher().clone())
                {
                    if let Some(tracker) = dispatcher.state_tracker() {
                        tracker.cancel(id);
                    }
                }
            }
        });

        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in &values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        UserSliceWrite::new(up.aspace(), handles_ptr, bytes.len())?.copy_from(&bytes)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::event::EventDispatcher;
    use crate::object::handle::make_handle;
    use crate::testutil;
    use helion_syscall::data::MSGPIPE_FLAG_REPLY_PIPE;

    fn pipe_pair(up: &Arc<ProcessDispatcher>, base: u64) -> (HandleValue, HandleValue) {
        sys_msgpipe_create(up, base, 0).unwrap();
        (
            testutil::peek_handle(up, base),
            testutil::peek_handle(up, base + 4),
        )
    }

    #[test]
    fn write_then_read_roundtrips_bytes() {
        let (up, base) = testutil::new_process_with_mem("pipe-bytes", 4);
        let (h0, h1) = pipe_pair(&up, base);

        testutil::poke(&up, base + 256, b"A");
        sys_msgpipe_write(&up, h0, base + 256, 1, 0, 0, 0).unwrap();

        testutil::poke_u32(&up, base + 512, 64); // byte capacity
        sys_msgpipe_read(&up, h1, base + 600, base + 512, 0, 0, 0).unwrap();
        assert_eq!(testutil::peek(&up, base + 600, 1), b"A");
        assert_eq!(testutil::peek_u32(&up, base + 512), 1);
    }

    #[test]
    fn handle_transfer_preserves_identity_and_counts() {
        let (up, base) = testutil::new_process_with_mem("pipe-transfer", 4);
        let (h0, h1) = pipe_pair(&up, base);

        let (event, ev_rights) = EventDispatcher::create(0);
        let ev_koid = event.koid();
        let ev_hv = up.add_handle(make_handle(event, ev_rights).unwrap());
        let before = up.handle_count();

        testutil::poke_u32(&up, base + 256, ev_hv as u32);
        sys_msgpipe_write(&up, h0, 0, 0, base + 256, 1, 0).unwrap();
        assert_eq!(up.handle_count(), before - 1);
        // The old value no longer resolves.
        assert_eq!(up.get_dispatcher(ev_hv).unwrap_err(), Status::BadHandle);

        testutil::poke_u32(&up, base + 512, 0);
        testutil::poke_u32(&up, base + 516, 4); // handle capacity
        sys_msgpipe_read(&up, h1, 0, base + 512, base + 600, base + 516, 0).unwrap();
        assert_eq!(up.handle_count(), before);

        let received = testutil::peek_handle(&up, base + 600);
        let (dispatcher, rights) = up.get_dispatcher(received).unwrap();
        assert_eq!(dispatcher.koid(), ev_koid);
        assert_eq!(rights, ev_rights);
    }

    #[test]
    fn write_rolls_back_on_duplicate_handle() {
        let (up, base) = testutil::new_process_with_mem("pipe-dup", 4);
        let (h0, _h1) = pipe_pair(&up, base);

        let (event, ev_rights) = EventDispatcher::create(0);
        let ev_hv = up.add_handle(make_handle(event, ev_rights).unwrap());
        let before = up.handle_count();

        testutil::poke_u32(&up, base + 256, ev_hv as u32);
        testutil::poke_u32(&up, base + 260, ev_hv as u32);
        assert_eq!(
            sys_msgpipe_write(&up, h0, 0, 0, base + 256, 2, 0),
            Err(Status::InvalidArgs)
        );
        // Nothing left the table.
        assert_eq!(up.handle_count(), before);
        assert!(up.get_dispatcher(ev_hv).is_ok());
    }

    #[test]
    fn write_without_transfer_right_fails_clean() {
        let (up, base) = testutil::new_process_with_mem("pipe-rights", 4);
        let (h0, _h1) = pipe_pair(&up, base);

        let (event, _) = EventDispatcher::create(0);
        let ev_hv = up.add_handle(make_handle(event, Rights::READ).unwrap());
        let before = up.handle_count();

        testutil::poke_u32(&up, base + 256, ev_hv as u32);
        assert_eq!(
            sys_msgpipe_write(&up, h0, 0, 0, base + 256, 1, 0),
            Err(Status::AccessDenied)
        );
        assert_eq!(up.handle_count(), before);
    }

    #[test]
    fn reply_pipe_requires_own_handle_last() {
        let (up, base) = testutil::new_process_with_mem("pipe-reply", 4);
        sys_msgpipe_create(&up, base, MSGPIPE_FLAG_REPLY_PIPE).unwrap();
        let h0 = testutil::peek_handle(&up, base);
        let h1 = testutil::peek_handle(&up, base + 4); // the reply end

        // A reply-pipe write without its own handle is refused.
        testutil::poke(&up, base + 256, b"r");
        assert_eq!(
            sys_msgpipe_write(&up, h1, base + 256, 1, 0, 0, 0),
            Err(Status::BadState)
        );

        // Transferring the reply end through itself, last, works: the
        // endpoint migrates into the message.
        testutil::poke_u32(&up, base + 300, h1 as u32);
        sys_msgpipe_write(&up, h1, base + 256, 1, base + 300, 1, 0).unwrap();
        assert_eq!(up.get_dispatcher(h1).unwrap_err(), Status::BadHandle);

        // And it comes out on the other end.
        testutil::poke_u32(&up, base + 512, 16);
        testutil::poke_u32(&up, base + 516, 4);
        sys_msgpipe_read(&up, h0, base + 520, base + 512, base + 540, base + 516, 0).unwrap();
        assert_eq!(testutil::peek_u32(&up, base + 516), 1);

        // Sending an ordinary pipe's end through itself is not supported.
        let (p0, _p1) = pipe_pair(&up, base + 8);
        testutil::poke_u32(&up, base + 560, p0 as u32);
        assert_eq!(
            sys_msgpipe_write(&up, p0, 0, 0, base + 560, 1, 0),
            Err(Status::NotSupported)
        );
    }

    #[test]
    fn write_wakes_reader_and_drained_pipe_is_bad_state() {
        use crate::syscall::wait::sys_handle_wait_one;
        use helion_syscall::Signals;

        let (up, base) = testutil::new_process_with_mem("pipe-wait", 4);
        let (h0, h1) = pipe_pair(&up, base);

        testutil::poke(&up, base + 256, b"A");
        sys_msgpipe_write(&up, h0, base + 256, 1, 0, 0, 0).unwrap();

        // READABLE is already satisfied; the wait returns immediately.
        sys_handle_wait_one(
            &up,
            h1,
            Signals::READABLE.bits(),
            1_000_000_000,
            base + 320,
        )
        .unwrap();
        let satisfied = Signals::from_bits_truncate(testutil::peek_u32(&up, base + 320));
        assert!(satisfied.contains(Signals::READABLE));

        testutil::poke_u32(&up, base + 512, 16);
        sys_msgpipe_read(&up, h1, base + 600, base + 512, 0, 0, 0).unwrap();
        assert_eq!(testutil::peek(&up, base + 600, 1), b"A");

        // Nothing left: the next read peeks an empty queue.
        assert_eq!(
            sys_msgpipe_read(&up, h1, base + 600, base + 512, 0, 0, 0),
            Err(Status::BadState)
        );
    }

    #[test]
    fn read_with_small_buffer_reports_sizes() {
        let (up, base) = testutil::new_process_with_mem("pipe-small", 4);
        let (h0, h1) = pipe_pair(&up, base);
        testutil::poke(&up, base + 256, b"four");
        sys_msgpipe_write(&up, h0, base + 256, 4, 0, 0, 0).unwrap();

        testutil::poke_u32(&up, base + 512, 2); // too small
        assert_eq!(
            sys_msgpipe_read(&up, h1, base + 600, base + 512, 0, 0, 0),
            Err(Status::BufferTooSmall)
        );
        assert_eq!(testutil::peek_u32(&up, base + 512), 4);

        // The message is still there for a retry.
        testutil::poke_u32(&up, base + 512, 8);
        sys_msgpipe_read(&up, h1, base + 600, base + 512, 0, 0, 0).unwrap();
        assert_eq!(testutil::peek(&up, base + 600, 4), b"four");
    }
}
