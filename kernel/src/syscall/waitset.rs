//! Wait-set syscalls.

use alloc::sync::Arc;

use helion_syscall::data::WaitSetResult;
use helion_syscall::{HandleValue, Rights, Signals, Status, Time};
use zerocopy::AsBytes;

use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::object::wait_set::WaitSetDispatcher;
use crate::process::ProcessDispatcher;
use crate::syscall::timeout_to_deadline;

pub fn sys_waitset_create(up: &Arc<ProcessDispatcher>) -> Result<HandleValue, Status> {
    let (ws, rights) = WaitSetDispatcher::create();
    let handle = handle::make_handle(ws, rights)?;
    Ok(up.add_handle(handle))
}

pub fn sys_waitset_add(
    up: &Arc<ProcessDispatcher>,
    ws_value: HandleValue,
    cookie: u64,
    target_value: HandleValue,
    signals: u32,
) -> Result<(), Status> {
    let signals = Signals::from_bits(signals).ok_or(Status::InvalidArgs)?;
    let ws_dispatcher = up.get_dispatcher_with_rights(ws_value, Rights::WRITE)?;

    // Registration runs under the table lock so the target handle cannot
    // close between lookup and observer attach.
    let result = up.with_table_locked(|t| {
        let id = t.lookup(target_value)?;
        let (dispatcher, rights) =
            handle::with_handle(id, |h| (h.dispatcher().clone(), h.rights()))
                .expect("looked-up handle");
        if !rights.covers(Rights::READ) {
            return Err(Status::AccessDenied);
        }
        ws_dispatcher
            .as_wait_set()?
            .add_entry(signals, cookie, id, dispatcher)
    });
    result.map_err(|e| up.bad_handle(target_value, e))
}

pub fn sys_waitset_remove(
    up: &Arc<ProcessDispatcher>,
    ws_value: HandleValue,
    cookie: u64,
) -> Result<(), Status> {
    let dispatcher = up.get_dispatcher_with_rights(ws_value, Rights::WRITE)?;
    dispatcher.as_wait_set()?.remove_entry(cookie)
}

pub fn sys_waitset_wait(
    up: &Arc<ProcessDispatcher>,
    ws_value: HandleValue,
    timeout: Time,
    num_results_ptr: u64,
    results_ptr: u64,
    max_results_ptr: u64,
) -> Result<(), Status> {
    if num_results_ptr == 0 {
        return Err(Status::InvalidArgs);
    }
    let dispatcher = up.get_dispatcher_with_rights(ws_value, Rights::READ)?;
    let ws = dispatcher.as_wait_set()?;

    let capacity = UserSliceRead::new(up.aspace(), num_results_ptr, 4)?.read_u32()? as usize;
    if capacity != 0 && results_ptr == 0 {
        return Err(Status::InvalidArgs);
    }

    let (results, avail) = ws.wait(timeout_to_deadline(timeout), capacity)?;

    UserSliceWrite::new(up.aspace(), num_results_ptr, 4)?.write_u32(results.len() as u32)?;
    if max_results_ptr != 0 {
        UserSliceWrite::new(up.aspace(), max_results_ptr, 4)?.write_u32(avail)?;
    }
    if !results.is_empty() {
        let mut bytes = alloc::vec::Vec::with_capacity(
            results.len() * core::mem::size_of::<WaitSetResult>(),
        );
        for result in &results {
            bytes.extend_from_slice(result.as_bytes());
        }
        UserSliceWrite::new(up.aspace(), results_ptr, bytes.len())?.copy_from(&bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::event::EventDispatcher;
    use crate::object::handle::make_handle;
    use crate::testutil;
    use helion_syscall::signals::SIGNAL_SIGNALED;
    use zerocopy::FromBytes;

    #[test]
    fn add_wait_remove_through_syscalls() {
        let (up, base) = testutil::new_process_with_mem("waitset-sys", 2);
        let ws = sys_waitset_create(&up).unwrap();

        let (event, rights) = EventDispatcher::create(0);
        let ev = up.add_handle(make_handle(event.clone(), rights).unwrap());

        sys_waitset_add(&up, ws, 0xc0de, ev, SIGNAL_SIGNALED.bits()).unwrap();

        event.user_signal(Signals::empty(), SIGNAL_SIGNALED).unwrap();

        testutil::poke_u32(&up, base, 4); // capacity
        sys_waitset_wait(&up, ws, 1_000_000_000, base, base + 8, base + 4).unwrap();
        assert_eq!(testutil::peek_u32(&up, base), 1);
        assert_eq!(testutil::peek_u32(&up, base + 4), 1);

        let record = WaitSetResult::read_from(
            &testutil::peek(&up, base + 8, core::mem::size_of::<WaitSetResult>())[..],
        )
        .unwrap();
        assert_eq!(record.cookie, 0xc0de);
        assert_eq!(record.wait_result, 0);
        assert!(Signals::from_bits_truncate(record.satisfied).contains(SIGNAL_SIGNALED));

        sys_waitset_remove(&up, ws, 0xc0de).unwrap();
        assert_eq!(
            sys_waitset_remove(&up, ws, 0xc0de),
            Err(Status::NotFound)
        );
    }
}
