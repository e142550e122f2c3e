//! handle_wait_one / handle_wait_many.
//!
//! A wait attaches one observer per watched handle, all sharing a single
//! wait event; the observer that fires first decides the result and, for
//! wait-many, reports its array index as the context.

use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::data::MAX_WAIT_HANDLE_COUNT;
use helion_syscall::{HandleValue, Rights, Signals, SignalsState, Status, Time};

use crate::memory::{UserSliceRead, UserSliceWrite};
use crate::object::handle;
use crate::object::wait_event::WaitEvent;
use crate::object::waiter::WaitStateObserver;
use crate::process::ProcessDispatcher;
use crate::syscall::timeout_to_deadline;

fn write_signals_state(
    up: &Arc<ProcessDispatcher>,
    ptr: u64,
    state: SignalsState,
) -> Result<(), Status> {
    if ptr == 0 {
        return Ok(());
    }
    let out = UserSliceWrite::new(up.aspace(), ptr, 8)?;
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&state.satisfied.bits().to_le_bytes());
    bytes[4..].copy_from_slice(&state.satisfiable.bits().to_le_bytes());
    out.copy_from(&bytes)?;
    Ok(())
}

pub fn sys_handle_wait_one(
    up: &Arc<ProcessDispatcher>,
    value: HandleValue,
    signals: u32,
    timeout: Time,
    signals_state_ptr: u64,
) -> Result<(), Status> {
    let watched = Signals::from_bits_truncate(signals);
    let event = Arc::new(WaitEvent::new());

    let observer = up
        .with_table_locked(|t| {
            let id = t.lookup(value)?;
            let (dispatcher, rights) =
                handle::with_handle(id, |h| (h.dispatcher().clone(), h.rights()))
                    .expect("looked-up handle");
            if !rights.covers(Rights::READ) {
                return Err(Status::AccessDenied);
            }
            WaitStateObserver::begin(event.clone(), id, dispatcher, watched, 0)
        })
        .map_err(|e| up.bad_handle(value, e))?;

    let (result, _context) = event.wait(timeout_to_deadline(timeout));

    // End() runs regardless of the outcome, off the table lock.
    let final_state = observer.end();
    write_signals_state(up, signals_state_ptr, final_state)?;

    result.to_status()
}

pub fn sys_handle_wait_many(
    up: &Arc<ProcessDispatcher>,
    count: usize,
    handles_ptr: u64,
    signals_ptr: u64,
    timeout: Time,
    result_index_ptr: u64,
    signals_states_ptr: u64,
) -> Result<(), Status> {
    if count == 0 {
        // Plain interruptible sleep.
        crate::syscall::time::sys_nanosleep(timeout)?;
        return Err(Status::TimedOut);
    }
    if count > MAX_WAIT_HANDLE_COUNT || handles_ptr == 0 || signals_ptr == 0 {
        return Err(Status::InvalidArgs);
    }

    let handle_bytes = UserSliceRead::new(up.aspace(), handles_ptr, count * 4)?.read_to_vec()?;
    let signal_bytes = UserSliceRead::new(up.aspace(), signals_ptr, count * 4)?.read_to_vec()?;

    let values: Vec<HandleValue> = handle_bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let watched: Vec<Signals> = signal_bytes
        .chunks_exact(4)
        .map(|c| Signals::from_bits_truncate(u32::from_le_bytes(c.try_into().unwrap())))
        .collect();

    let event = Arc::new(WaitEvent::new());
    let mut observers: Vec<Arc<WaitStateObserver>> = Vec::with_capacity(count);

    // Attach everything under one table lock so the set is consistent; on
    // any failure, detach what was already attached.
    let attach_result: Result<(), (HandleValue, Status)> = up.with_table_locked(|t| {
        for (ix, (&value, &sigs)) in values.iter().zip(watched.iter()).enumerate() {
            let id = t.lookup(value).map_err(|e| (value, e))?;
            let (dispatcher, rights) =
                handle::with_handle(id, |h| (h.dispatcher().clone(), h.rights()))
                    .expect("looked-up handle");
            if !rights.covers(Rights::READ) {
                return Err((value, Status::AccessDenied));
            }
            let observer =
                WaitStateObserver::begin(event.clone(), id, dispatcher, sigs, ix as u64)
                    .map_err(|e| (value, e))?;
            observers.push(observer);
        }
        Ok(())
    });
    if let Err((value, e)) = attach_result {
        for observer in &observers {
            observer.end();
        }
        return Err(up.bad_handle(value, e));
    }

    let (result, context) = event.wait(timeout_to_deadline(timeout));

    let mut states = Vec::with_capacity(count);
    for observer in &observers {
        states.push(observer.end());
    }

    if result_index_ptr != 0 && result.has_context() {
        UserSliceWrite::new(up.aspace(), result_index_ptr, 4)?.write_u32(context as u32)?;
    }

    if signals_states_ptr != 0 {
        let out = UserSliceWrite::new(up.aspace(), signals_states_ptr, count * 8)?;
        let mut bytes = Vec::with_capacity(count * 8);
        for state in &states {
            bytes.extend_from_slice(&state.satisfied.bits().to_le_bytes());
            bytes.extend_from_slice(&state.satisfiable.bits().to_le_bytes());
        }
        out.copy_from(&bytes)?;
    }

    result.to_status()
}
