//! Interrupt dispatcher.
//!
//! Wraps one interrupt vector. The platform's IRQ glue calls
//! [`InterruptDispatcher::trigger`] from its handler; a user driver thread
//! sits in `interrupt_wait` and must acknowledge with
//! `interrupt_complete` before waiting again.

use alloc::sync::Arc;

use helion_syscall::{Rights, Status};

use crate::sync::{SpinLock, WaitQueue};
use crate::object::{Dispatcher, DispatcherKind};

const DEFAULT_INTERRUPT_RIGHTS: Rights = Rights::TRANSFER.union(Rights::READ);

#[derive(Default)]
struct IrqState {
    pending: bool,
    /// Set between a returned wait and its complete.
    in_service: bool,
}

pub struct InterruptDispatcher {
    vector: u32,
    state: SpinLock<IrqState>,
    waiters: WaitQueue,
}

impl InterruptDispatcher {
    pub fn create(vector: u32, _flags: u32) -> (Arc<Dispatcher>, Rights) {
        let interrupt = InterruptDispatcher {
            vector,
            state: SpinLock::new(IrqState::default()),
            waiters: WaitQueue::new(),
        };
        (
            Dispatcher::new(DispatcherKind::Interrupt(interrupt)),
            DEFAULT_INTERRUPT_RIGHTS,
        )
    }

    pub fn vector(&self) -> u32 {
        self.vector
    }

    /// Interrupt-side injection.
    pub fn trigger(&self) {
        self.state.lock().pending = true;
        self.waiters.wake_all();
    }

    /// Block until the vector fires. A second wait without an intervening
    /// complete is a caller bug.
    pub fn wait(&self) -> Result<(), Status> {
        {
            let state = self.state.lock();
            if state.in_service {
                return Err(Status::BadState);
            }
        }
        self.waiters.wait_until(|| {
            let mut state = self.state.lock();
            if state.pending {
                state.pending = false;
                state.in_service = true;
                Some(())
            } else {
                None
            }
        })
    }

    /// Acknowledge the interrupt returned by the last wait.
    pub fn complete(&self) -> Result<(), Status> {
        let mut state = self.state.lock();
        if !state.in_service {
            return Err(Status::BadState);
        }
        state.in_service = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        crate::sched::host::install();
        crate::cprng::init(b"irq-tests");
        crate::object::init();
    }

    #[test]
    fn wait_trigger_complete_cycle() {
        setup();
        let (d, _) = InterruptDispatcher::create(33, 0);
        let irq = d.as_interrupt().unwrap();

        let d2 = d.clone();
        let waiter = std::thread::spawn(move || d2.as_interrupt().unwrap().wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        irq.trigger();
        waiter.join().unwrap().unwrap();

        // Completing twice is a bug.
        irq.complete().unwrap();
        assert_eq!(irq.complete(), Err(Status::BadState));
    }

    #[test]
    fn double_wait_without_complete_is_bad_state() {
        setup();
        let (d, _) = InterruptDispatcher::create(34, 0);
        let irq = d.as_interrupt().unwrap();
        irq.trigger();
        irq.wait().unwrap();
        assert_eq!(irq.wait(), Err(Status::BadState));
    }
}
