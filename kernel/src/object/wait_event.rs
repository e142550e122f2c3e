//! Wait event: the single-waiter blocking cell used by the wait layer.
//!
//! Waited on from one thread, signalled from many. Only the first
//! signaller's result and context are delivered; later signals are idempotent
//! no-ops. Once `signal` returns, any thread observing the event as
//! signalled sees that same result/context pair (the pair is written under
//! the event lock before the waiter is woken).

use helion_syscall::{Status, Time};

use crate::sched::{self, ParkResult, ThreadId};
use crate::sync::SpinLock;

/// Outcome of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A watched signal became satisfied.
    Satisfied,
    /// The watched signals can never become satisfied.
    Unsatisfiable,
    /// The waited-on handle was closed or transferred.
    Cancelled,
    /// Wait-side only, never passed to `signal`:
    TimedOut,
    Interrupted,
}

impl WaitResult {
    /// Whether a result carries the signaller's context.
    pub fn has_context(self) -> bool {
        matches!(
            self,
            WaitResult::Satisfied | WaitResult::Unsatisfiable | WaitResult::Cancelled
        )
    }

    /// Convert to the syscall status.
    pub fn to_status(self) -> Result<(), Status> {
        match self {
            WaitResult::Satisfied => Ok(()),
            WaitResult::Unsatisfiable => Err(Status::BadState),
            WaitResult::Cancelled => Err(Status::Cancelled),
            WaitResult::TimedOut => Err(Status::TimedOut),
            WaitResult::Interrupted => Err(Status::Interrupted),
        }
    }
}

struct Inner {
    signaled: bool,
    result: WaitResult,
    context: u64,
    waiter: Option<ThreadId>,
}

pub struct WaitEvent {
    inner: SpinLock<Inner>,
}

impl WaitEvent {
    pub const fn new() -> Self {
        WaitEvent {
            inner: SpinLock::new(Inner {
                signaled: false,
                result: WaitResult::TimedOut,
                context: 0,
                waiter: None,
            }),
        }
    }

    /// Suspend until signalled, the absolute `deadline` passes, or the
    /// thread is interrupted. Returns the first signaller's result and
    /// context (context is zero for timeout/interrupt).
    pub fn wait(&self, deadline: Option<Time>) -> (WaitResult, u64) {
        let id = sched::current_id().expect("WaitEvent::wait with no current thread");

        loop {
            {
                let mut inner = self.inner.lock();
                if inner.signaled {
                    inner.waiter = None;
                    return (inner.result, inner.context);
                }
                if sched::current_interrupted() {
                    inner.waiter = None;
                    return (WaitResult::Interrupted, 0);
                }
                inner.waiter = Some(id);
            }

            match sched::park_current(deadline) {
                ParkResult::Woken => continue,
                ParkResult::TimedOut => {
                    let mut inner = self.inner.lock();
                    // Signal may have raced the timeout; it wins.
                    if inner.signaled {
                        inner.waiter = None;
                        return (inner.result, inner.context);
                    }
                    inner.waiter = None;
                    return (WaitResult::TimedOut, 0);
                }
            }
        }
    }

    /// Deliver `result`/`context`. The first call wins and wakes the
    /// waiter; returns true if a thread was actually woken.
    ///
    /// `result` must not be `TimedOut` or `Interrupted`; those are
    /// wait-side outcomes.
    pub fn signal(&self, result: WaitResult, context: u64) -> bool {
        debug_assert!(result.has_context());

        let mut inner = self.inner.lock();
        if inner.signaled {
            return false;
        }
        inner.signaled = true;
        inner.result = result;
        inner.context = context;
        if let Some(waiter) = inner.waiter.take() {
            sched::wake(waiter);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn setup() {
        crate::sched::host::install();
    }

    #[test]
    fn first_signal_wins() {
        setup();
        let event = WaitEvent::new();
        assert!(!event.signal(WaitResult::Satisfied, 11));
        assert!(!event.signal(WaitResult::Cancelled, 22));
        let (result, context) = event.wait(None);
        assert_eq!(result, WaitResult::Satisfied);
        assert_eq!(context, 11);
    }

    #[test]
    fn wait_blocks_until_signal() {
        setup();
        let event = Arc::new(WaitEvent::new());
        let e = event.clone();
        let waiter = std::thread::spawn(move || e.wait(None));
        std::thread::sleep(std::time::Duration::from_millis(10));
        event.signal(WaitResult::Unsatisfiable, 3);
        let (result, context) = waiter.join().unwrap();
        assert_eq!(result, WaitResult::Unsatisfiable);
        assert_eq!(context, 3);
    }

    #[test]
    fn deadline_yields_timed_out() {
        setup();
        let event = WaitEvent::new();
        let deadline = Some(sched::now() + 2_000_000);
        let (result, _) = event.wait(deadline);
        assert_eq!(result, WaitResult::TimedOut);
        // A late signal is still recorded for later observers.
        assert!(!event.signal(WaitResult::Satisfied, 1));
        let (result, context) = event.wait(None);
        assert_eq!(result, WaitResult::Satisfied);
        assert_eq!(context, 1);
    }
}
