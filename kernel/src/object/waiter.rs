//! The observer connecting `handle_wait_one`/`handle_wait_many` to state
//! trackers.
//!
//! One observer per watched handle; a multi-handle wait shares a single
//! [`WaitEvent`] across all of its observers with the handle's array index
//! as the context, so whichever observer fires first decides the result.

use alloc::sync::Arc;

use helion_syscall::{Signals, SignalsState, Status};

use crate::object::handle::HandleId;
use crate::object::state_tracker::{CancelOutcome, StateObserver};
use crate::object::wait_event::{WaitEvent, WaitResult};
use crate::object::Dispatcher;

pub struct WaitStateObserver {
    event: Arc<WaitEvent>,
    handle: HandleId,
    watched: Signals,
    context: u64,
    dispatcher: Arc<Dispatcher>,
}

impl WaitStateObserver {
    /// Attach to `dispatcher`'s tracker. Should run under the caller's
    /// handle-table lock so the handle cannot be closed mid-registration.
    /// On success [`WaitStateObserver::end`] must be called before the
    /// wait event is dropped.
    pub fn begin(
        event: Arc<WaitEvent>,
        handle: HandleId,
        dispatcher: Arc<Dispatcher>,
        watched: Signals,
        context: u64,
    ) -> Result<Arc<Self>, Status> {
        let tracker = dispatcher
            .state_tracker()
            .filter(|t| t.is_waitable())
            .ok_or(Status::NotSupported)?;

        let observer = Arc::new(WaitStateObserver {
            event,
            handle,
            watched,
            context,
            dispatcher: dispatcher.clone(),
        });
        tracker.add_observer(observer.clone());
        Ok(observer)
    }

    /// Detach; must *not* run under the handle-table lock. Returns the
    /// tracker's final state.
    pub fn end(&self) -> SignalsState {
        self.dispatcher
            .state_tracker()
            .expect("observer attached to untracked dispatcher")
            .remove_observer(self)
    }

    fn maybe_signal(&self, state: SignalsState) -> bool {
        if state.satisfied.intersects(self.watched) {
            return self.event.signal(WaitResult::Satisfied, self.context);
        }
        if !state.satisfiable.intersects(self.watched) {
            return self.event.signal(WaitResult::Unsatisfiable, self.context);
        }
        false
    }
}

impl StateObserver for WaitStateObserver {
    fn on_initialize(&self, initial: SignalsState) -> bool {
        self.maybe_signal(initial)
    }

    fn on_state_change(&self, new_state: SignalsState) -> bool {
        self.maybe_signal(new_state)
    }

    fn on_cancel(&self, handle: HandleId) -> CancelOutcome {
        if handle != self.handle {
            return CancelOutcome::default();
        }
        CancelOutcome {
            awoke: self.event.signal(WaitResult::Cancelled, self.context),
            // Stay attached; end() removes us so the final state read
            // stays valid.
            should_remove: false,
        }
    }
}
