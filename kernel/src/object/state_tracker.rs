//! State trackers: the signaling facade of a dispatcher.
//!
//! A tracker carries the `(satisfied, satisfiable)` signal masks and the
//! list of attached observers. The owning dispatcher publishes state
//! changes with [`StateTracker::update_satisfied`]/[`update_state`]; the
//! wait layer attaches observers that turn signal edges into wait-event
//! signals, wait-set triggers or I/O-port packets.
//!
//! All four mutations (update satisfied, update satisfiable, cancel by
//! handle, user signal) run under the tracker's lock and walk the observer
//! list before releasing it, so no observer ever sees a state older than
//! the update that woke it.

use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::{Signals, SignalsState};

use crate::object::handle::HandleId;
use crate::sync::SpinLock;

/// Result of an observer's cancel callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelOutcome {
    /// A thread was awoken.
    pub awoke: bool,
    /// The observer wants to be detached from the tracker.
    pub should_remove: bool,
}

/// Observer attached to a [`StateTracker`].
///
/// The initialize/state-change callbacks run under the tracker's lock;
/// they must not take any lock ordered above it.
pub trait StateObserver: Send + Sync {
    /// Called on attach with the current state. Returns true if a thread
    /// was awoken.
    fn on_initialize(&self, initial: SignalsState) -> bool;

    /// Called on every effective state change. Returns true if a thread
    /// was awoken.
    fn on_state_change(&self, new_state: SignalsState) -> bool;

    /// Called when `handle` (a handle to the object owning this tracker)
    /// is being closed or transferred.
    fn on_cancel(&self, handle: HandleId) -> CancelOutcome;
}

struct Inner {
    state: SignalsState,
    observers: Vec<Arc<dyn StateObserver>>,
}

pub struct StateTracker {
    waitable: bool,
    inner: SpinLock<Inner>,
}

impl StateTracker {
    pub const fn new(waitable: bool, initial: SignalsState) -> Self {
        StateTracker {
            waitable,
            inner: SpinLock::new(Inner {
                state: initial,
                observers: Vec::new(),
            }),
        }
    }

    /// A non-waitable tracker only exists to observe handle cancellation
    /// (the wait set uses one for its own handle).
    pub fn is_waitable(&self) -> bool {
        self.waitable
    }

    pub fn state(&self) -> SignalsState {
        self.inner.lock().state
    }

    /// Attach `observer`, delivering the current state to it.
    pub fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        let awoke = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            inner.observers.push(observer.clone());
            observer.on_initialize(state)
        };
        if awoke {
            crate::sched::yield_now();
        }
    }

    /// Detach `observer`; returns the final signal state.
    pub fn remove_observer(&self, observer: &dyn StateObserver) -> SignalsState {
        let target = observer as *const dyn StateObserver as *const ();
        let mut inner = self.inner.lock();
        inner
            .observers
            .retain(|o| Arc::as_ptr(o) as *const () != target);
        inner.state
    }

    /// Apply the four masks and notify observers if anything changed.
    ///
    /// `clear` masks are applied before `set` masks; `satisfied` is
    /// re-clamped to `satisfiable` so the subset invariant holds at every
    /// observable point.
    pub fn update_state(
        &self,
        satisfied_clear: Signals,
        satisfied_set: Signals,
        satisfiable_clear: Signals,
        satisfiable_set: Signals,
    ) {
        let mut awoke = false;
        {
            let mut inner = self.inner.lock();
            let previous = inner.state;

            inner.state.satisfied &= !satisfied_clear;
            inner.state.satisfied |= satisfied_set;
            inner.state.satisfiable &= !satisfiable_clear;
            inner.state.satisfiable |= satisfiable_set;
            let satisfiable = inner.state.satisfiable;
            inner.state.satisfied &= satisfiable;

            if previous == inner.state {
                return;
            }

            let state = inner.state;
            for observer in inner.observers.iter() {
                awoke |= observer.on_state_change(state);
            }
        }
        if awoke {
            crate::sched::yield_now();
        }
    }

    pub fn update_satisfied(&self, clear: Signals, set: Signals) {
        self.update_state(clear, set, Signals::empty(), Signals::empty());
    }

    /// Notify observers that `handle` is going away, so in-flight waits
    /// unblock without false readiness.
    pub fn cancel(&self, handle: HandleId) {
        let mut awoke = false;
        {
            let mut inner = self.inner.lock();
            let mut kept: Vec<Arc<dyn StateObserver>> = Vec::with_capacity(inner.observers.len());
            for observer in inner.observers.drain(..) {
                let outcome = observer.on_cancel(handle);
                awoke |= outcome.awoke;
                if !outcome.should_remove {
                    kept.push(observer);
                }
            }
            inner.observers = kept;
        }
        if awoke {
            crate::sched::yield_now();
        }
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct Recorder {
        changes: AtomicUsize,
        last_satisfied: AtomicU32,
        cancelled: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder {
                changes: AtomicUsize::new(0),
                last_satisfied: AtomicU32::new(0),
                cancelled: AtomicUsize::new(0),
            })
        }
    }

    impl StateObserver for Recorder {
        fn on_initialize(&self, initial: SignalsState) -> bool {
            self.last_satisfied
                .store(initial.satisfied.bits(), Ordering::SeqCst);
            false
        }

        fn on_state_change(&self, new_state: SignalsState) -> bool {
            self.changes.fetch_add(1, Ordering::SeqCst);
            self.last_satisfied
                .store(new_state.satisfied.bits(), Ordering::SeqCst);
            false
        }

        fn on_cancel(&self, _handle: HandleId) -> CancelOutcome {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            CancelOutcome {
                awoke: false,
                should_remove: true,
            }
        }
    }

    fn tracker() -> StateTracker {
        crate::sched::host::install();
        StateTracker::new(
            true,
            SignalsState::new(
                Signals::WRITABLE,
                Signals::READABLE | Signals::WRITABLE | Signals::PEER_CLOSED,
            ),
        )
    }

    #[test]
    fn satisfied_stays_subset_of_satisfiable() {
        let t = tracker();
        // Try to satisfy a bit that is not satisfiable.
        t.update_satisfied(Signals::empty(), Signals::SIGNAL0);
        let s = t.state();
        assert!(s.satisfiable.contains(s.satisfied));
        assert!(!s.satisfied.contains(Signals::SIGNAL0));
    }

    #[test]
    fn no_notification_without_change() {
        let t = tracker();
        let obs = Recorder::new();
        t.add_observer(obs.clone());
        // WRITABLE is already satisfied; setting it again is a no-op.
        t.update_satisfied(Signals::empty(), Signals::WRITABLE);
        assert_eq!(obs.changes.load(Ordering::SeqCst), 0);
        t.update_satisfied(Signals::empty(), Signals::READABLE);
        assert_eq!(obs.changes.load(Ordering::SeqCst), 1);
        assert_eq!(
            obs.last_satisfied.load(Ordering::SeqCst),
            (Signals::READABLE | Signals::WRITABLE).bits()
        );
    }

    #[test]
    fn cancel_detaches_consenting_observers() {
        let t = tracker();
        let obs = Recorder::new();
        t.add_observer(obs.clone());
        assert_eq!(t.observer_count(), 1);
        t.cancel(HandleId(7));
        assert_eq!(obs.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(t.observer_count(), 0);
    }

    #[test]
    fn remove_observer_returns_final_state() {
        let t = tracker();
        let obs = Recorder::new();
        t.add_observer(obs.clone());
        t.update_satisfied(Signals::empty(), Signals::READABLE);
        let state = t.remove_observer(obs.as_ref());
        assert!(state.satisfied.contains(Signals::READABLE));
        assert_eq!(t.observer_count(), 0);
    }
}
