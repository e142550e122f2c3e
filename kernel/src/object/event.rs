//! Event and event-pair dispatchers: pure signaling primitives.

use alloc::sync::Arc;

use helion_syscall::signals::SIGNAL_USER_ALL;
use helion_syscall::{Koid, Rights, Signals, SignalsState, Status};

use crate::object::state_tracker::StateTracker;
use crate::object::{Dispatcher, DispatcherKind};
use crate::sync::SpinLock;

const DEFAULT_EVENT_RIGHTS: Rights = Rights::basic();

pub struct EventDispatcher {
    state_tracker: StateTracker,
}

impl EventDispatcher {
    pub fn create(_options: u32) -> (Arc<Dispatcher>, Rights) {
        let event = EventDispatcher {
            state_tracker: StateTracker::new(
                true,
                SignalsState::new(Signals::empty(), SIGNAL_USER_ALL),
            ),
        };
        (
            Dispatcher::new(DispatcherKind::Event(event)),
            DEFAULT_EVENT_RIGHTS,
        )
    }

    pub fn state_tracker(&self) -> &StateTracker {
        &self.state_tracker
    }

    pub fn user_signal(&self, clear: Signals, set: Signals) -> Result<(), Status> {
        if !SIGNAL_USER_ALL.contains(set) || !SIGNAL_USER_ALL.contains(clear) {
            return Err(Status::InvalidArgs);
        }
        self.state_tracker.update_satisfied(clear, set);
        Ok(())
    }
}

/// One end of an event pair. User signals land on the *peer*'s tracker;
/// losing the last handle to one end freezes the peer's satisfiable set
/// and raises PEER_CLOSED there.
pub struct EventPairDispatcher {
    state_tracker: StateTracker,
    peer_koid: SpinLock<Koid>,
    peer: SpinLock<Option<Arc<Dispatcher>>>,
}

impl EventPairDispatcher {
    pub fn create() -> (Arc<Dispatcher>, Arc<Dispatcher>, Rights) {
        let d0 = Dispatcher::new(DispatcherKind::EventPair(Self::new_half()));
        let d1 = Dispatcher::new(DispatcherKind::EventPair(Self::new_half()));

        d0.as_event_pair_internal().link(&d1);
        d1.as_event_pair_internal().link(&d0);

        (d0, d1, DEFAULT_EVENT_RIGHTS)
    }

    fn new_half() -> Self {
        EventPairDispatcher {
            state_tracker: StateTracker::new(
                true,
                SignalsState::new(Signals::empty(), Signals::PEER_CLOSED | SIGNAL_USER_ALL),
            ),
            peer_koid: SpinLock::new(0),
            peer: SpinLock::new(None),
        }
    }

    fn link(&self, other: &Arc<Dispatcher>) {
        *self.peer_koid.lock() = other.koid();
        *self.peer.lock() = Some(other.clone());
    }

    pub fn state_tracker(&self) -> &StateTracker {
        &self.state_tracker
    }

    pub fn peer_koid(&self) -> Koid {
        *self.peer_koid.lock()
    }

    pub fn user_signal(&self, clear: Signals, set: Signals) -> Result<(), Status> {
        if !SIGNAL_USER_ALL.contains(set) || !SIGNAL_USER_ALL.contains(clear) {
            return Err(Status::InvalidArgs);
        }
        // object_signal may race handle_close on the peer.
        let peer = self.peer.lock().clone();
        let peer = peer.ok_or(Status::BadHandle)?;
        peer.state_tracker()
            .expect("event pair peer has a tracker")
            .update_satisfied(clear, set);
        Ok(())
    }

    pub(crate) fn on_zero_handles(&self) {
        let peer = self.peer.lock().take();
        let Some(peer) = peer else { return };
        let tracker = peer.state_tracker().expect("event pair peer has a tracker");
        // The peer keeps what it already had satisfied, gains PEER_CLOSED,
        // and can never gain anything else.
        let satisfied = tracker.state().satisfied;
        tracker.update_state(
            Signals::empty(),
            Signals::PEER_CLOSED,
            Signals::all(),
            satisfied | Signals::PEER_CLOSED,
        );
        // Also drop the peer's backreference to us; neither side can
        // signal the other anymore.
        if let Ok(pair) = peer.as_event_pair() {
            pair.peer.lock().take();
        }
    }
}

impl Dispatcher {
    pub fn as_event_pair(&self) -> Result<&EventPairDispatcher, Status> {
        match self.kind() {
            DispatcherKind::EventPair(ep) => Ok(ep),
            _ => Err(Status::WrongType),
        }
    }

    fn as_event_pair_internal(&self) -> &EventPairDispatcher {
        self.as_event_pair().expect("just-built event pair")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::handle::make_handle;

    fn setup() {
        crate::sched::host::install();
        crate::cprng::init(b"event-tests");
        crate::object::init();
    }

    #[test]
    fn event_signal_respects_user_range() {
        setup();
        let (event, _) = EventDispatcher::create(0);
        assert_eq!(
            event.user_signal(Signals::empty(), Signals::READABLE),
            Err(Status::InvalidArgs)
        );
        event
            .user_signal(Signals::empty(), Signals::SIGNAL0)
            .unwrap();
        assert!(event
            .state_tracker()
            .unwrap()
            .state()
            .satisfied
            .contains(Signals::SIGNAL0));
    }

    #[test]
    fn pair_signals_cross_and_close_freezes() {
        setup();
        let (d0, d1, rights) = EventPairDispatcher::create();

        // Signalling end 0 raises bits on end 1.
        d0.user_signal(Signals::empty(), Signals::SIGNAL1).unwrap();
        let s1 = d1.state_tracker().unwrap().state();
        assert!(s1.satisfied.contains(Signals::SIGNAL1));

        // Drop the only handle to end 0: end 1 sees PEER_CLOSED and its
        // satisfiable set freezes to what was already satisfied.
        let h0 = make_handle(d0.clone(), rights).unwrap();
        drop(h0);
        let s1 = d1.state_tracker().unwrap().state();
        assert!(s1.satisfied.contains(Signals::PEER_CLOSED));
        assert!(!s1.satisfiable.contains(Signals::SIGNAL2));
        assert!(s1.satisfiable.contains(Signals::SIGNAL1));

        // Signalling through the dead peer now fails.
        assert_eq!(
            d1.user_signal(Signals::empty(), Signals::SIGNAL0),
            Err(Status::BadHandle)
        );
    }
}
