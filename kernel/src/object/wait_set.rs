//! Wait sets: long-lived collections of (handle, signals, cookie) entries
//! that can be waited on repeatedly.
//!
//! Each entry is an observer on its target's state tracker. Entry state
//! lives under the wait set's own mutex, which nests *inside* tracker
//! locks; nothing below that mutex may take another lock except the wait
//! queue, and wakes are issued only after the mutex is released.
//!
//! Entry lifecycle: ADD_PENDING (inserted, observer not yet attached) →
//! ADDED → REMOVED. `remove` racing an unfinished `add` pretends the add
//! never completed, exactly like a remove of an unknown cookie.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use helion_syscall::data::WaitSetResult;
use helion_syscall::{Rights, Signals, SignalsState, Status, Time};

use crate::object::handle::HandleId;
use crate::object::state_tracker::{CancelOutcome, StateObserver, StateTracker};
use crate::object::{Dispatcher, DispatcherKind};
use crate::sync::{SpinLock, WaitQueue};

const DEFAULT_WAIT_SET_RIGHTS: Rights = Rights::READ.union(Rights::WRITE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Life {
    AddPending,
    Added,
    Removed,
}

struct EntryRecord {
    watched: Signals,
    life: Life,
    handle: Option<HandleId>,
    dispatcher: Option<Arc<Dispatcher>>,
    observer: Option<Arc<WsObserver>>,
    triggered: bool,
    signals: SignalsState,
}

struct WsState {
    cancelled: bool,
    entries: BTreeMap<u64, EntryRecord>,
    /// Cookies in trigger order.
    triggered: Vec<u64>,
}

struct WaitSetInner {
    state: SpinLock<WsState>,
    readers: WaitQueue,
}

impl WaitSetInner {
    /// Mark `cookie` triggered. Caller holds the state lock; returns true
    /// when the reader queue must be woken after release.
    fn trigger_locked(state: &mut WsState, cookie: u64) -> bool {
        let was_empty = state.triggered.is_empty();
        debug_assert!(!state.triggered.contains(&cookie));
        state.triggered.push(cookie);
        was_empty
    }
}

/// Observer attached to one target tracker on behalf of one entry.
struct WsObserver {
    inner: Weak<WaitSetInner>,
    cookie: u64,
    watched: Signals,
}

impl WsObserver {
    fn entry_fires(&self, state: SignalsState) -> bool {
        state.satisfied.intersects(self.watched) || !state.satisfiable.intersects(self.watched)
    }
}

impl StateObserver for WsObserver {
    fn on_initialize(&self, initial: SignalsState) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut wake = false;
        {
            let mut ws = inner.state.lock();
            let Some(entry) = ws.entries.get_mut(&self.cookie) else {
                return false;
            };
            debug_assert_eq!(entry.life, Life::AddPending);
            entry.life = Life::Added;
            entry.signals = initial;
            if self.entry_fires(initial) {
                entry.triggered = true;
                wake = WaitSetInner::trigger_locked(&mut ws, self.cookie);
            }
        }
        if wake {
            inner.readers.wake_all();
        }
        wake
    }

    fn on_state_change(&self, new_state: SignalsState) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut wake = false;
        {
            let mut ws = inner.state.lock();
            let Some(entry) = ws.entries.get_mut(&self.cookie) else {
                return false;
            };
            if entry.life != Life::Added {
                return false;
            }
            entry.signals = new_state;

            if self.entry_fires(new_state) {
                if !entry.triggered {
                    entry.triggered = true;
                    wake = WaitSetInner::trigger_locked(&mut ws, self.cookie);
                }
            } else if entry.triggered {
                entry.triggered = false;
                let cookie = self.cookie;
                ws.triggered.retain(|&c| c != cookie);
            }
        }
        if wake {
            inner.readers.wake_all();
        }
        wake
    }

    fn on_cancel(&self, handle: HandleId) -> CancelOutcome {
        let Some(inner) = self.inner.upgrade() else {
            return CancelOutcome::default();
        };
        let mut wake = false;
        let mut should_remove = false;
        {
            let mut ws = inner.state.lock();
            let Some(entry) = ws.entries.get_mut(&self.cookie) else {
                return CancelOutcome::default();
            };
            if entry.life == Life::Removed {
                // remove_entry is mid-flight; it detaches us.
                return CancelOutcome::default();
            }
            if entry.handle != Some(handle) {
                return CancelOutcome::default();
            }
            entry.handle = None;
            entry.dispatcher = None;
            should_remove = true;
            if !entry.triggered {
                entry.triggered = true;
                wake = WaitSetInner::trigger_locked(&mut ws, self.cookie);
            }
        }
        if wake {
            inner.readers.wake_all();
        }
        CancelOutcome {
            awoke: wake,
            should_remove,
        }
    }
}

/// Observer on the wait set's own tracker: closing the wait-set handle
/// cancels any in-progress wait.
struct WsSelfObserver {
    inner: Weak<WaitSetInner>,
}

impl StateObserver for WsSelfObserver {
    fn on_initialize(&self, _initial: SignalsState) -> bool {
        false
    }

    fn on_state_change(&self, _new_state: SignalsState) -> bool {
        false
    }

    fn on_cancel(&self, _handle: HandleId) -> CancelOutcome {
        let Some(inner) = self.inner.upgrade() else {
            return CancelOutcome::default();
        };
        inner.state.lock().cancelled = true;
        inner.readers.wake_all();
        CancelOutcome {
            awoke: true,
            should_remove: false,
        }
    }
}

pub struct WaitSetDispatcher {
    inner: Arc<WaitSetInner>,
    /// Not waitable; exists to observe our own handle's cancellation.
    tracker: StateTracker,
}

impl WaitSetDispatcher {
    pub fn create() -> (Arc<Dispatcher>, Rights) {
        let inner = Arc::new(WaitSetInner {
            state: SpinLock::new(WsState {
                cancelled: false,
                entries: BTreeMap::new(),
                triggered: Vec::new(),
            }),
            readers: WaitQueue::new(),
        });
        let ws = WaitSetDispatcher {
            inner: inner.clone(),
            tracker: StateTracker::new(false, SignalsState::empty()),
        };
        ws.tracker.add_observer(Arc::new(WsSelfObserver {
            inner: Arc::downgrade(&inner),
        }));
        (
            Dispatcher::new(DispatcherKind::WaitSet(ws)),
            DEFAULT_WAIT_SET_RIGHTS,
        )
    }

    pub fn state_tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Register `(handle, watched, cookie)`. Runs under the caller's
    /// handle-table lock up to the observer attach, which happens outside
    /// every other lock.
    pub fn add_entry(
        &self,
        watched: Signals,
        cookie: u64,
        handle: HandleId,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<(), Status> {
        let tracker = dispatcher
            .state_tracker()
            .filter(|t| t.is_waitable())
            .ok_or(Status::NotSupported)?;

        let observer = Arc::new(WsObserver {
            inner: Arc::downgrade(&self.inner),
            cookie,
            watched,
        });

        {
            let mut ws = self.inner.state.lock();
            if ws.entries.contains_key(&cookie) {
                return Err(Status::AlreadyExists);
            }
            ws.entries.insert(
                cookie,
                EntryRecord {
                    watched,
                    life: Life::AddPending,
                    handle: Some(handle),
                    dispatcher: Some(dispatcher.clone()),
                    observer: Some(observer.clone()),
                    triggered: false,
                    signals: SignalsState::empty(),
                },
            );
        }

        // Attaching delivers on_initialize, which flips the entry to ADDED.
        tracker.add_observer(observer);
        Ok(())
    }

    /// Deregister `cookie`.
    pub fn remove_entry(&self, cookie: u64) -> Result<(), Status> {
        let (dispatcher, observer);
        {
            let mut ws = self.inner.state.lock();
            let Some(mut entry) = ws.entries.remove(&cookie) else {
                return Err(Status::NotFound);
            };
            if entry.triggered {
                ws.triggered.retain(|&c| c != cookie);
            }
            if entry.life == Life::AddPending {
                // We are racing the tail of add_entry; put it back and
                // treat the add as not yet visible.
                ws.entries.insert(cookie, entry);
                return Ok(());
            }
            debug_assert_eq!(entry.life, Life::Added);
            entry.life = Life::Removed;
            dispatcher = entry.dispatcher.take();
            observer = entry.observer.take();
        }
        if let (Some(dispatcher), Some(observer)) = (dispatcher, observer) {
            if let Some(tracker) = dispatcher.state_tracker() {
                tracker.remove_observer(observer.as_ref());
            }
        }
        Ok(())
    }

    /// Wait for any entry to trigger, then report up to `max_results`
    /// currently-triggered entries. Returns `(results, total_triggered)`.
    pub fn wait(
        &self,
        deadline: Option<Time>,
        max_results: usize,
    ) -> Result<(Vec<WaitSetResult>, u32), Status> {
        let inner = &self.inner;
        inner.readers.wait_until_deadline(deadline, || {
            let ws = inner.state.lock();
            (ws.cancelled || !ws.triggered.is_empty()).then_some(())
        })?;

        let ws = inner.state.lock();
        if ws.cancelled {
            return Err(Status::Cancelled);
        }

        let mut results = Vec::with_capacity(max_results.min(ws.triggered.len()));
        for &cookie in ws.triggered.iter().take(max_results) {
            let entry = &ws.entries[&cookie];
            let result = if entry.handle.is_some() {
                if entry.signals.satisfied.intersects(entry.watched) {
                    WaitSetResult {
                        cookie,
                        wait_result: 0,
                        reserved: 0,
                        satisfied: entry.signals.satisfied.bits(),
                        satisfiable: entry.signals.satisfiable.bits(),
                    }
                } else {
                    debug_assert!(!entry.signals.satisfiable.intersects(entry.watched));
                    WaitSetResult {
                        cookie,
                        wait_result: Status::BadState.as_i32(),
                        reserved: 0,
                        satisfied: entry.signals.satisfied.bits(),
                        satisfiable: entry.signals.satisfiable.bits(),
                    }
                }
            } else {
                WaitSetResult {
                    cookie,
                    wait_result: Status::Cancelled.as_i32(),
                    reserved: 0,
                    satisfied: 0,
                    satisfiable: 0,
                }
            };
            results.push(result);
        }
        Ok((results, ws.triggered.len() as u32))
    }
}

impl Drop for WaitSetDispatcher {
    fn drop(&mut self) {
        // Detach every remaining observer; entries do not keep the wait
        // set alive, but the source trackers keep the observers.
        let mut detach = Vec::new();
        {
            let mut ws = self.inner.state.lock();
            let cookies: Vec<u64> = ws.entries.keys().copied().collect();
            for cookie in cookies {
                let entry = ws.entries.get_mut(&cookie).unwrap();
                entry.life = Life::Removed;
                if let (Some(d), Some(o)) = (entry.dispatcher.take(), entry.observer.take()) {
                    detach.push((d, o));
                }
            }
        }
        for (dispatcher, observer) in detach {
            if let Some(tracker) = dispatcher.state_tracker() {
                tracker.remove_observer(observer.as_ref());
            }
        }
    }
}
