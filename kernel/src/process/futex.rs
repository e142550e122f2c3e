//! Per-process futexes: address-keyed wait queues with compare-and-park.
//!
//! The compare of the futex word and the enqueue of the waiter happen
//! under the context lock, so a wake between them is impossible. Keys are
//! user virtual addresses, which makes every futex private to its process.
//!
//! A timeout that races a wake reports success: if a wake with count 1
//! found a waiter, some `wait` call must return woken, or lock
//! implementations built on top would lose wakeups.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;

use helion_syscall::{Status, Time};

use crate::memory::{AddressSpace, UserSliceRead};
use crate::sched::{self, ParkResult, ThreadId};
use crate::sync::SpinLock;

struct FutexState {
    /// futex address → parked threads, FIFO.
    queues: BTreeMap<u64, VecDeque<ThreadId>>,
    /// Reverse index: which queue a parked thread currently sits on.
    /// Requeue rewrites this; timeout uses it to find itself.
    keys: BTreeMap<ThreadId, u64>,
}

pub struct FutexContext {
    state: SpinLock<FutexState>,
}

impl FutexContext {
    pub fn new() -> Self {
        FutexContext {
            state: SpinLock::new(FutexState {
                queues: BTreeMap::new(),
                keys: BTreeMap::new(),
            }),
        }
    }

    fn validate_addr(addr: u64) -> Result<(), Status> {
        if addr == 0 || addr % 4 != 0 {
            return Err(Status::InvalidArgs);
        }
        Ok(())
    }

    fn read_word(aspace: &Arc<AddressSpace>, addr: u64) -> Result<u32, Status> {
        UserSliceRead::new(aspace, addr, 4)?.read_u32()
    }

    /// Compare `*addr == expected` and park until woken, requeued-and-
    /// woken, timed out or interrupted.
    pub fn wait(
        &self,
        aspace: &Arc<AddressSpace>,
        addr: u64,
        expected: u32,
        deadline: Option<Time>,
    ) -> Result<(), Status> {
        Self::validate_addr(addr)?;
        let id = sched::current_id().ok_or(Status::BadState)?;

        {
            let mut state = self.state.lock();
            // Value check under the lock: atomic with respect to wake.
            let value = Self::read_word(aspace, addr)?;
            if value != expected {
                return Err(Status::AlreadyBound);
            }
            state.queues.entry(addr).or_default().push_back(id);
            state.keys.insert(id, addr);
        }

        loop {
            let outcome = sched::park_current(deadline);
            let mut state = self.state.lock();

            if sched::current_interrupted() {
                Self::unlink(&mut state, id);
                return Err(Status::Interrupted);
            }
            if !state.keys.contains_key(&id) {
                // A wake consumed us, possibly racing the timeout; the
                // wake wins.
                return Ok(());
            }
            if outcome == ParkResult::TimedOut {
                Self::unlink(&mut state, id);
                return Err(Status::TimedOut);
            }
            // Spurious wakeup: still queued, park again.
        }
    }

    /// Wake up to `count` waiters in FIFO order; returns how many.
    pub fn wake(&self, addr: u64, count: usize) -> Result<usize, Status> {
        Self::validate_addr(addr)?;
        if count == 0 {
            return Ok(0);
        }
        let woken = {
            let mut state = self.state.lock();
            self.dequeue(&mut state, addr, count)
        };
        let n = woken.len();
        for id in woken {
            sched::wake(id);
        }
        Ok(n)
    }

    /// Compare `*wake_addr == expected`; wake up to `wake_count` waiters,
    /// then move up to `requeue_count` of the remainder onto `requeue_addr`.
    pub fn requeue(
        &self,
        aspace: &Arc<AddressSpace>,
        wake_addr: u64,
        wake_count: usize,
        expected: u32,
        requeue_addr: u64,
        requeue_count: usize,
    ) -> Result<usize, Status> {
        Self::validate_addr(wake_addr)?;
        Self::validate_addr(requeue_addr)?;
        if wake_addr == requeue_addr {
            return Err(Status::InvalidArgs);
        }

        let woken = {
            let mut state = self.state.lock();

            let value = Self::read_word(aspace, wake_addr)?;
            if value != expected {
                return Err(Status::AlreadyBound);
            }

            let woken = self.dequeue(&mut state, wake_addr, wake_count);

            // Move survivors to the new key, preserving order.
            let moved: VecDeque<ThreadId> = match state.queues.get_mut(&wake_addr) {
                Some(queue) => {
                    let n = requeue_count.min(queue.len());
                    queue.drain(..n).collect()
                }
                None => VecDeque::new(),
            };
            if state
                .queues
                .get(&wake_addr)
                .is_some_and(|q| q.is_empty())
            {
                state.queues.remove(&wake_addr);
            }
            for &id in &moved {
                state.keys.insert(id, requeue_addr);
            }
            if !moved.is_empty() {
                state.queues.entry(requeue_addr).or_default().extend(moved);
            }
            woken
        };

        let n = woken.len();
        for id in woken {
            sched::wake(id);
        }
        Ok(n)
    }

    /// Release every parked thread; used at process teardown after all
    /// threads are flagged as dying, so the waiters unwind as interrupted.
    pub fn wake_all(&self) {
        let all: Vec<ThreadId> = {
            let mut state = self.state.lock();
            state.queues.clear();
            let ids = state.keys.keys().copied().collect();
            state.keys.clear();
            ids
        };
        for id in all {
            sched::wake(id);
        }
    }

    fn dequeue(&self, state: &mut FutexState, addr: u64, count: usize) -> Vec<ThreadId> {
        let mut out = Vec::new();
        let mut empty = false;
        if let Some(queue) = state.queues.get_mut(&addr) {
            while out.len() < count {
                match queue.pop_front() {
                    Some(id) => out.push(id),
                    None => break,
                }
            }
            empty = queue.is_empty();
        }
        if empty {
            state.queues.remove(&addr);
        }
        for id in &out {
            state.keys.remove(id);
        }
        out
    }

    fn unlink(state: &mut FutexState, id: ThreadId) {
        let Some(addr) = state.keys.remove(&id) else {
            return;
        };
        let mut empty = false;
        if let Some(queue) = state.queues.get_mut(&addr) {
            queue.retain(|&t| t != id);
            empty = queue.is_empty();
        }
        if empty {
            state.queues.remove(&addr);
        }
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self, addr: u64) -> usize {
        self.state
            .lock()
            .queues
            .get(&addr)
            .map_or(0, |q| q.len())
    }
}
