//! Wait queue for blocking/waking kernel threads.
//!
//! A [`WaitQueue`] holds a FIFO list of [`ThreadId`]s waiting for an event.
//! [`WaitQueue::wait_until`] is the only blocking primitive: it evaluates a
//! caller-supplied condition under the waiter lock, registering the caller
//! as a waiter before releasing it, which closes the classical lost-wakeup
//! race:
//!
//! ```text
//! Incorrect (racy) pattern:
//!   if !condition() { queue.wait(); }   ← wakeup between check and wait is lost
//!
//! Correct pattern (what wait_until does internally):
//!   loop {
//!       hold waiters lock
//!       check condition → return if true
//!       push self to waiters (lock still held)
//!       release waiters lock
//!       park                            ← wake-pending token handles late wakeups
//!       // woken → re-check condition
//!   }
//! ```
//!
//! The scheduler contract's wake-pending token (see [`crate::sched`])
//! guarantees that an unpark racing with the transition to parked is never
//! silently dropped. Spurious wakeups only cause a condition re-check.
//!
//! Every wait takes an optional absolute deadline and observes thread
//! interruption, returning `TimedOut` or `Interrupted` respectively.

use alloc::collections::VecDeque;

use helion_syscall::{Status, Time};

use crate::sched::{self, ParkResult, ThreadId};
use crate::sync::SpinLock;

/// A FIFO queue of threads waiting for an event.
pub struct WaitQueue {
    waiters: SpinLock<VecDeque<ThreadId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Block until `condition` returns `Some(T)`, forever if need be.
    /// Still interruptible by thread kill.
    pub fn wait_until<F, T>(&self, condition: F) -> Result<T, Status>
    where
        F: FnMut() -> Option<T>,
    {
        self.wait_until_deadline(None, condition)
    }

    /// Block until `condition` returns `Some(T)`, the absolute `deadline`
    /// passes, or the calling thread is interrupted.
    ///
    /// The condition is evaluated under the waiter lock; the caller is
    /// queued (still under the lock) before blocking, so a concurrent
    /// `wake_one`/`wake_all` can never slip between check and park.
    pub fn wait_until_deadline<F, T>(
        &self,
        deadline: Option<Time>,
        mut condition: F,
    ) -> Result<T, Status>
    where
        F: FnMut() -> Option<T>,
    {
        let id = sched::current_id().expect("WaitQueue::wait_until with no current thread");

        loop {
            {
                let mut waiters = self.waiters.lock();

                if let Some(value) = condition() {
                    Self::remove(&mut waiters, id);
                    return Ok(value);
                }
                if sched::current_interrupted() {
                    Self::remove(&mut waiters, id);
                    return Err(Status::Interrupted);
                }
                if !waiters.contains(&id) {
                    waiters.push_back(id);
                }
            } // waiters lock released here

            match sched::park_current(deadline) {
                ParkResult::Woken => continue,
                ParkResult::TimedOut => {
                    let mut waiters = self.waiters.lock();
                    // A wake may have raced the timeout; the condition is
                    // the truth.
                    if let Some(value) = condition() {
                        Self::remove(&mut waiters, id);
                        return Ok(value);
                    }
                    Self::remove(&mut waiters, id);
                    return Err(Status::TimedOut);
                }
            }
        }
    }

    fn remove(waiters: &mut VecDeque<ThreadId>, id: ThreadId) {
        if let Some(pos) = waiters.iter().position(|&w| w == id) {
            waiters.remove(pos);
        }
    }

    /// Wake the first waiting thread (FIFO order). Returns `true` if a
    /// thread was dequeued.
    pub fn wake_one(&self) -> bool {
        let id = self.waiters.lock().pop_front();
        if let Some(id) = id {
            sched::wake(id);
            true
        } else {
            false
        }
    }

    /// Wake every waiting thread; returns how many were dequeued.
    pub fn wake_all(&self) -> usize {
        let ids: VecDeque<ThreadId> = core::mem::take(&mut *self.waiters.lock());
        let count = ids.len();
        for id in ids {
            sched::wake(id);
        }
        count
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn setup() {
        crate::sched::host::install();
    }

    #[test]
    fn wait_until_sees_late_condition() {
        setup();
        let queue = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));

        let (q, f) = (queue.clone(), flag.clone());
        let waiter = std::thread::spawn(move || {
            q.wait_until(|| f.load(Ordering::Acquire).then_some(())).unwrap()
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        flag.store(true, Ordering::Release);
        queue.wake_one();
        waiter.join().unwrap();
    }

    #[test]
    fn deadline_expires_when_never_signalled() {
        setup();
        let queue = WaitQueue::new();
        let deadline = Some(sched::now() + 5_000_000); // 5 ms
        let r: Result<(), _> = queue.wait_until_deadline(deadline, || None);
        assert_eq!(r.unwrap_err(), Status::TimedOut);
        assert_eq!(queue.waiter_count(), 0);
    }

    #[test]
    fn wake_all_releases_every_waiter() {
        setup();
        let queue = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));
        let mut joins = Vec::new();
        for _ in 0..3 {
            let (q, f) = (queue.clone(), flag.clone());
            joins.push(std::thread::spawn(move || {
                q.wait_until(|| f.load(Ordering::Acquire).then_some(())).unwrap()
            }));
        }
        while queue.waiter_count() < 3 {
            std::thread::yield_now();
        }
        flag.store(true, Ordering::Release);
        queue.wake_all();
        for j in joins {
            j.join().unwrap();
        }
    }
}
