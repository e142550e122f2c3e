//! Scheduler cooperation contract.
//!
//! The core never owns a run queue. Every suspension point (wait events,
//! futexes, port waits, two-phase pipe backpressure) parks the current
//! thread through the installed [`ThreadHost`] and is woken by an unpark.
//!
//! ## Wake-pending guarantee
//!
//! An `unpark` delivered before the target thread reaches `park` must make
//! the next `park` return immediately; without this token the classic
//! check-then-block race loses wakeups. Every blocking primitive in the
//! core re-checks its condition after `park` returns, so spurious wakeups
//! are harmless.
//!
//! ## Interruption
//!
//! Killing a thread (directly or through its process) flags the thread as
//! interrupted and unparks it. All suspension points poll the flag and
//! convert the wait into `Status::Interrupted`.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use helion_syscall::{Status, Time, TIME_INFINITE};
use spin::Once;

use crate::sync::SpinLock;

#[cfg(test)]
pub mod host;

/// Identifies a kernel execution context to the host scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// Initial register file of a user thread: entry PC, stack pointer and the
/// two opaque arguments placed in registers at start.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserRegs {
    pub pc: u64,
    pub sp: u64,
    pub arg1: u64,
    pub arg2: u64,
}

/// Outcome of a park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkResult {
    /// Unparked (or a wake-pending token was outstanding, or the wakeup was
    /// spurious; callers re-check their condition).
    Woken,
    /// The absolute deadline passed.
    TimedOut,
}

/// The scheduling services the embedder provides.
pub trait ThreadHost: Send + Sync {
    /// The calling context's id, if it is a host-managed thread.
    fn current(&self) -> Option<ThreadId>;

    /// Create and start a kernel execution context running `main`.
    fn spawn(&self, name: &str, main: Box<dyn FnOnce() + Send>) -> Result<ThreadId, Status>;

    /// Block the calling thread until unparked or `deadline` (absolute
    /// nanoseconds) passes. `None` blocks forever.
    fn park(&self, deadline: Option<Time>) -> ParkResult;

    /// Wake `id`. Must set the wake-pending token when the target is not
    /// parked yet.
    fn unpark(&self, id: ThreadId);

    /// Monotonic nanoseconds since an arbitrary epoch. Never zero.
    fn now(&self) -> Time;

    /// Let another runnable thread go first.
    fn yield_now(&self);

    /// Run the user program described by `regs` on the calling thread and
    /// return when it is done. On real hardware this drops to user mode and
    /// only "returns" through the thread-teardown path.
    fn enter_user(&self, regs: &UserRegs);
}

static HOST: Once<&'static dyn ThreadHost> = Once::new();

/// Install the scheduler hooks. Must happen exactly once, before any
/// object is created.
pub fn install(host: &'static dyn ThreadHost) {
    HOST.call_once(|| host);
}

fn host() -> &'static dyn ThreadHost {
    *HOST.get().expect("sched: no ThreadHost installed")
}

#[inline]
pub fn current_id() -> Option<ThreadId> {
    host().current()
}

pub fn spawn(name: &str, main: Box<dyn FnOnce() + Send>) -> Result<ThreadId, Status> {
    host().spawn(name, main)
}

#[inline]
pub fn park_current(deadline: Option<Time>) -> ParkResult {
    host().park(deadline)
}

#[inline]
pub fn wake(id: ThreadId) {
    host().unpark(id)
}

#[inline]
pub fn now() -> Time {
    host().now()
}

#[inline]
pub fn yield_now() {
    host().yield_now()
}

#[inline]
pub fn enter_user(regs: &UserRegs) {
    host().enter_user(regs)
}

/// Convert a relative timeout in nanoseconds to an absolute park deadline.
/// `TIME_INFINITE` means "no deadline".
pub fn deadline_after(timeout: Time) -> Option<Time> {
    if timeout == TIME_INFINITE {
        None
    } else {
        Some(now().saturating_add(timeout))
    }
}

// ── Per-thread interrupt flags ───────────────────────────────────────────────

struct ThreadFlags {
    interrupted: AtomicBool,
}

static FLAGS: SpinLock<BTreeMap<ThreadId, Arc<ThreadFlags>>> = SpinLock::new(BTreeMap::new());

/// Register the calling context so it can be interrupted. Called from the
/// thread-start wrapper; idempotent.
pub fn register_current() -> ThreadId {
    let id = current_id().expect("sched: register outside host thread");
    FLAGS.lock().entry(id).or_insert_with(|| {
        Arc::new(ThreadFlags {
            interrupted: AtomicBool::new(false),
        })
    });
    id
}

/// Drop the interrupt record of a finished thread.
pub fn unregister(id: ThreadId) {
    FLAGS.lock().remove(&id);
}

/// Flag `id` as interrupted and kick it out of any park.
pub fn interrupt(id: ThreadId) {
    let flags = FLAGS.lock().get(&id).cloned();
    if let Some(flags) = flags {
        flags.interrupted.store(true, Ordering::Release);
    }
    wake(id);
}

/// True when the calling thread has a pending interrupt.
pub fn current_interrupted() -> bool {
    let Some(id) = current_id() else {
        return false;
    };
    let flags = FLAGS.lock().get(&id).cloned();
    flags.map_or(false, |f| f.interrupted.load(Ordering::Acquire))
}
