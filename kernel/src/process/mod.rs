//! Processes, threads, futexes and exception delivery.
//!
//! The thread registry binds host scheduler contexts to [`UserThread`]s so
//! syscall entry can find the current thread and process.

pub mod exception;
pub mod futex;
pub mod process;
pub mod thread;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use helion_syscall::Status;

use crate::sched::{self, ThreadId};
use crate::sync::SpinLock;

pub use process::ProcessDispatcher;
pub use thread::{ThreadDispatcher, UserThread};

static THREADS: SpinLock<BTreeMap<ThreadId, Arc<UserThread>>> = SpinLock::new(BTreeMap::new());

/// Associate the calling host thread with `thread`. Runs in the spawn
/// wrapper before any user code.
pub(crate) fn bind_current(thread: Arc<UserThread>) {
    let id = sched::register_current();
    THREADS.lock().insert(id, thread);
}

pub(crate) fn unbind_current() {
    if let Some(id) = sched::current_id() {
        THREADS.lock().remove(&id);
        sched::unregister(id);
    }
}

/// The [`UserThread`] running on the calling host thread, if any.
pub fn current_thread() -> Option<Arc<UserThread>> {
    let id = sched::current_id()?;
    THREADS.lock().get(&id).cloned()
}

/// The process of the calling thread. Syscall entry uses this; a call from
/// outside any process context is a kernel bug upstream, reported as
/// `BadState`.
pub fn current_process() -> Result<Arc<ProcessDispatcher>, Status> {
    current_thread()
        .map(|t| t.process().clone())
        .ok_or(Status::BadState)
}
