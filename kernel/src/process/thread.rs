//! User threads and their dispatcher.
//!
//! A [`UserThread`] is bound to exactly one process for life. Its state
//! tracker raises SIGNALED on exit. The thread may carry its own exception
//! port; delivery order on a fault is thread → process → system.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use helion_syscall::data::{
    EXCEPTION_STATUS_HANDLER_GONE, EXCEPTION_STATUS_NOT_HANDLED, EXCEPTION_STATUS_RESUME,
    EXCEPTION_STATUS_WAITING, ExceptionReport,
};
use helion_syscall::signals::SIGNAL_SIGNALED;
use helion_syscall::{Koid, Rights, Signals, SignalsState, Status};

use crate::object::state_tracker::StateTracker;
use crate::object::{generate_koid, Dispatcher, DispatcherKind};
use crate::process::exception::ExceptionPort;
use crate::process::ProcessDispatcher;
use crate::sched::{self, ThreadId, UserRegs};
use crate::sync::{SpinLock, WaitQueue};

const DEFAULT_THREAD_RIGHTS: Rights = Rights::basic();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Initial,
    Running,
    Dying,
    Dead,
}

struct ExceptionWait {
    status: i32,
}

pub struct UserThread {
    koid: Koid,
    name: String,
    process: Arc<ProcessDispatcher>,
    state: SpinLock<ThreadState>,
    regs: SpinLock<UserRegs>,
    host_id: SpinLock<Option<ThreadId>>,
    state_tracker: StateTracker,
    exception_port: SpinLock<Option<Arc<ExceptionPort>>>,
    exception: SpinLock<ExceptionWait>,
    exception_waiters: WaitQueue,
}

impl UserThread {
    pub fn create(process: Arc<ProcessDispatcher>, name: &str) -> Arc<UserThread> {
        Arc::new(UserThread {
            koid: generate_koid(),
            name: name.into(),
            process,
            state: SpinLock::new(ThreadState::Initial),
            regs: SpinLock::new(UserRegs::default()),
            host_id: SpinLock::new(None),
            state_tracker: StateTracker::new(
                true,
                SignalsState::new(Signals::empty(), SIGNAL_SIGNALED),
            ),
            exception_port: SpinLock::new(None),
            exception: SpinLock::new(ExceptionWait {
                status: EXCEPTION_STATUS_NOT_HANDLED,
            }),
            exception_waiters: WaitQueue::new(),
        })
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> &Arc<ProcessDispatcher> {
        &self.process
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn state_tracker(&self) -> &StateTracker {
        &self.state_tracker
    }

    /// Start with the given initial register file. Adds the thread to its
    /// process (which refuses once DYING) and hands it to the scheduler.
    pub fn start(
        self: &Arc<Self>,
        pc: u64,
        sp: u64,
        arg1: u64,
        arg2: u64,
    ) -> Result<(), Status> {
        {
            let mut state = self.state.lock();
            if *state != ThreadState::Initial {
                return Err(Status::BadState);
            }
            *state = ThreadState::Running;
        }

        self.process.add_thread(self.clone()).inspect_err(|_| {
            *self.state.lock() = ThreadState::Initial;
        })?;

        *self.regs.lock() = UserRegs { pc, sp, arg1, arg2 };

        let full_name = alloc::format!("{}:{}", self.process.name(), self.name);
        let thread = self.clone();
        let spawned = sched::spawn(
            &full_name,
            Box::new(move || {
                crate::process::bind_current(thread.clone());
                let regs = *thread.regs.lock();
                sched::enter_user(&regs);
                thread.exiting();
                crate::process::unbind_current();
            }),
        );

        match spawned {
            Ok(id) => {
                *self.host_id.lock() = Some(id);
                Ok(())
            }
            Err(e) => {
                self.process.remove_thread(self);
                *self.state.lock() = ThreadState::Initial;
                Err(e)
            }
        }
    }

    /// Voluntary exit of the calling thread. The caller must return to the
    /// thread-start wrapper promptly; bookkeeping completes there.
    pub fn begin_exit(&self) {
        let mut state = self.state.lock();
        debug_assert!(matches!(
            *state,
            ThreadState::Running | ThreadState::Dying
        ));
        *state = ThreadState::Dying;
    }

    /// Deliver a kill: flags the thread as interrupted so every suspension
    /// point unwinds with `Status::Interrupted`.
    pub fn kill(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                ThreadState::Dying | ThreadState::Dead => return,
                _ => *state = ThreadState::Dying,
            }
        }
        let host = *self.host_id.lock();
        if let Some(host) = host {
            sched::interrupt(host);
        }
    }

    /// Runs on the thread itself, after its user work finished: raise
    /// SIGNALED, notify the exception port, unlink from the process (which
    /// may drive it to DEAD), enter the dead state.
    pub(crate) fn exiting(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            *state = ThreadState::Dying;
        }

        self.state_tracker
            .update_satisfied(Signals::empty(), SIGNAL_SIGNALED);

        let eport = self.exception_port.lock().clone();
        if let Some(eport) = eport {
            eport.on_thread_exit(self.process.koid(), self.koid);
        }

        self.process.remove_thread(self);

        *self.state.lock() = ThreadState::Dead;
    }

    // ── Exception handling ───────────────────────────────────────────────

    pub fn set_exception_port(&self, eport: Arc<ExceptionPort>) -> Result<(), Status> {
        if self.state() == ThreadState::Dead {
            return Err(Status::NotFound);
        }
        let mut slot = self.exception_port.lock();
        if slot.is_some() {
            return Err(Status::BadState);
        }
        *slot = Some(eport);
        Ok(())
    }

    pub fn reset_exception_port(&self) {
        self.exception_port.lock().take();
    }

    pub fn exception_port(&self) -> Option<Arc<ExceptionPort>> {
        self.exception_port.lock().clone()
    }

    /// Send `report` to `eport` and block until the handler writes back a
    /// status via `task_resume`. Returns true when the handler asked for a
    /// resume, false to propagate to the next scope.
    pub(crate) fn exception_handler_exchange(
        &self,
        eport: &Arc<ExceptionPort>,
        report: &ExceptionReport,
    ) -> Result<bool, Status> {
        self.exception.lock().status = EXCEPTION_STATUS_WAITING;

        if let Err(e) = eport.send_report(report) {
            self.exception.lock().status = EXCEPTION_STATUS_NOT_HANDLED;
            return Err(e);
        }

        let status = self.exception_waiters.wait_until(|| {
            let wait = self.exception.lock();
            (wait.status != EXCEPTION_STATUS_WAITING).then_some(wait.status)
        })?;

        Ok(status == EXCEPTION_STATUS_RESUME)
    }

    /// Handler-side writeback for `task_resume`.
    pub fn mark_exception_handled(&self, status: i32) -> Result<(), Status> {
        if !matches!(
            status,
            EXCEPTION_STATUS_RESUME | EXCEPTION_STATUS_NOT_HANDLED | EXCEPTION_STATUS_HANDLER_GONE
        ) {
            return Err(Status::InvalidArgs);
        }
        {
            let mut wait = self.exception.lock();
            if wait.status != EXCEPTION_STATUS_WAITING {
                return Err(Status::BadState);
            }
            wait.status = status;
        }
        self.exception_waiters.wake_all();
        Ok(())
    }
}

/// The handle-facing wrapper around a [`UserThread`].
pub struct ThreadDispatcher {
    thread: Arc<UserThread>,
}

impl ThreadDispatcher {
    pub fn create(thread: Arc<UserThread>) -> (Arc<Dispatcher>, Rights) {
        (
            Dispatcher::new(DispatcherKind::Thread(ThreadDispatcher { thread })),
            DEFAULT_THREAD_RIGHTS,
        )
    }

    pub fn thread(&self) -> &Arc<UserThread> {
        &self.thread
    }

    pub fn start(&self, pc: u64, sp: u64, arg1: u64, arg2: u64) -> Result<(), Status> {
        self.thread.start(pc, sp, arg1, arg2)
    }

    pub fn kill(&self) {
        self.thread.kill()
    }

    pub fn set_exception_port(&self, eport: Arc<ExceptionPort>) -> Result<(), Status> {
        self.thread.set_exception_port(eport)
    }

    pub fn reset_exception_port(&self) {
        self.thread.reset_exception_port()
    }
}
