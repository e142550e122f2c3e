//! The process dispatcher: lifecycle, handle table, bad-handle policy.
//!
//! State machine: INITIAL → RUNNING → DYING → DEAD. Entering DYING kills
//! every thread and releases all futex waiters; the last thread unlinking
//! drives DEAD, which drains the handle table, destroys the address space,
//! raises SIGNALED and notifies the exception port.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use helion_syscall::data::{
    POLICY_BAD_HANDLE_EXIT, POLICY_BAD_HANDLE_IGNORE, POLICY_BAD_HANDLE_LOG,
};
use helion_syscall::signals::SIGNAL_SIGNALED;
use helion_syscall::{HandleValue, Koid, Rights, Signals, SignalsState, Status};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::memory::AddressSpace;
use crate::object::handle::{self, HandleId, HandleOwner};
use crate::object::state_tracker::StateTracker;
use crate::object::{Dispatcher, DispatcherKind};
use crate::process::exception::ExceptionPort;
use crate::process::futex::FutexContext;
use crate::process::thread::UserThread;
use crate::sync::SpinLock;

const DEFAULT_PROCESS_RIGHTS: Rights = Rights::basic();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Initial,
    Running,
    Dying,
    Dead,
}

struct LifeState {
    state: ProcessState,
    retcode: i32,
}

/// The per-process handle table: arena slot ids owned by this process.
struct HandleTable {
    ids: alloc::collections::BTreeSet<u32>,
}

static PROCESSES: SpinLock<Vec<Weak<ProcessDispatcher>>> = SpinLock::new(Vec::new());

pub struct ProcessDispatcher {
    koid: Koid,
    name: String,
    _flags: u32,
    /// Per-process XOR mask for handle values.
    secret: u32,
    life: SpinLock<LifeState>,
    table: SpinLock<HandleTable>,
    threads: SpinLock<Vec<Arc<UserThread>>>,
    aspace: Arc<AddressSpace>,
    futex: FutexContext,
    state_tracker: StateTracker,
    exception_port: SpinLock<Option<Arc<ExceptionPort>>>,
    bad_handle_policy: AtomicU32,
}

impl ProcessDispatcher {
    /// Create a process in INITIAL with a fresh address space and handle
    /// secret, registered on the global process list.
    pub fn create(name: &str, flags: u32) -> Result<(Arc<Dispatcher>, Rights), Status> {
        if name.len() > helion_syscall::MAX_NAME_LEN {
            return Err(Status::InvalidArgs);
        }
        let koid = crate::object::generate_koid();
        let process = Arc::new(ProcessDispatcher {
            koid,
            name: name.into(),
            _flags: flags,
            secret: handle::new_handle_secret(),
            life: SpinLock::new(LifeState {
                state: ProcessState::Initial,
                retcode: 0,
            }),
            table: SpinLock::new(HandleTable {
                ids: alloc::collections::BTreeSet::new(),
            }),
            threads: SpinLock::new(Vec::new()),
            aspace: AddressSpace::new(),
            futex: FutexContext::new(),
            state_tracker: StateTracker::new(
                true,
                SignalsState::new(Signals::empty(), SIGNAL_SIGNALED),
            ),
            exception_port: SpinLock::new(None),
            bad_handle_policy: AtomicU32::new(POLICY_BAD_HANDLE_IGNORE),
        });

        PROCESSES.lock().push(Arc::downgrade(&process));
        log::debug!("process {} created (koid {})", process.name, koid);

        Ok((
            Dispatcher::with_koid(koid, DispatcherKind::Process(process)),
            DEFAULT_PROCESS_RIGHTS,
        ))
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aspace(&self) -> &Arc<AddressSpace> {
        &self.aspace
    }

    pub fn futex_context(&self) -> &FutexContext {
        &self.futex
    }

    pub fn state_tracker(&self) -> &StateTracker {
        &self.state_tracker
    }

    pub fn state(&self) -> ProcessState {
        self.life.lock().state
    }

    pub fn retcode(&self) -> i32 {
        self.life.lock().retcode
    }

    /// Find a live process by koid.
    pub fn lookup_by_koid(koid: Koid) -> Option<Arc<ProcessDispatcher>> {
        let mut list = PROCESSES.lock();
        list.retain(|p| p.strong_count() > 0);
        list.iter().filter_map(|p| p.upgrade()).find(|p| p.koid() == koid)
    }

    /// Find one of this process's threads by koid.
    pub fn lookup_thread_by_koid(&self, koid: Koid) -> Option<Arc<UserThread>> {
        self.threads
            .lock()
            .iter()
            .find(|t| t.koid() == koid)
            .cloned()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start the initial thread; INITIAL → RUNNING.
    pub fn start(
        &self,
        thread: &Arc<UserThread>,
        pc: u64,
        sp: u64,
        arg1: u64,
        arg2: u64,
    ) -> Result<(), Status> {
        {
            let life = self.life.lock();
            if life.state != ProcessState::Initial {
                return Err(Status::BadState);
            }
        }
        thread.start(pc, sp, arg1, arg2)?;
        self.set_state(ProcessState::Running);
        Ok(())
    }

    /// Voluntary exit of the calling process.
    pub fn exit(&self, retcode: i32) {
        {
            let mut life = self.life.lock();
            if matches!(life.state, ProcessState::Dying | ProcessState::Dead) {
                return;
            }
            life.retcode = retcode;
        }
        self.set_state(ProcessState::Dying);
    }

    pub fn kill(&self) {
        let target = {
            let mut life = self.life.lock();
            match life.state {
                ProcessState::Dead => return,
                ProcessState::Dying => ProcessState::Dying,
                _ => {
                    // A plain kill shows up as a failure exit.
                    if life.retcode == 0 {
                        life.retcode = -1;
                    }
                    if self.threads.lock().is_empty() {
                        ProcessState::Dead
                    } else {
                        ProcessState::Dying
                    }
                }
            }
        };
        self.set_state(target);
    }

    /// The last handle to this process going away acts as a kill.
    pub(crate) fn all_handles_closed(&self) {
        // Checked outside the lock: this can re-enter through the handle
        // table drain dropping the last self-reference.
        if matches!(self.state(), ProcessState::Dying | ProcessState::Dead) {
            return;
        }
        self.kill();
    }

    fn set_state(&self, target: ProcessState) {
        {
            let mut life = self.life.lock();
            if life.state == ProcessState::Dead && target != ProcessState::Dead {
                panic!("process {}: transition out of DEAD", self.koid);
            }
            if life.state == target {
                return;
            }
            life.state = target;
        }

        match target {
            ProcessState::Dying => self.kill_all_threads(),
            ProcessState::Dead => self.on_dead(),
            _ => {}
        }
    }

    fn kill_all_threads(&self) {
        let threads: Vec<Arc<UserThread>> = self.threads.lock().clone();
        for thread in &threads {
            thread.kill();
        }
        // Issued after every thread is marked dying, so none can enter a
        // fresh futex wait and miss the wakeup.
        self.futex.wake_all();
    }

    fn on_dead(&self) {
        log::debug!("process {} (koid {}) dead", self.name, self.koid);

        // Drain the table under its lock, destroy outside it: handle
        // destruction runs dispatcher close hooks.
        let owners: Vec<HandleOwner> = {
            let mut table = self.table.lock();
            let ids: Vec<u32> = table.ids.iter().copied().collect();
            table.ids.clear();
            ids.into_iter()
                .map(|raw| {
                    let id = HandleId(raw);
                    handle::set_owner(id, 0);
                    HandleOwner::from_table(id)
                })
                .collect()
        };
        drop(owners);

        self.aspace.destroy();

        self.state_tracker
            .update_satisfied(Signals::empty(), SIGNAL_SIGNALED);

        let eport = self.exception_port.lock().clone();
        if let Some(eport) = eport {
            eport.on_process_exit(self.koid);
        }
    }

    // ── Threads ──────────────────────────────────────────────────────────

    pub(crate) fn add_thread(&self, thread: Arc<UserThread>) -> Result<(), Status> {
        let life = self.life.lock();
        if matches!(life.state, ProcessState::Dying | ProcessState::Dead) {
            return Err(Status::BadState);
        }
        self.threads.lock().push(thread);
        Ok(())
    }

    pub(crate) fn remove_thread(&self, thread: &Arc<UserThread>) {
        // Lock order: process state before thread list, same as kill().
        let goes_dead = {
            let life = self.life.lock();
            let mut threads = self.threads.lock();
            threads.retain(|t| !Arc::ptr_eq(t, thread));
            // The last thread unlinking drives DEAD. An INITIAL process
            // is exempt: a failed start unwinds its thread without
            // killing the process.
            threads.is_empty() && life.state != ProcessState::Initial
        };
        if goes_dead {
            self.set_state(ProcessState::Dead);
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    // ── Handle table ─────────────────────────────────────────────────────

    /// Run `f` with the handle-table lock held. The multi-handle syscalls
    /// (message write, wait-many) use this to keep lookup-validate-remove
    /// sequences atomic.
    pub fn with_table_locked<T>(&self, f: impl FnOnce(&mut TableOps<'_>) -> T) -> T {
        let mut table = self.table.lock();
        let mut ops = TableOps {
            process: self,
            table: &mut *table,
        };
        f(&mut ops)
    }

    pub fn map_handle_to_value(&self, id: HandleId) -> HandleValue {
        handle::encode(id, self.secret)
    }

    /// Install `owner` into this process's table; returns the user value.
    /// Only for the calling process, which cannot be DEAD while executing
    /// a syscall; cross-process installs go through
    /// [`ProcessDispatcher::add_handle_checked`].
    pub fn add_handle(&self, owner: HandleOwner) -> HandleValue {
        self.with_table_locked(|t| t.add_handle(owner))
    }

    /// Install `owner` into another process's table. Refused once the
    /// target is DEAD (its table has been drained for good); the handle is
    /// destroyed in that case.
    pub fn add_handle_checked(&self, owner: HandleOwner) -> Result<HandleValue, Status> {
        let life = self.life.lock();
        if life.state == ProcessState::Dead {
            return Err(Status::BadState);
        }
        Ok(self.with_table_locked(|t| t.add_handle(owner)))
    }

    /// Remove the handle for `value`, taking ownership back.
    pub fn remove_handle(&self, value: HandleValue) -> Result<HandleOwner, Status> {
        self.with_table_locked(|t| t.remove_handle(value))
    }

    /// Dispatcher + rights for `value` (no rights check).
    pub fn get_dispatcher(&self, value: HandleValue) -> Result<(Arc<Dispatcher>, Rights), Status> {
        self.with_table_locked(|t| {
            let id = t.lookup(value)?;
            Ok(handle::with_handle(id, |h| (h.dispatcher().clone(), h.rights()))
                .expect("looked-up handle vanished"))
        })
    }

    /// Dispatcher for `value`, requiring `needed` rights. The common
    /// syscall entry path; routes failures through the bad-handle policy.
    pub fn get_dispatcher_with_rights(
        &self,
        value: HandleValue,
        needed: Rights,
    ) -> Result<Arc<Dispatcher>, Status> {
        let result = self.with_table_locked(|t| {
            let id = t.lookup(value)?;
            let (dispatcher, rights) =
                handle::with_handle(id, |h| (h.dispatcher().clone(), h.rights()))
                    .expect("looked-up handle vanished");
            if !rights.covers(needed) {
                return Err(Status::AccessDenied);
            }
            Ok(dispatcher)
        });
        result.map_err(|e| self.bad_handle(value, e))
    }

    pub fn handle_count(&self) -> usize {
        self.table.lock().ids.len()
    }

    // ── Bad-handle policy ────────────────────────────────────────────────

    pub fn bad_handle_policy(&self) -> u32 {
        self.bad_handle_policy.load(Ordering::Relaxed)
    }

    pub fn set_bad_handle_policy(&self, policy: u32) -> Result<(), Status> {
        if policy > POLICY_BAD_HANDLE_EXIT {
            return Err(Status::NotSupported);
        }
        self.bad_handle_policy.store(policy, Ordering::Relaxed);
        Ok(())
    }

    /// Route a handle-lookup failure through the per-process policy.
    /// Only genuine bad handles escalate; rights and type errors pass
    /// through untouched.
    pub fn bad_handle(&self, value: HandleValue, error: Status) -> Status {
        if error != Status::BadHandle {
            return error;
        }
        match self.bad_handle_policy() {
            POLICY_BAD_HANDLE_LOG => {
                log::warn!("process '{}' used a bad handle {:#x}", self.name, value);
            }
            POLICY_BAD_HANDLE_EXIT => {
                log::warn!(
                    "process '{}' used a bad handle {:#x}, killing it",
                    self.name,
                    value
                );
                self.exit(Status::BadHandle.as_i32());
            }
            _ => {}
        }
        error
    }

    // ── Exception port ───────────────────────────────────────────────────

    pub fn set_exception_port(&self, eport: Arc<ExceptionPort>) -> Result<(), Status> {
        let life = self.life.lock();
        if life.state == ProcessState::Dead {
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
}

impl Drop for ProcessDispatcher {
    fn drop(&mut self) {
        PROCESSES.lock().retain(|p| p.strong_count() > 0);
    }
}

/// Handle-table operations under the table lock.
pub struct TableOps<'a> {
    process: &'a ProcessDispatcher,
    table: &'a mut HandleTable,
}

impl TableOps<'_> {
    /// Decode + ownership check; `BadHandle` on any mismatch.
    pub fn lookup(&self, value: HandleValue) -> Result<HandleId, Status> {
        let id = handle::decode(value, self.process.secret).ok_or(Status::BadHandle)?;
        if !self.table.ids.contains(&id.0) {
            return Err(Status::BadHandle);
        }
        let owner = handle::with_handle(id, |h| h.owner()).ok_or(Status::BadHandle)?;
        if owner != self.process.koid {
            return Err(Status::BadHandle);
        }
        Ok(id)
    }

    pub fn dispatcher_and_rights(
        &self,
        value: HandleValue,
    ) -> Result<(Arc<Dispatcher>, Rights), Status> {
        let id = self.lookup(value)?;
        Ok(handle::with_handle(id, |h| (h.dispatcher().clone(), h.rights()))
            .expect("looked-up handle vanished"))
    }

    pub fn add_handle(&mut self, owner: HandleOwner) -> HandleValue {
        let id = owner.leak();
        handle::set_owner(id, self.process.koid);
        self.table.ids.insert(id.0);
        handle::encode(id, self.process.secret)
    }

    pub fn remove_handle(&mut self, value: HandleValue) -> Result<HandleOwner, Status> {
        let id = self.lookup(value)?;
        self.table.ids.remove(&id.0);
        handle::set_owner(id, 0);
        Ok(HandleOwner::from_table(id))
    }

    /// Rollback for a partially-failed multi-remove: reinstates the handle
    /// removed for `value`.
    pub fn undo_remove(&mut self, value: HandleValue) {
        let Some(id) = handle::decode(value, self.process.secret) else {
            debug_assert!(false, "undo_remove of an undecodable value");
            return;
        };
        handle::set_owner(id, self.process.koid);
        self.table.ids.insert(id.0);
    }

    pub fn map_handle_to_value(&self, id: HandleId) -> HandleValue {
        handle::encode(id, self.process.secret)
    }
}
